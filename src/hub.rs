use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use log::info;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    Dataset,
    Model,
}

// A repository on the hub, optionally pinned to a revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRepo {
    pub id: String,
    pub kind: RepoKind,
    pub revision: Option<String>,
}

impl HubRepo {
    pub fn model(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: RepoKind::Model, revision: None }
    }

    pub fn dataset(id: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: RepoKind::Dataset,
            revision: Some(revision.into()),
        }
    }

    fn to_hf(&self) -> Repo {
        let repo_type = match self.kind {
            RepoKind::Dataset => RepoType::Dataset,
            RepoKind::Model => RepoType::Model,
        };
        match &self.revision {
            Some(rev) => Repo::with_revision(self.id.clone(), repo_type, rev.clone()),
            None => Repo::new(self.id.clone(), repo_type),
        }
    }
}

impl fmt::Display for HubRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}@{}", self.id, rev),
            None => f.write_str(&self.id),
        }
    }
}

/// Remote artifact store the fetch stages pull from.
pub trait Hub {
    /// Paths of every file in the repository, relative to its root.
    fn list_files(&self, repo: &HubRepo) -> Result<Vec<String>>;

    /// Download one file (or reuse the client's cached copy) and return its local path.
    fn fetch(&self, repo: &HubRepo, filename: &str) -> Result<PathBuf>;
}

// Blocking Hugging Face Hub client
pub struct HfHub {
    api: Api,
}

impl HfHub {
    pub fn new(token: Option<String>, cache_dir: Option<PathBuf>, progress: bool) -> Result<Self> {
        let mut builder = ApiBuilder::new().with_progress(progress);
        // without an explicit token the client keeps the one cached by `huggingface-cli login`
        if token.is_some() {
            builder = builder.with_token(token);
        }
        if let Some(dir) = cache_dir {
            info!("Hub cache dir: {:?}", dir);
            builder = builder.with_cache_dir(dir);
        }
        let api = builder.build().context("failed to build hub client")?;
        Ok(Self { api })
    }
}

impl Hub for HfHub {
    fn list_files(&self, repo: &HubRepo) -> Result<Vec<String>> {
        let listing = self
            .api
            .repo(repo.to_hf())
            .info()
            .with_context(|| format!("failed to list files of {repo}"))?;
        Ok(listing.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    fn fetch(&self, repo: &HubRepo, filename: &str) -> Result<PathBuf> {
        info!("Fetching {filename} from {repo}");
        self.api
            .repo(repo.to_hf())
            .get(filename)
            .with_context(|| format!("failed to download {filename} from {repo}"))
    }
}
