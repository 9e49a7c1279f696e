use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{info, warn};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::cache::place;
use crate::dataset::local_name;
use crate::hub::{Hub, HubRepo};

pub const PROCESSOR_FILE: &str = "preprocessor_config.json";
const PROCESSOR_FALLBACK: &str = "image_processor.json";
pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

// Batch-norm statistics are stored next to the weights but are not trained
const BUFFER_SUFFIXES: [&str; 3] = ["running_mean", "running_var", "num_batches_tracked"];

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: String,
    pub local_name: String,
}

impl ModelSpec {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            local_name: local_name(id),
        }
    }

    pub fn repo(&self) -> HubRepo {
        HubRepo::model(&self.id)
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::new("microsoft/resnet-50")
    }
}

// Display view of `size`, which comes in three shapes depending on the processor version
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Square(u32),
    ShortestEdge { shortest_edge: u32 },
    Exact { height: u32, width: u32 },
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSize::Square(s) => write!(f, "{s}x{s}"),
            ImageSize::ShortestEdge { shortest_edge } => write!(f, "shortest edge {shortest_edge}"),
            ImageSize::Exact { height, width } => write!(f, "{height}x{width}"),
        }
    }
}

// Resize / normalization parameters of an image model.
// Keys this struct does not know are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProcessorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_resize: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resample: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_rescale: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescale_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_normalize: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mean: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_std: Option<Vec<f64>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageProcessorConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text).context("malformed image processor config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    // Missing mean/std are fine: the training side falls back to library defaults
    fn validate(&self) -> Result<()> {
        if self.do_normalize == Some(false) {
            return Ok(());
        }
        if let (Some(mean), Some(std)) = (&self.image_mean, &self.image_std) {
            ensure!(!mean.is_empty(), "image_mean is empty");
            ensure!(
                mean.len() == std.len(),
                "image_mean has {} channels but image_std has {}",
                mean.len(),
                std.len()
            );
            ensure!(std.iter().all(|s| *s > 0.0), "image_std must be positive");
        }
        Ok(())
    }

    // `size` stays raw so every key is written back; this is only for narration
    pub fn size_view(&self) -> Option<ImageSize> {
        self.size.clone().and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn processor_type(&self) -> Option<&str> {
        ["image_processor_type", "feature_extractor_type"]
            .iter()
            .find_map(|k| self.extra.get(*k).and_then(Value::as_str))
    }
}

// Fetch the processor config of `spec` and save it under `dest`.
pub fn fetch_preprocessor<H: Hub>(hub: &H, spec: &ModelSpec, dest: &Path) -> Result<ImageProcessorConfig> {
    let repo = spec.repo();
    let cached = match hub.fetch(&repo, PROCESSOR_FILE) {
        Ok(p) => p,
        Err(e) => {
            warn!("{PROCESSOR_FILE} unavailable ({e:#}), trying {PROCESSOR_FALLBACK}");
            hub.fetch(&repo, PROCESSOR_FALLBACK)
                .map_err(|_| e)?
        }
    };
    let text = fs::read_to_string(&cached)
        .with_context(|| format!("failed to read {}", cached.display()))?;
    let cfg = ImageProcessorConfig::from_json(&text)?;

    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let out = dest.join(PROCESSOR_FILE);
    fs::write(&out, serde_json::to_string_pretty(&cfg)?)
        .with_context(|| format!("failed to write {}", out.display()))?;
    info!("Saved processor config to {:?}", out);
    Ok(cfg)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightsSummary {
    pub tensors: usize,
    pub parameters: u64,
    pub buffer_elements: u64,
}

// Fetch `config.json` and the safetensors checkpoint of `spec` into `dest`.
pub fn fetch_weights<H: Hub>(hub: &H, spec: &ModelSpec, dest: &Path) -> Result<WeightsSummary> {
    let repo = spec.repo();
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;

    let config = hub.fetch(&repo, CONFIG_FILE)?;
    place(&config, &dest.join(CONFIG_FILE))?;
    if let Some(arch) = architecture(&config) {
        info!("{} architecture: {arch}", spec.id);
    }

    let weights = hub.fetch(&repo, WEIGHTS_FILE)?;
    let local = dest.join(WEIGHTS_FILE);
    place(&weights, &local)?;

    let bytes = fs::read(&local).with_context(|| format!("failed to read {}", local.display()))?;
    let summary = count_parameters(&bytes)?;
    if summary.parameters == 0 {
        bail!("{} holds no trainable parameters", local.display());
    }
    info!(
        "{} tensors, {} parameters, {} buffer elements",
        summary.tensors, summary.parameters, summary.buffer_elements
    );
    Ok(summary)
}

// Parameter totals from a serialized safetensors checkpoint.
pub fn count_parameters(bytes: &[u8]) -> Result<WeightsSummary> {
    let st = SafeTensors::deserialize(bytes).map_err(|e| anyhow!("invalid safetensors file: {e}"))?;
    let mut summary = WeightsSummary::default();
    for (name, view) in st.tensors() {
        let numel: u64 = view.shape().iter().map(|d| *d as u64).product();
        summary.tensors += 1;
        if is_buffer(&name) {
            summary.buffer_elements += numel;
        } else {
            summary.parameters += numel;
        }
    }
    Ok(summary)
}

fn is_buffer(name: &str) -> bool {
    BUFFER_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn architecture(config: &Path) -> Option<String> {
    let text = fs::read_to_string(config).ok()?;
    let v: Value = serde_json::from_str(&text).ok()?;
    v.get("architectures")?.get(0)?.as_str().map(str::to_owned)
}
