use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

use crate::cache::place;
use crate::hub::{Hub, HubRepo};

// Revision where the hub keeps the parquet export of every dataset
pub const PARQUET_REVISION: &str = "refs/convert/parquet";

#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub id: String,
    pub config: String,
    pub local_name: String,
}

impl DatasetSpec {
    pub fn new(id: &str, config: &str) -> Self {
        Self {
            id: id.to_owned(),
            config: config.to_owned(),
            local_name: local_name(id),
        }
    }

    pub fn repo(&self) -> HubRepo {
        HubRepo::dataset(&self.id, PARQUET_REVISION)
    }
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self::new("frgfm/imagenette", "full_size")
    }
}

// "frgfm/imagenette" -> "imagenette"
pub fn local_name(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitCount {
    pub name: String,
    pub samples: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub splits: Vec<SplitCount>,
}

impl DatasetSummary {
    pub fn total(&self) -> u64 {
        self.splits.iter().map(|s| s.samples).sum()
    }
}

#[derive(Serialize)]
struct DatasetDict<'a> {
    splits: Vec<&'a str>,
}

#[derive(Serialize)]
struct SplitInfo {
    num_examples: u64,
    shards: Vec<String>,
}

#[derive(Serialize)]
struct DatasetInfo<'a> {
    dataset: &'a str,
    config_name: &'a str,
    revision: &'a str,
    splits: BTreeMap<String, SplitInfo>,
}

// Pull every parquet shard of `spec.config` into `dest/<split>/` and count samples.
pub fn fetch_dataset<H: Hub>(
    hub: &H,
    spec: &DatasetSpec,
    dest: &Path,
    show_progress: bool,
) -> Result<DatasetSummary> {
    let repo = spec.repo();
    let files = hub.list_files(&repo)?;

    let mut by_split: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for file in files {
        if let Some(split) = split_of(&file, &spec.config) {
            by_split.entry(split).or_default().push(file);
        }
    }
    if by_split.is_empty() {
        bail!("no parquet shards for config '{}' in {}", spec.config, repo);
    }
    let shard_total: usize = by_split.values().map(Vec::len).sum();
    info!(
        "{} split(s), {} shard(s) for {}/{}",
        by_split.len(),
        shard_total,
        spec.id,
        spec.config
    );

    let bar = if show_progress {
        ProgressBar::new(shard_total as u64)
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("bad progress template")?,
    );

    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;

    let mut splits = Vec::with_capacity(by_split.len());
    let mut info_splits = BTreeMap::new();
    for (split, mut shards) in by_split {
        shards.sort();
        let mut samples = 0u64;
        let mut local_shards = Vec::with_capacity(shards.len());
        for remote in &shards {
            bar.set_message(remote.clone());
            let cached = hub.fetch(&repo, remote)?;
            let file_name = Path::new(remote)
                .file_name()
                .context("shard path has no file name")?;
            let local = dest.join(&split).join(file_name);
            place(&cached, &local)?;

            let rows = count_rows(&local)?;
            info!("{remote}: {rows} rows");
            samples += rows;
            local_shards.push(format!("{}/{}", split, file_name.to_string_lossy()));
            bar.inc(1);
        }
        info_splits.insert(
            split.clone(),
            SplitInfo { num_examples: samples, shards: local_shards },
        );
        splits.push(SplitCount { name: split, samples });
    }
    bar.finish_and_clear();

    splits.sort_by(|a, b| split_rank(&a.name).cmp(&split_rank(&b.name)));

    let dict = DatasetDict { splits: splits.iter().map(|s| s.name.as_str()).collect() };
    write_json(&dest.join("dataset_dict.json"), &dict)?;
    let meta = DatasetInfo {
        dataset: &spec.id,
        config_name: &spec.config,
        revision: PARQUET_REVISION,
        splits: info_splits,
    };
    write_json(&dest.join("dataset_info.json"), &meta)?;

    Ok(DatasetSummary { splits })
}

// Split a shard belongs to, if it is a parquet shard of `config`.
// Accepts `<config>/<split>/<n>.parquet` and the older flat
// `<config>/<dataset>-<split>[-NNNNN-of-NNNNN].parquet`. Truncated exports
// live under `partial-<split>`.
pub fn split_of(path: &str, config: &str) -> Option<String> {
    let rest = path.strip_prefix(config)?.strip_prefix('/')?;
    if !rest.ends_with(".parquet") {
        return None;
    }
    let parts: Vec<&str> = rest.split('/').collect();
    let split = match parts.as_slice() {
        [split, _shard] => *split,
        [file] => {
            let stem = strip_shard_suffix(file.strip_suffix(".parquet")?);
            stem.rsplit_once('-')?.1
        }
        _ => return None,
    };
    let split = split.strip_prefix("partial-").unwrap_or(split);
    if split.is_empty() {
        None
    } else {
        Some(split.to_owned())
    }
}

// "imagenette-train-00000-of-00002" -> "imagenette-train"
fn strip_shard_suffix(stem: &str) -> &str {
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if let Some((head, of)) = stem.rsplit_once("-of-") {
        if all_digits(of) {
            if let Some((base, idx)) = head.rsplit_once('-') {
                if all_digits(idx) {
                    return base;
                }
            }
        }
    }
    stem
}

fn split_rank(name: &str) -> (u8, &str) {
    let rank = match name {
        "train" => 0,
        "validation" => 1,
        "test" => 2,
        _ => 3,
    };
    (rank, name)
}

// Row count from the parquet footer; the row groups are not read.
pub fn count_rows(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("{} is not a parquet file", path.display()))?;
    let rows = reader.metadata().file_metadata().num_rows();
    u64::try_from(rows).with_context(|| format!("negative row count in {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hub::fake::DirHub;
    use parquet::data_type::Int64Type;
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use std::sync::Arc;

    // Minimal parquet file with `rows` labels
    pub(crate) fn parquet_bytes(rows: usize) -> Vec<u8> {
        let schema = Arc::new(parse_message_type("message schema { REQUIRED INT64 label; }").unwrap());
        let props = Arc::new(WriterProperties::builder().build());
        let mut buf = Vec::new();
        {
            let mut writer = SerializedFileWriter::new(&mut buf, schema, props).unwrap();
            let mut group = writer.next_row_group().unwrap();
            while let Some(mut col) = group.next_column().unwrap() {
                let labels: Vec<i64> = (0..rows as i64).map(|i| i % 10).collect();
                col.typed::<Int64Type>().write_batch(&labels, None, None).unwrap();
                col.close().unwrap();
            }
            group.close().unwrap();
            writer.close().unwrap();
        }
        buf
    }

    #[test]
    fn split_of_directory_layout() {
        assert_eq!(split_of("full_size/train/0000.parquet", "full_size").as_deref(), Some("train"));
        assert_eq!(
            split_of("full_size/validation/0001.parquet", "full_size").as_deref(),
            Some("validation")
        );
        assert_eq!(
            split_of("full_size/partial-train/0000.parquet", "full_size").as_deref(),
            Some("train")
        );
    }

    #[test]
    fn split_of_flat_layout() {
        assert_eq!(
            split_of("full_size/imagenette-train.parquet", "full_size").as_deref(),
            Some("train")
        );
        assert_eq!(
            split_of("full_size/imagenette-validation-00001-of-00002.parquet", "full_size").as_deref(),
            Some("validation")
        );
    }

    #[test]
    fn split_of_ignores_other_configs_and_files() {
        assert_eq!(split_of("320px/train/0000.parquet", "full_size"), None);
        assert_eq!(split_of("full_size_extra/train/0000.parquet", "full_size"), None);
        assert_eq!(split_of("full_size/train/README.md", "full_size"), None);
        assert_eq!(split_of(".gitattributes", "full_size"), None);
    }

    #[test]
    fn total_is_sum_of_splits() {
        let summary = DatasetSummary {
            splits: vec![
                SplitCount { name: "train".into(), samples: 9469 },
                SplitCount { name: "validation".into(), samples: 3925 },
            ],
        };
        assert_eq!(summary.total(), 13394);
    }

    #[test]
    fn local_name_is_last_segment() {
        assert_eq!(local_name("frgfm/imagenette"), "imagenette");
        assert_eq!(local_name("mnist"), "mnist");
    }

    #[test]
    fn fetches_shards_and_counts_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = DirHub::new(&tmp.path().join("hub"));
        hub.put("frgfm/imagenette", "full_size/validation/0000.parquet", &parquet_bytes(4));
        hub.put("frgfm/imagenette", "full_size/train/0000.parquet", &parquet_bytes(7));
        hub.put("frgfm/imagenette", "full_size/train/0001.parquet", &parquet_bytes(5));
        hub.put("frgfm/imagenette", "320px/train/0000.parquet", &parquet_bytes(99));

        let dest = tmp.path().join("cache/datasets/imagenette");
        let summary = fetch_dataset(&hub, &DatasetSpec::default(), &dest, false).unwrap();

        assert_eq!(
            summary.splits,
            vec![
                SplitCount { name: "train".into(), samples: 12 },
                SplitCount { name: "validation".into(), samples: 4 },
            ]
        );
        assert_eq!(summary.total(), 16);
        assert!(dest.join("train/0001.parquet").is_file());
        assert!(dest.join("validation/0000.parquet").is_file());

        let dict: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dest.join("dataset_dict.json")).unwrap()).unwrap();
        assert_eq!(dict["splits"], serde_json::json!(["train", "validation"]));
        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dest.join("dataset_info.json")).unwrap()).unwrap();
        assert_eq!(meta["config_name"], "full_size");
        assert_eq!(meta["splits"]["train"]["num_examples"], 12);
    }

    #[test]
    fn missing_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = DirHub::new(&tmp.path().join("hub"));
        hub.put("frgfm/imagenette", "320px/train/0000.parquet", &parquet_bytes(3));

        let err = fetch_dataset(&hub, &DatasetSpec::default(), &tmp.path().join("out"), false)
            .unwrap_err();
        assert!(err.to_string().contains("full_size"));
    }

    #[test]
    fn corrupt_shard_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = DirHub::new(&tmp.path().join("hub"));
        hub.put("frgfm/imagenette", "full_size/train/0000.parquet", b"not parquet");

        assert!(fetch_dataset(&hub, &DatasetSpec::default(), &tmp.path().join("out"), false).is_err());
    }
}
