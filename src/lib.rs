// Provision a local cache with an image-classification dataset and a
// pretrained checkpoint so training can run without network access.

pub mod cache;
pub mod dataset;
pub mod hub;
pub mod model;
pub mod pipeline;
pub mod report;

pub use cache::CacheLayout;
pub use dataset::{DatasetSpec, DatasetSummary, SplitCount};
pub use hub::{HfHub, Hub, HubRepo, RepoKind};
pub use model::{ImageProcessorConfig, ModelSpec, WeightsSummary};
pub use pipeline::{Pipeline, RunSummary, Stage, StageFailed};
pub use report::Reporter;
