use anyhow::{Error, Result};
use log::{error, info};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::cache::{display_abs, CacheLayout};
use crate::dataset::{fetch_dataset, DatasetSpec, DatasetSummary};
use crate::hub::Hub;
use crate::model::{fetch_preprocessor, fetch_weights, ModelSpec, WeightsSummary};
use crate::report::{group_thousands, Reporter};

const STEPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dataset,
    Preprocessor,
    Weights,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::Dataset => "Dataset download",
            Stage::Preprocessor => "Image processor download",
            Stage::Weights => "Pretrained model download",
        }
    }
}

// A fetch stage that gave up. The cause has already been reported.
#[derive(Debug)]
pub struct StageFailed {
    pub stage: Stage,
    pub cause: Error,
}

impl std::fmt::Display for StageFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {:#}", self.stage.label(), self.cause)
    }
}

impl std::error::Error for StageFailed {}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub dataset: DatasetSummary,
    pub dataset_dir: PathBuf,
    pub model_dir: PathBuf,
    pub weights: WeightsSummary,
    pub elapsed: Duration,
}

pub struct Pipeline<'h, H: Hub, W: Write> {
    hub: &'h H,
    layout: CacheLayout,
    dataset: DatasetSpec,
    model: ModelSpec,
    show_progress: bool,
    report: Reporter<W>,
}

impl<'h, H: Hub, W: Write> Pipeline<'h, H, W> {
    pub fn new(hub: &'h H, layout: CacheLayout, report: Reporter<W>) -> Self {
        Self {
            hub,
            layout,
            dataset: DatasetSpec::default(),
            model: ModelSpec::default(),
            show_progress: true,
            report,
        }
    }

    pub fn dataset(mut self, spec: DatasetSpec) -> Self {
        self.dataset = spec;
        self
    }

    pub fn model(mut self, spec: ModelSpec) -> Self {
        self.model = spec;
        self
    }

    pub fn show_progress(mut self, on: bool) -> Self {
        self.show_progress = on;
        self
    }

    pub fn into_reporter(self) -> Reporter<W> {
        self.report
    }

    // Create the cache tree. Errors here are not stage failures and propagate as is.
    pub fn provision(&mut self) -> Result<()> {
        self.layout.ensure()?;
        info!("Cache ready at {:?}", self.layout.root());
        Ok(())
    }

    // Run the three fetch stages in order, stopping at the first failure.
    pub fn run(&mut self) -> Result<RunSummary, StageFailed> {
        let start = Instant::now();
        self.report.header("Resource download");
        self.report.info("Downloads the dataset and model needed for training");
        self.report.warning("Make sure the network is reachable, this can take a few minutes");
        self.report
            .info(&format!("Download directory: {}", display_abs(self.layout.root())));

        let dataset = self.guard(Stage::Dataset, |p| p.dataset_stage())?;
        self.guard(Stage::Preprocessor, |p| p.preprocessor_stage())?;
        let weights = self.guard(Stage::Weights, |p| p.weights_stage())?;

        let elapsed = start.elapsed();
        let summary = RunSummary {
            dataset,
            dataset_dir: self.layout.dataset_dir(&self.dataset.local_name),
            model_dir: self.layout.model_dir(&self.model.local_name),
            weights,
            elapsed,
        };
        self.finish(&summary);
        Ok(summary)
    }

    fn guard<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T, StageFailed> {
        f(self).map_err(|cause| {
            let failed = StageFailed { stage, cause };
            error!("{failed}");
            self.report.warning(&failed.to_string());
            failed
        })
    }

    fn dataset_stage(&mut self) -> Result<DatasetSummary> {
        self.report.step(1, STEPS, "Download dataset");
        self.report.info(&format!(
            "Dataset: {} (config {})",
            self.dataset.id, self.dataset.config
        ));

        let dest = self.layout.dataset_dir(&self.dataset.local_name);
        let summary = fetch_dataset(self.hub, &self.dataset, &dest, self.show_progress)?;

        self.report.info("Dataset statistics:");
        for split in &summary.splits {
            self.report
                .item(&format!("{}: {} samples", split.name, split.samples));
        }
        self.report.item(&format!("total: {} samples", summary.total()));
        self.report
            .success(&format!("Dataset saved to: {}", dest.display()));
        info!("Dataset total: {} samples", summary.total());
        Ok(summary)
    }

    fn preprocessor_stage(&mut self) -> Result<()> {
        self.report.step(2, STEPS, "Download image processor");
        self.report.info(&format!("Model: {}", self.model.id));

        let dest = self.layout.model_dir(&self.model.local_name);
        let cfg = fetch_preprocessor(self.hub, &self.model, &dest)?;

        if let Some(size) = cfg.size_view() {
            self.report.item(&format!("resize: {size}"));
        }
        if let (Some(mean), Some(std)) = (&cfg.image_mean, &cfg.image_std) {
            self.report
                .item(&format!("normalize: mean {mean:?}, std {std:?}"));
        }
        self.report
            .success(&format!("Image processor saved to: {}", dest.display()));
        Ok(())
    }

    fn weights_stage(&mut self) -> Result<WeightsSummary> {
        self.report.step(3, STEPS, "Download pretrained model");
        self.report.warning("Model weights are large, please wait...");

        let dest = self.layout.model_dir(&self.model.local_name);
        let weights = fetch_weights(self.hub, &self.model, &dest)?;

        self.report.info(&format!(
            "Model parameters: {}",
            group_thousands(weights.parameters)
        ));
        self.report
            .success(&format!("Pretrained model saved to: {}", dest.display()));
        Ok(weights)
    }

    fn finish(&mut self, summary: &RunSummary) {
        self.report.header("All resources downloaded");
        self.report
            .info(&format!("Total time: {:.1} s", summary.elapsed.as_secs_f64()));
        self.report.info(&format!(
            "Dataset location: {}",
            display_abs(&self.layout.datasets())
        ));
        self.report
            .info(&format!("Model location: {}", display_abs(&self.layout.models())));
        self.report.info("Next step:");
        self.report
            .line("  Training can now run fully offline against this cache.");
        info!("Finished in {:.1}s", summary.elapsed.as_secs_f64());
    }
}
