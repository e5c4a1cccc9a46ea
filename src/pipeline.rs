use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{GeneField, Organism, VarNames};
use crate::error::IngestError;
use crate::fetch::{Downloader, fetch_artifact};
use crate::lineage::{LineageBackend, TrackedFile, TrackedMatrix, Transform};
use crate::matrix::{AnnotatedMatrix, read_10x_mtx};
use crate::ontology::{GeneOntology, annotate};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub transform: Transform,
    pub data_dir: String,
    pub files: Vec<TrackedFile>,
    pub matrix: TrackedMatrix,
}

#[derive(Clone)]
pub struct Pipeline<D: Downloader, O: GeneOntology, L: LineageBackend> {
    downloader: D,
    ontology: O,
    lineage: L,
}

impl<D: Downloader, O: GeneOntology, L: LineageBackend> Pipeline<D, O, L> {
    pub fn new(downloader: D, ontology: O, lineage: L) -> Self {
        Self {
            downloader,
            ontology,
            lineage,
        }
    }

    pub fn lineage(&self) -> &L {
        &self.lineage
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, IngestError> {
        sink.event(ProgressEvent {
            message: format!(
                "phase=Setup; transform {} organism={}",
                config.transform_name, config.organism
            ),
            elapsed: None,
        });
        let ctx = self
            .lineage
            .begin_transform(&config.transform_name, config.organism)?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; downloading dataset from {}", config.base_url),
            elapsed: None,
        });
        let mut files = Vec::with_capacity(config.artifacts.len());
        for artifact in &config.artifacts {
            let destination = config.artifact_path(artifact);
            let start = Instant::now();
            let tracked = fetch_artifact(
                &ctx,
                &self.downloader,
                &self.lineage,
                &artifact.url,
                &destination,
                sink,
            )?;
            sink.event(ProgressEvent {
                message: format!("fetched {} -> {}", artifact.kind, tracked.key),
                elapsed: Some(start.elapsed()),
            });
            files.push(tracked);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Assemble; reading {}", config.data_dir),
            elapsed: None,
        });
        let matrix = assemble(
            config.data_dir.as_std_path(),
            config.var_names,
            &self.ontology,
            config.organism,
            config.field,
        )?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; saving {} x {} matrix",
                matrix.n_obs(),
                matrix.n_vars()
            ),
            elapsed: None,
        });
        let record = TrackedMatrix::from_annotated(&ctx, &matrix, config.field, &config.description);
        let saved = self.lineage.save_matrix(&ctx, &record, &matrix)?;

        sink.event(ProgressEvent {
            message: "phase=Done".to_string(),
            elapsed: None,
        });
        Ok(RunReport {
            transform: ctx.transform().clone(),
            data_dir: config.data_dir.to_string(),
            files,
            matrix: saved,
        })
    }
}

pub fn assemble<O: GeneOntology + ?Sized>(
    dir: &Path,
    var_names: VarNames,
    ontology: &O,
    organism: Organism,
    field: GeneField,
) -> Result<AnnotatedMatrix, IngestError> {
    let matrix = read_10x_mtx(dir, var_names)?;
    annotate(matrix, ontology, organism, field)
}
