use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use organoid_ingest::config::{ConfigLoader, ConfigOverrides};
use organoid_ingest::domain::Organism;
use organoid_ingest::error::IngestError;
use organoid_ingest::fetch::HttpDownloader;
use organoid_ingest::lineage::LocalLineageStore;
use organoid_ingest::ontology::ReferenceOntology;
use organoid_ingest::output::{JsonOutput, LogProgress, OutputMode, print_summary};
use organoid_ingest::pipeline::{Pipeline, ProgressSink};

#[derive(Parser)]
#[command(name = "organoid-ingest")]
#[command(about = "Download the Organoid123 GEO dataset and record it in the lineage store")]
#[command(version, author)]
struct Cli {
    /// Print the run report as JSON instead of a summary.
    #[arg(long)]
    non_interactive: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    organism: Option<Organism>,

    /// Directory the three supplementary files are fetched from.
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    data_root: Option<String>,

    #[arg(long)]
    lineage_root: Option<String>,

    /// Resolve genes against a local TSV table instead of the Ensembl REST API.
    #[arg(long)]
    reference_table: Option<String>,

    #[arg(long)]
    http_timeout_secs: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::Http(_)
        | IngestError::HttpStatus { .. }
        | IngestError::OntologyHttp(_)
        | IngestError::OntologyStatus { .. } => 3,
        IngestError::Decompress { .. } | IngestError::MatrixParse(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let overrides = ConfigOverrides {
        organism: cli.organism,
        base_url: cli.base_url,
        data_root: cli.data_root,
        lineage_root: cli.lineage_root,
        reference_table: cli.reference_table,
        http_timeout_secs: cli.http_timeout_secs,
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;

    let lineage_root: Utf8PathBuf = match &config.lineage_root {
        Some(root) => root.clone(),
        None => LocalLineageStore::default_root()?,
    };
    let downloader = HttpDownloader::new(config.http_timeout)?;
    let ontology = ReferenceOntology::from_source(&config.ontology, config.http_timeout)?;
    let pipeline = Pipeline::new(downloader, ontology, LocalLineageStore::new(lineage_root));

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &LogProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };
    let report = pipeline.run(&config, sink)?;

    match output_mode {
        OutputMode::Interactive => print_summary(&report),
        OutputMode::NonInteractive => JsonOutput::print_run(&report).into_diagnostic()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_group_errors_by_cause() {
        let network = [
            IngestError::Http("connection reset".to_string()),
            IngestError::HttpStatus {
                url: "https://geo.test/x.gz".to_string(),
                status: 404,
                message: "not found".to_string(),
            },
            IngestError::OntologyHttp("timed out".to_string()),
            IngestError::OntologyStatus {
                status: 503,
                message: "unavailable".to_string(),
            },
        ];
        for error in &network {
            assert_eq!(map_exit_code(error), 3, "{error}");
        }

        let data = [
            IngestError::Decompress {
                path: "matrix.mtx.gz".to_string(),
                message: "not a gzip stream".to_string(),
            },
            IngestError::MatrixParse("missing size line".to_string()),
        ];
        for error in &data {
            assert_eq!(map_exit_code(error), 4, "{error}");
        }

        assert_eq!(map_exit_code(&IngestError::Filesystem("disk full".to_string())), 1);
        assert_eq!(map_exit_code(&IngestError::Lineage("conflict".to_string())), 1);
        assert_eq!(
            map_exit_code(&IngestError::ConfigParse("bad json".to_string())),
            1
        );
    }
}
