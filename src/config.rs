use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactKind, ArtifactSource, GeneField, GeoSeriesAccession, Organism, VarNames};
use crate::error::IngestError;

pub const DEFAULT_CONFIG_FILE: &str = "organoid-ingest.json";
pub const DEFAULT_DATASET: &str = "Organoid123";
pub const DEFAULT_ACCESSION: &str = "GSE114802";
pub const DEFAULT_DATA_ROOT: &str = "data/00-raw";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub organism: Option<Organism>,
    #[serde(default)]
    pub dataset: Option<DatasetEntry>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub lineage_root: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub var_names: Option<VarNames>,
    #[serde(default)]
    pub field: Option<GeneField>,
    #[serde(default)]
    pub ontology: Option<OntologySource>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetEntry {
    pub name: String,
    pub accession: String,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum OntologySource {
    Ensembl {
        #[serde(default)]
        base_url: Option<String>,
    },
    Table {
        path: String,
    },
}

impl Default for OntologySource {
    fn default() -> Self {
        OntologySource::Ensembl { base_url: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub organism: Option<Organism>,
    pub base_url: Option<String>,
    pub data_root: Option<String>,
    pub lineage_root: Option<String>,
    pub reference_table: Option<String>,
    pub http_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub transform_name: String,
    pub organism: Organism,
    pub dataset_name: String,
    pub accession: GeoSeriesAccession,
    pub base_url: String,
    pub data_dir: Utf8PathBuf,
    pub artifacts: Vec<ArtifactSource>,
    pub lineage_root: Option<Utf8PathBuf>,
    pub description: String,
    pub var_names: VarNames,
    pub field: GeneField,
    pub ontology: OntologySource,
    pub http_timeout: Option<Duration>,
}

impl ResolvedConfig {
    pub fn artifact_path(&self, artifact: &ArtifactSource) -> Utf8PathBuf {
        self.data_dir.join(&artifact.file_name)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `organoid-ingest.json` when present; otherwise uses the built-in run.
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| IngestError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config.apply(overrides))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, IngestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(IngestError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let dataset = config.dataset.unwrap_or_else(|| DatasetEntry {
            name: DEFAULT_DATASET.to_string(),
            accession: DEFAULT_ACCESSION.to_string(),
            file_prefix: None,
        });
        let accession: GeoSeriesAccession = dataset.accession.parse()?;
        let prefix = dataset
            .file_prefix
            .unwrap_or_else(|| format!("{}_org_", accession.as_str()));
        let base_url = config
            .base_url
            .unwrap_or_else(|| accession.supplementary_url());
        let artifacts = ArtifactKind::ALL
            .iter()
            .map(|kind| ArtifactSource::supplementary(&base_url, &prefix, *kind))
            .collect();

        let data_dir = Utf8PathBuf::from(
            config
                .data_root
                .unwrap_or_else(|| DEFAULT_DATA_ROOT.to_string()),
        )
        .join(&dataset.name);
        let var_names = config.var_names.unwrap_or(VarNames::GeneIds);

        Ok(ResolvedConfig {
            schema_version,
            transform_name: config
                .transform
                .unwrap_or_else(|| format!("download_{}", dataset.name)),
            organism: config.organism.unwrap_or(Organism::Human),
            description: config
                .description
                .unwrap_or_else(|| format!("{} raw", dataset.name)),
            dataset_name: dataset.name,
            accession,
            base_url,
            data_dir,
            artifacts,
            lineage_root: config.lineage_root.map(Utf8PathBuf::from),
            var_names,
            field: config.field.unwrap_or_else(|| var_names.field()),
            ontology: config.ontology.unwrap_or_default(),
            http_timeout: config.http_timeout_secs.map(Duration::from_secs),
        })
    }
}

impl Config {
    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if overrides.organism.is_some() {
            self.organism = overrides.organism;
        }
        if overrides.base_url.is_some() {
            self.base_url = overrides.base_url;
        }
        if overrides.data_root.is_some() {
            self.data_root = overrides.data_root;
        }
        if overrides.lineage_root.is_some() {
            self.lineage_root = overrides.lineage_root;
        }
        if let Some(path) = overrides.reference_table {
            self.ontology = Some(OntologySource::Table { path });
        }
        if overrides.http_timeout_secs.is_some() {
            self.http_timeout_secs = overrides.http_timeout_secs;
        }
        self
    }
}
