use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::config::OntologySource;
use crate::domain::{GeneField, Organism};
use crate::error::IngestError;
use crate::matrix::AnnotatedMatrix;

pub const ENSEMBL_REST_URL: &str = "https://rest.ensembl.org";

/// Ensembl caps POST lookups at 1000 identifiers per request.
const LOOKUP_BATCH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGene {
    pub ensembl_gene_id: String,
    pub symbol: Option<String>,
    pub biotype: Option<String>,
}

pub trait GeneOntology {
    fn lookup(
        &self,
        organism: Organism,
        field: GeneField,
        ids: &[String],
    ) -> Result<HashMap<String, ReferenceGene>, IngestError>;
}

#[derive(Clone)]
pub struct EnsemblRestClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EnsemblLookup {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    biotype: Option<String>,
    #[serde(default)]
    species: Option<String>,
}

impl EnsemblRestClient {
    pub fn new(base_url: Option<&str>, timeout: Option<Duration>) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("organoid-ingest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IngestError::OntologyHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| IngestError::OntologyHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(ENSEMBL_REST_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn post_lookup(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HashMap<String, Option<EnsemblLookup>>, IngestError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|err| IngestError::OntologyHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Ensembl lookup failed".to_string());
            return Err(IngestError::OntologyStatus { status, message });
        }
        response
            .json()
            .map_err(|err| IngestError::OntologyHttp(err.to_string()))
    }
}

impl GeneOntology for EnsemblRestClient {
    fn lookup(
        &self,
        organism: Organism,
        field: GeneField,
        ids: &[String],
    ) -> Result<HashMap<String, ReferenceGene>, IngestError> {
        let mut resolved = HashMap::new();
        let species = organism.ensembl_species();

        // Queried form -> identifiers as they appear in the matrix.
        let mut queries: HashMap<String, Vec<&String>> = HashMap::new();
        for id in ids {
            let query = match field {
                GeneField::EnsemblGeneId if is_ensembl_gene_id(id) => strip_version(id),
                GeneField::EnsemblGeneId => continue,
                GeneField::Symbol => id.as_str(),
            };
            queries.entry(query.to_string()).or_default().push(id);
        }
        let mut keys = queries.keys().cloned().collect::<Vec<_>>();
        keys.sort();

        for batch in keys.chunks(LOOKUP_BATCH) {
            let (url, body) = match field {
                GeneField::EnsemblGeneId => (
                    format!("{}/lookup/id", self.base_url),
                    serde_json::json!({ "ids": batch }),
                ),
                GeneField::Symbol => (
                    format!("{}/lookup/symbol/{species}", self.base_url),
                    serde_json::json!({ "symbols": batch }),
                ),
            };
            tracing::debug!(url = %url, ids = batch.len(), "ensembl lookup");
            for (query, entry) in self.post_lookup(&url, &body)? {
                let Some(entry) = entry else { continue };
                if entry.species.as_deref().is_some_and(|value| value != species) {
                    continue;
                }
                let reference = ReferenceGene {
                    ensembl_gene_id: entry.id,
                    symbol: entry.display_name,
                    biotype: entry.biotype,
                };
                if let Some(originals) = queries.get(&query) {
                    for original in originals {
                        resolved.insert((*original).clone(), reference.clone());
                    }
                }
            }
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    by_id: HashMap<String, ReferenceGene>,
    by_symbol: HashMap<String, ReferenceGene>,
}

impl ReferenceTable {
    pub fn new(genes: impl IntoIterator<Item = ReferenceGene>) -> Self {
        let mut table = Self::default();
        for gene in genes {
            if let Some(symbol) = &gene.symbol {
                table
                    .by_symbol
                    .entry(symbol.clone())
                    .or_insert_with(|| gene.clone());
            }
            table.by_id.insert(gene.ensembl_gene_id.clone(), gene);
        }
        table
    }

    pub fn from_tsv(path: &Path) -> Result<Self, IngestError> {
        let content = fs::read_to_string(path).map_err(|err| IngestError::OntologyTable {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let mut genes = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut columns = line.split('\t');
            let id = columns.next().unwrap_or_default().trim();
            if line_num == 0 && id == "ensembl_gene_id" {
                continue;
            }
            if id.is_empty() {
                return Err(IngestError::OntologyTable {
                    path: path.display().to_string(),
                    message: format!("line {}: empty gene identifier", line_num + 1),
                });
            }
            let mut optional = || {
                columns
                    .next()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };
            genes.push(ReferenceGene {
                ensembl_gene_id: id.to_string(),
                symbol: optional(),
                biotype: optional(),
            });
        }
        Ok(Self::new(genes))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl GeneOntology for ReferenceTable {
    fn lookup(
        &self,
        _organism: Organism,
        field: GeneField,
        ids: &[String],
    ) -> Result<HashMap<String, ReferenceGene>, IngestError> {
        let mut resolved = HashMap::new();
        for id in ids {
            let hit = match field {
                GeneField::EnsemblGeneId => self.by_id.get(strip_version(id)),
                GeneField::Symbol => self.by_symbol.get(id.as_str()),
            };
            if let Some(gene) = hit {
                resolved.insert(id.clone(), gene.clone());
            }
        }
        Ok(resolved)
    }
}

#[derive(Clone)]
pub enum ReferenceOntology {
    Ensembl(EnsemblRestClient),
    Table(ReferenceTable),
}

impl ReferenceOntology {
    pub fn from_source(
        source: &OntologySource,
        timeout: Option<Duration>,
    ) -> Result<Self, IngestError> {
        match source {
            OntologySource::Ensembl { base_url } => Ok(Self::Ensembl(EnsemblRestClient::new(
                base_url.as_deref(),
                timeout,
            )?)),
            OntologySource::Table { path } => Ok(Self::Table(ReferenceTable::from_tsv(
                Path::new(path),
            )?)),
        }
    }
}

impl GeneOntology for ReferenceOntology {
    fn lookup(
        &self,
        organism: Organism,
        field: GeneField,
        ids: &[String],
    ) -> Result<HashMap<String, ReferenceGene>, IngestError> {
        match self {
            Self::Ensembl(client) => client.lookup(organism, field, ids),
            Self::Table(table) => table.lookup(organism, field, ids),
        }
    }
}

pub fn annotate<O: GeneOntology + ?Sized>(
    matrix: AnnotatedMatrix,
    ontology: &O,
    organism: Organism,
    field: GeneField,
) -> Result<AnnotatedMatrix, IngestError> {
    let ids = matrix
        .var()
        .iter()
        .map(|gene| match field {
            GeneField::EnsemblGeneId => gene.gene_id.clone(),
            GeneField::Symbol => gene.symbol.clone().unwrap_or_else(|| gene.gene_id.clone()),
        })
        .collect::<Vec<_>>();
    let unique = ids
        .iter()
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let resolved = ontology.lookup(organism, field, &unique)?;
    let references = ids.iter().map(|id| resolved.get(id).cloned()).collect();
    let matrix = matrix.with_references(references)?;

    let unresolved = matrix.unresolved_var_names();
    tracing::info!(
        organism = %organism,
        field = %field,
        resolved = matrix.resolved_vars(),
        total = matrix.n_vars(),
        "validated gene identifiers"
    );
    if !unresolved.is_empty() {
        tracing::warn!(
            count = unresolved.len(),
            examples = ?unresolved.iter().take(5).collect::<Vec<_>>(),
            "gene identifiers did not resolve and are kept without a reference entry"
        );
    }
    Ok(matrix)
}

pub fn is_ensembl_gene_id(value: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^ENS[A-Z]*G[0-9]{11}(\.[0-9]+)?$").expect("valid Ensembl id regex")
        })
        .is_match(value)
}

fn strip_version(id: &str) -> &str {
    match id.split_once('.') {
        Some((stable, _)) if is_ensembl_gene_id(id) => stable,
        _ => id,
    }
}
