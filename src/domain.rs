use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

pub const GEO_HTTPS_ROOT: &str = "https://ftp.ncbi.nlm.nih.gov/geo/series";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Organism {
    Human,
    Mouse,
}

impl Organism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Organism::Human => "human",
            Organism::Mouse => "mouse",
        }
    }

    pub fn ensembl_species(&self) -> &'static str {
        match self {
            Organism::Human => "homo_sapiens",
            Organism::Mouse => "mus_musculus",
        }
    }
}

impl fmt::Display for Organism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Organism {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "human" | "homo_sapiens" => Ok(Organism::Human),
            "mouse" | "mus_musculus" => Ok(Organism::Mouse),
            _ => Err(IngestError::InvalidOrganism(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GeneField {
    EnsemblGeneId,
    Symbol,
}

impl GeneField {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneField::EnsemblGeneId => "ensembl_gene_id",
            GeneField::Symbol => "symbol",
        }
    }
}

impl fmt::Display for GeneField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeneField {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "ensembl_gene_id" | "gene_ids" => Ok(GeneField::EnsemblGeneId),
            "symbol" | "gene_symbols" => Ok(GeneField::Symbol),
            _ => Err(IngestError::InvalidGeneField(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum VarNames {
    GeneIds,
    GeneSymbols,
}

impl VarNames {
    pub fn field(&self) -> GeneField {
        match self {
            VarNames::GeneIds => GeneField::EnsemblGeneId,
            VarNames::GeneSymbols => GeneField::Symbol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Genes,
    Barcodes,
    Matrix,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Genes,
        ArtifactKind::Barcodes,
        ArtifactKind::Matrix,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Genes => "genes.tsv",
            ArtifactKind::Barcodes => "barcodes.tsv",
            ArtifactKind::Matrix => "matrix.mtx",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Genes => "genes",
            ArtifactKind::Barcodes => "barcodes",
            ArtifactKind::Matrix => "matrix",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSource {
    pub kind: ArtifactKind,
    pub url: String,
    pub file_name: String,
}

impl ArtifactSource {
    pub fn supplementary(base_url: &str, prefix: &str, kind: ArtifactKind) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            kind,
            url: format!("{base}/{prefix}{}.gz", kind.file_name()),
            file_name: kind.file_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoSeriesAccession(String);

impl GeoSeriesAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn supplementary_url(&self) -> String {
        format!(
            "{GEO_HTTPS_ROOT}/{}/{}/suppl/",
            geo_series_prefix(self),
            self.as_str()
        )
    }
}

impl fmt::Display for GeoSeriesAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeoSeriesAccession {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern =
            PATTERN.get_or_init(|| Regex::new(r"^GSE[0-9]+$").expect("valid accession regex"));
        let normalized = value.trim().to_uppercase();
        if !pattern.is_match(&normalized) {
            return Err(IngestError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// GEO groups series by thousands: GSE114802 lives under GSE114nnn.
pub fn geo_series_prefix(accession: &GeoSeriesAccession) -> String {
    let digits = accession.as_str().trim_start_matches("GSE");
    if digits.len() <= 3 {
        return "GSEnnn".to_string();
    }
    let head = &digits[..digits.len() - 3];
    format!("GSE{}nnn", head)
}
