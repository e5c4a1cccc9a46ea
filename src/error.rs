use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid GEO series accession: {0}")]
    InvalidAccession(String),

    #[error("invalid organism: {0}")]
    InvalidOrganism(String),

    #[error("invalid gene identifier field: {0}")]
    InvalidGeneField(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("download request failed: {0}")]
    Http(String),

    #[error("download returned status {status} for {url}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("gzip decompression of {path} failed: {message}")]
    #[diagnostic(help("the downloaded archive is left in place for inspection"))]
    Decompress { path: String, message: String },

    #[error("matrix parsing failed: {0}")]
    MatrixParse(String),

    #[error("reference ontology request failed: {0}")]
    OntologyHttp(String),

    #[error("reference ontology returned status {status}: {message}")]
    OntologyStatus { status: u16, message: String },

    #[error("failed to load reference gene table {path}: {message}")]
    OntologyTable { path: String, message: String },

    #[error("lineage store error: {0}")]
    Lineage(String),

    #[error("tracked file does not exist or is not a regular file: {0}")]
    MissingArtifact(String),
}
