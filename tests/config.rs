use assert_matches::assert_matches;

use organoid_ingest::config::{ConfigLoader, ConfigOverrides, OntologySource};
use organoid_ingest::domain::{ArtifactKind, GeneField, Organism, VarNames};
use organoid_ingest::error::IngestError;

#[test]
fn resolve_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("organoid-ingest.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "organism": "mouse",
            "dataset": {"name": "Brain7", "accession": "GSE12345", "file_prefix": "GSE12345_"},
            "data_root": "raw",
            "var_names": "gene_symbols",
            "ontology": {"source": "table", "path": "mm10_genes.tsv"},
            "http_timeout_secs": 600
        }"#,
    )
    .unwrap();

    let resolved =
        ConfigLoader::resolve(path.to_str(), ConfigOverrides::default()).unwrap();

    assert_eq!(resolved.organism, Organism::Mouse);
    assert_eq!(resolved.transform_name, "download_Brain7");
    assert_eq!(resolved.description, "Brain7 raw");
    assert_eq!(resolved.data_dir.as_str(), "raw/Brain7");
    assert_eq!(resolved.var_names, VarNames::GeneSymbols);
    assert_eq!(resolved.field, GeneField::Symbol);
    assert_eq!(
        resolved.ontology,
        OntologySource::Table {
            path: "mm10_genes.tsv".to_string()
        }
    );
    assert_eq!(resolved.http_timeout.map(|t| t.as_secs()), Some(600));
    assert_eq!(resolved.artifacts[1].kind, ArtifactKind::Barcodes);
    assert_eq!(
        resolved.artifacts[1].url,
        "https://ftp.ncbi.nlm.nih.gov/geo/series/GSE12nnn/GSE12345/suppl/GSE12345_barcodes.tsv.gz"
    );
}

#[test]
fn explicit_missing_config_is_an_error() {
    let err = ConfigLoader::resolve(
        Some("/nonexistent/organoid-ingest.json"),
        ConfigOverrides::default(),
    )
    .unwrap_err();
    assert_matches!(err, IngestError::ConfigRead(_));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, r#"{"organism": "yeast"}"#).unwrap();
    let err = ConfigLoader::resolve(path.to_str(), ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, IngestError::ConfigParse(_));
}

#[test]
fn bad_accession_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bad.json");
    std::fs::write(
        &path,
        r#"{"dataset": {"name": "X", "accession": "SRR014966"}}"#,
    )
    .unwrap();
    let err = ConfigLoader::resolve(path.to_str(), ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, IngestError::InvalidAccession(_));
}
