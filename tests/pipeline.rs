use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Mutex;
use std::thread;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use organoid_ingest::config::{Config, ConfigLoader, ResolvedConfig};
use organoid_ingest::domain::{GeneField, Organism, VarNames};
use organoid_ingest::error::IngestError;
use organoid_ingest::fetch::HttpDownloader;
use organoid_ingest::lineage::{
    LineageBackend, LocalLineageStore, RunContext, TrackedFile, TrackedMatrix,
};
use organoid_ingest::matrix::AnnotatedMatrix;
use organoid_ingest::ontology::{ReferenceGene, ReferenceTable};
use organoid_ingest::output::JsonOutput;
use organoid_ingest::pipeline::{Pipeline, assemble};

const GENES: &str = "ENSG00000141510\tTP53\nENSG00000146648\tEGFR\n";
const BARCODES: &str = "AAACCTGAGAAGGCCT-1\nAAACCTGAGACAGACC-1\n";
const MATRIX: &str = "%%MatrixMarket matrix coordinate integer general\n\
    %metadata_json: {\"format_version\": 2}\n\
    2 2 3\n\
    1 1 3\n\
    2 1 1\n\
    2 2 5\n";

#[derive(Default)]
struct CountingLineage {
    files: Mutex<Vec<TrackedFile>>,
    matrix_saves: Mutex<usize>,
}

impl LineageBackend for CountingLineage {
    fn begin_transform(&self, name: &str, organism: Organism) -> Result<RunContext, IngestError> {
        Ok(RunContext::new(name, organism))
    }

    fn save_file(&self, _ctx: &RunContext, file: &TrackedFile) -> Result<(), IngestError> {
        self.files.lock().unwrap().push(file.clone());
        Ok(())
    }

    fn save_matrix(
        &self,
        _ctx: &RunContext,
        record: &TrackedMatrix,
        _matrix: &AnnotatedMatrix,
    ) -> Result<TrackedMatrix, IngestError> {
        *self.matrix_saves.lock().unwrap() += 1;
        Ok(record.clone())
    }
}

fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Minimal HTTP/1.1 server answering GETs from `routes`; returns its base URL.
fn serve(routes: HashMap<String, Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            let path = request_line
                .split_whitespace()
                .nth(1)
                .unwrap_or("/")
                .to_string();
            let _ = match routes.get(&path) {
                Some(body) => write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/gzip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .and_then(|_| stream.write_all(body)),
                None => stream.write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                ),
            };
            let _ = stream.flush();
        }
    });
    format!("http://{addr}")
}

fn geo_routes(matrix: &str) -> HashMap<String, Vec<u8>> {
    HashMap::from([
        (
            "/suppl/GSE114802_org_genes.tsv.gz".to_string(),
            gzip(GENES),
        ),
        (
            "/suppl/GSE114802_org_barcodes.tsv.gz".to_string(),
            gzip(BARCODES),
        ),
        (
            "/suppl/GSE114802_org_matrix.mtx.gz".to_string(),
            gzip(matrix),
        ),
    ])
}

fn local_config(temp: &tempfile::TempDir, base_url: String) -> ResolvedConfig {
    let config = Config {
        base_url: Some(format!("{base_url}/suppl/")),
        data_root: Some(temp.path().join("data/00-raw").to_string_lossy().into_owned()),
        lineage_root: Some(temp.path().join("lineage").to_string_lossy().into_owned()),
        ..Config::default()
    };
    ConfigLoader::resolve_config(config).unwrap()
}

fn downloader() -> HttpDownloader {
    HttpDownloader::with_client(
        reqwest::blocking::Client::builder()
            .no_proxy()
            .build()
            .unwrap(),
    )
}

fn reference() -> ReferenceTable {
    ReferenceTable::new([
        ReferenceGene {
            ensembl_gene_id: "ENSG00000141510".to_string(),
            symbol: Some("TP53".to_string()),
            biotype: Some("protein_coding".to_string()),
        },
        ReferenceGene {
            ensembl_gene_id: "ENSG00000146648".to_string(),
            symbol: Some("EGFR".to_string()),
            biotype: Some("protein_coding".to_string()),
        },
    ])
}

#[test]
fn run_downloads_assembles_and_saves() {
    let temp = tempfile::tempdir().unwrap();
    let config = local_config(&temp, serve(geo_routes(MATRIX)));
    let lineage_root = config.lineage_root.clone().unwrap();
    let pipeline = Pipeline::new(
        downloader(),
        reference(),
        LocalLineageStore::new(lineage_root),
    );

    let report = pipeline.run(&config, &JsonOutput).unwrap();

    assert_eq!(report.transform.name, "download_Organoid123");
    assert_eq!((report.matrix.n_obs, report.matrix.n_vars), (2, 2));
    assert_eq!(report.matrix.nnz, 3);
    assert_eq!(report.matrix.resolved_vars, 2);
    assert_eq!(report.matrix.description, "Organoid123 raw");
    assert_eq!(report.matrix.field, GeneField::EnsemblGeneId);

    let leftovers = std::fs::read_dir(config.data_dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".gz"))
        .collect::<Vec<_>>();
    assert!(leftovers.is_empty(), "compressed files left: {leftovers:?}");

    let store = pipeline.lineage();
    let keys = store
        .list_files()
        .unwrap()
        .into_iter()
        .map(|file| file.key)
        .collect::<Vec<_>>();
    assert_eq!(keys.len(), 3);
    for artifact in &config.artifacts {
        assert!(keys.contains(&config.artifact_path(artifact).to_string()));
    }
    let matrices = store.list_matrices().unwrap();
    assert_eq!(matrices, vec![report.matrix.clone()]);
    assert!(store.artifact_path(&matrices[0]).as_std_path().exists());

    let matrix = assemble(
        config.data_dir.as_std_path(),
        VarNames::GeneIds,
        &reference(),
        Organism::Human,
        GeneField::EnsemblGeneId,
    )
    .unwrap();
    assert_eq!(matrix.shape(), (2, 2));
    assert_eq!(matrix.get(0, 1), 1.0);
    assert_eq!(matrix.get(1, 1), 5.0);
}

#[test]
fn dimension_mismatch_never_reaches_persistence() {
    let temp = tempfile::tempdir().unwrap();
    let bad_matrix = "%%MatrixMarket matrix coordinate integer general\n3 2 1\n1 1 3\n";
    let config = local_config(&temp, serve(geo_routes(bad_matrix)));
    let pipeline = Pipeline::new(downloader(), reference(), CountingLineage::default());

    let err = pipeline.run(&config, &JsonOutput).unwrap_err();

    assert_matches!(err, IngestError::MatrixParse(_));
    assert_eq!(*pipeline.lineage().matrix_saves.lock().unwrap(), 0);
    assert_eq!(pipeline.lineage().files.lock().unwrap().len(), 3);
}

#[test]
fn missing_remote_file_aborts_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let mut routes = geo_routes(MATRIX);
    routes.remove("/suppl/GSE114802_org_barcodes.tsv.gz");
    let config = local_config(&temp, serve(routes));
    let pipeline = Pipeline::new(downloader(), reference(), CountingLineage::default());

    let err = pipeline.run(&config, &JsonOutput).unwrap_err();

    assert_matches!(err, IngestError::HttpStatus { status: 404, .. });
    assert_eq!(pipeline.lineage().files.lock().unwrap().len(), 1);
    assert_eq!(*pipeline.lineage().matrix_saves.lock().unwrap(), 0);
}

#[test]
fn unresolved_genes_are_counted_not_dropped() {
    let temp = tempfile::tempdir().unwrap();
    let config = local_config(&temp, serve(geo_routes(MATRIX)));
    let partial = ReferenceTable::new([ReferenceGene {
        ensembl_gene_id: "ENSG00000141510".to_string(),
        symbol: Some("TP53".to_string()),
        biotype: None,
    }]);
    let pipeline = Pipeline::new(downloader(), partial, CountingLineage::default());

    let report = pipeline.run(&config, &JsonOutput).unwrap();

    assert_eq!(report.matrix.n_vars, 2);
    assert_eq!(report.matrix.resolved_vars, 1);
    assert_eq!(report.matrix.unresolved_vars, 1);
    assert_eq!(*pipeline.lineage().matrix_saves.lock().unwrap(), 1);
    assert!(report.data_dir.ends_with("00-raw/Organoid123"));
}
