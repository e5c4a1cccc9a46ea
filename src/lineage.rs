use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{GeneField, Organism};
use crate::error::IngestError;
use crate::fs_util;
use crate::matrix::AnnotatedMatrix;

pub const TOOL: &str = concat!("organoid-ingest/", env!("CARGO_PKG_VERSION"));

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    pub id: String,
    pub name: String,
    pub organism: Organism,
    pub started_at: String,
    pub tool: String,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    transform: Transform,
}

impl RunContext {
    pub fn new(name: &str, organism: Organism) -> Self {
        let now = chrono::Utc::now();
        let nonce = uid_for(&format!(
            "{name}\0{}\0{}\0{}",
            now.timestamp_nanos_opt().unwrap_or_default(),
            std::process::id(),
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        Self {
            transform: Transform {
                id: format!("{name}-{}-{}", now.format("%Y%m%dT%H%M%S%.3fZ"), &nonce[..8]),
                name: name.to_string(),
                organism,
                started_at: now.to_rfc3339(),
                tool: TOOL.to_string(),
            },
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn transform_id(&self) -> &str {
        &self.transform.id
    }

    pub fn organism(&self) -> Organism {
        self.transform.organism
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub uid: String,
    pub key: String,
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub transform_id: String,
    pub created_at: String,
}

impl TrackedFile {
    /// Records a completed file on disk. Fails if `path` is not a regular file.
    ///
    /// The uid is scoped to the transform: a later run gets its own record for
    /// the same key, a re-fetch within one run replaces the earlier one.
    pub fn from_path(ctx: &RunContext, path: &Utf8Path, key: &str) -> Result<Self, IngestError> {
        let metadata = fs::metadata(path.as_std_path())
            .map_err(|_| IngestError::MissingArtifact(path.to_string()))?;
        if !metadata.is_file() {
            return Err(IngestError::MissingArtifact(path.to_string()));
        }
        Ok(Self {
            uid: uid_for(&format!("{}\0{key}", ctx.transform_id())),
            key: key.to_string(),
            path: path.to_string(),
            size: metadata.len(),
            sha256: fs_util::sha256_file(path.as_std_path())?,
            transform_id: ctx.transform_id().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedMatrix {
    pub uid: String,
    pub key: String,
    pub description: String,
    pub field: GeneField,
    pub n_obs: usize,
    pub n_vars: usize,
    pub nnz: usize,
    pub resolved_vars: usize,
    pub unresolved_vars: usize,
    pub sha256: Option<String>,
    pub transform_id: String,
    pub created_at: String,
}

impl TrackedMatrix {
    pub fn from_annotated(
        ctx: &RunContext,
        matrix: &AnnotatedMatrix,
        field: GeneField,
        description: &str,
    ) -> Self {
        let uid = uid_for(&format!("{}\0{description}", ctx.transform_id()));
        Self {
            key: format!("artifacts/{uid}.zip"),
            uid,
            description: description.to_string(),
            field,
            n_obs: matrix.n_obs(),
            n_vars: matrix.n_vars(),
            nnz: matrix.nnz(),
            resolved_vars: matrix.resolved_vars(),
            unresolved_vars: matrix.n_vars() - matrix.resolved_vars(),
            sha256: None,
            transform_id: ctx.transform_id().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub trait LineageBackend {
    fn begin_transform(&self, name: &str, organism: Organism) -> Result<RunContext, IngestError>;
    fn save_file(&self, ctx: &RunContext, file: &TrackedFile) -> Result<(), IngestError>;
    fn save_matrix(
        &self,
        ctx: &RunContext,
        record: &TrackedMatrix,
        matrix: &AnnotatedMatrix,
    ) -> Result<TrackedMatrix, IngestError>;
}

#[derive(Debug, Clone)]
pub struct LocalLineageStore {
    root: Utf8PathBuf,
}

impl LocalLineageStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Result<Utf8PathBuf, IngestError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.data_local_dir().join("organoid-ingest").join("lineage"),
                )
                .ok()
            })
            .ok_or_else(|| {
                IngestError::Filesystem("unable to resolve lineage store directory".to_string())
            })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn transform_path(&self, id: &str) -> Utf8PathBuf {
        self.root.join("transforms").join(format!("{id}.json"))
    }

    pub fn file_record_path(&self, uid: &str) -> Utf8PathBuf {
        self.root.join("files").join(format!("{uid}.json"))
    }

    pub fn matrix_record_path(&self, uid: &str) -> Utf8PathBuf {
        self.root.join("matrices").join(format!("{uid}.json"))
    }

    pub fn artifact_path(&self, record: &TrackedMatrix) -> Utf8PathBuf {
        self.root.join(&record.key)
    }

    pub fn list_transforms(&self) -> Result<Vec<Transform>, IngestError> {
        read_records(&self.root.join("transforms"))
    }

    pub fn list_files(&self) -> Result<Vec<TrackedFile>, IngestError> {
        read_records(&self.root.join("files"))
    }

    pub fn list_matrices(&self) -> Result<Vec<TrackedMatrix>, IngestError> {
        read_records(&self.root.join("matrices"))
    }
}

impl LineageBackend for LocalLineageStore {
    fn begin_transform(&self, name: &str, organism: Organism) -> Result<RunContext, IngestError> {
        let ctx = RunContext::new(name, organism);
        write_record(&self.transform_path(ctx.transform_id()), ctx.transform())?;
        Ok(ctx)
    }

    fn save_file(&self, ctx: &RunContext, file: &TrackedFile) -> Result<(), IngestError> {
        if file.transform_id != ctx.transform_id() {
            return Err(IngestError::Lineage(format!(
                "file {} belongs to transform {}, not {}",
                file.key,
                file.transform_id,
                ctx.transform_id()
            )));
        }
        let path = self.file_record_path(&file.uid);
        if path.as_std_path().exists() {
            let existing: TrackedFile = read_record(&path)?;
            if existing.key != file.key || existing.transform_id != file.transform_id {
                return Err(IngestError::Lineage(format!(
                    "uid {} already records {} from transform {}",
                    file.uid, existing.key, existing.transform_id
                )));
            }
        }
        write_record(&path, file)
    }

    fn save_matrix(
        &self,
        ctx: &RunContext,
        record: &TrackedMatrix,
        matrix: &AnnotatedMatrix,
    ) -> Result<TrackedMatrix, IngestError> {
        if record.transform_id != ctx.transform_id() {
            return Err(IngestError::Lineage(format!(
                "matrix {} belongs to transform {}, not {}",
                record.uid,
                record.transform_id,
                ctx.transform_id()
            )));
        }
        let mtx = matrix.to_mtx()?;
        let barcodes = matrix.barcodes_tsv();
        let genes = matrix.genes_tsv();
        let metadata = serde_json::to_vec_pretty(record)
            .map_err(|err| IngestError::Lineage(err.to_string()))?;

        let bundle = self.artifact_path(record);
        fs_util::write_zip(
            bundle.as_std_path(),
            &[
                ("matrix.mtx", mtx.as_slice()),
                ("barcodes.tsv", barcodes.as_bytes()),
                ("genes.tsv", genes.as_bytes()),
                ("metadata.json", metadata.as_slice()),
            ],
        )?;

        let mut saved = record.clone();
        saved.sha256 = Some(fs_util::sha256_file(bundle.as_std_path())?);
        write_record(&self.matrix_record_path(&saved.uid), &saved)?;
        Ok(saved)
    }
}

pub fn uid_for(key: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    digest[..20].to_string()
}

fn write_record<T: Serialize>(path: &Utf8Path, record: &T) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let content =
        serde_json::to_vec_pretty(record).map_err(|err| IngestError::Lineage(err.to_string()))?;
    fs::write(tmp_path.as_std_path(), &content)
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(())
}

fn read_record<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, IngestError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    serde_json::from_str(&content).map_err(|err| IngestError::Lineage(format!("{path}: {err}")))
}

fn read_records<T: DeserializeOwned>(dir: &Utf8Path) -> Result<Vec<T>, IngestError> {
    if !dir.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in
        fs::read_dir(dir.as_std_path()).map_err(|err| IngestError::Filesystem(err.to_string()))?
    {
        let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|_| IngestError::Filesystem("non-utf8 path in lineage store".to_string()))?;
        if path.extension() == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|path| read_record(path)).collect()
}
