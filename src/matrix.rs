use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::domain::{ArtifactKind, VarNames};
use crate::error::IngestError;
use crate::mtx::{self, MtxEntry, MtxField, MtxHeader};
use crate::ontology::ReferenceGene;

pub const DEFAULT_FEATURE_TYPE: &str = "Gene Expression";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneAnnotation {
    pub gene_id: String,
    pub symbol: Option<String>,
    pub feature_type: String,
    pub reference: Option<ReferenceGene>,
}

/// Expression values of barcodes (rows) by genes (columns) with their labels.
///
/// Storage follows the cellranger convention of one sparse row per barcode,
/// `rows[barcode] = [(gene index, value)]`, sorted by gene index.
#[derive(Debug, Clone)]
pub struct AnnotatedMatrix {
    obs: Vec<String>,
    var: Vec<GeneAnnotation>,
    var_names: Vec<String>,
    rows: Vec<Vec<(u32, f32)>>,
    field: MtxField,
}

impl AnnotatedMatrix {
    pub fn new(
        obs: Vec<String>,
        var: Vec<GeneAnnotation>,
        var_names: VarNames,
        mut rows: Vec<Vec<(u32, f32)>>,
        field: MtxField,
    ) -> Result<Self, IngestError> {
        if rows.len() != obs.len() {
            return Err(IngestError::MatrixParse(format!(
                "{} rows for {} barcodes",
                rows.len(),
                obs.len()
            )));
        }
        for row in &mut rows {
            if row.iter().any(|(gene, _)| *gene as usize >= var.len()) {
                return Err(IngestError::MatrixParse(
                    "gene index outside the gene table".to_string(),
                ));
            }
            row.sort_by_key(|(gene, _)| *gene);
            // Repeated coordinates add up, so each gene appears once per cell.
            row.dedup_by(|next, kept| {
                if next.0 == kept.0 {
                    kept.1 += next.1;
                    true
                } else {
                    false
                }
            });
        }
        let var_names = match var_names {
            VarNames::GeneIds => var.iter().map(|gene| gene.gene_id.clone()).collect(),
            VarNames::GeneSymbols => make_unique(
                var.iter()
                    .map(|gene| gene.symbol.clone().unwrap_or_else(|| gene.gene_id.clone())),
            ),
        };
        Ok(Self {
            obs,
            var,
            var_names,
            rows,
            field,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_obs(), self.n_vars())
    }

    pub fn n_obs(&self) -> usize {
        self.obs.len()
    }

    pub fn n_vars(&self) -> usize {
        self.var.len()
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn field(&self) -> MtxField {
        self.field
    }

    pub fn obs_names(&self) -> &[String] {
        &self.obs
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn var(&self) -> &[GeneAnnotation] {
        &self.var
    }

    pub fn row(&self, obs: usize) -> &[(u32, f32)] {
        &self.rows[obs]
    }

    pub fn get(&self, obs: usize, var: usize) -> f32 {
        let row = &self.rows[obs];
        row.binary_search_by_key(&(var as u32), |(gene, _)| *gene)
            .map(|pos| row[pos].1)
            .unwrap_or(0.0)
    }

    pub fn total_counts(&self) -> f64 {
        self.rows
            .iter()
            .flat_map(|row| row.iter().map(|(_, value)| *value as f64))
            .sum()
    }

    pub fn resolved_vars(&self) -> usize {
        self.var.iter().filter(|gene| gene.reference.is_some()).count()
    }

    pub fn unresolved_var_names(&self) -> Vec<&str> {
        self.var
            .iter()
            .zip(&self.var_names)
            .filter(|(gene, _)| gene.reference.is_none())
            .map(|(_, name)| name.as_str())
            .collect()
    }

    pub(crate) fn with_references(
        mut self,
        references: Vec<Option<ReferenceGene>>,
    ) -> Result<Self, IngestError> {
        if references.len() != self.var.len() {
            return Err(IngestError::MatrixParse(format!(
                "{} reference entries for {} genes",
                references.len(),
                self.var.len()
            )));
        }
        for (gene, reference) in self.var.iter_mut().zip(references) {
            gene.reference = reference;
        }
        Ok(self)
    }

    /// Matrix Market text in the 10x orientation (genes x barcodes).
    pub fn to_mtx(&self) -> Result<Vec<u8>, IngestError> {
        let header = MtxHeader {
            field: self.field,
            rows: self.n_vars(),
            cols: self.n_obs(),
            entries: self.nnz(),
        };
        let entries = self.rows.iter().enumerate().flat_map(|(barcode, row)| {
            row.iter().map(move |(gene, value)| MtxEntry {
                row: *gene,
                col: barcode as u32,
                value: *value,
            })
        });
        let mut out = Vec::new();
        mtx::write_coordinate(&mut out, &header, entries)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(out)
    }

    pub fn barcodes_tsv(&self) -> String {
        let mut out = String::new();
        for barcode in &self.obs {
            out.push_str(barcode);
            out.push('\n');
        }
        out
    }

    pub fn genes_tsv(&self) -> String {
        let mut out = String::new();
        for gene in &self.var {
            let (ref_symbol, biotype) = match &gene.reference {
                Some(reference) => (
                    reference.symbol.as_deref().unwrap_or(""),
                    reference.biotype.as_deref().unwrap_or(""),
                ),
                None => ("", ""),
            };
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                gene.gene_id,
                gene.symbol.as_deref().unwrap_or(""),
                gene.feature_type,
                ref_symbol,
                biotype
            ));
        }
        out
    }
}

pub fn read_10x_mtx(dir: &Path, var_names: VarNames) -> Result<AnnotatedMatrix, IngestError> {
    let var = read_rows(&dir.join(ArtifactKind::Genes.file_name()))?
        .into_iter()
        .map(|columns| {
            let mut columns = columns.into_iter();
            let gene_id = columns.next().unwrap_or_default();
            let symbol = columns.next().filter(|value| !value.is_empty());
            let feature_type = columns
                .next()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_FEATURE_TYPE.to_string());
            GeneAnnotation {
                gene_id,
                symbol,
                feature_type,
                reference: None,
            }
        })
        .collect::<Vec<_>>();
    let obs = read_rows(&dir.join(ArtifactKind::Barcodes.file_name()))?
        .into_iter()
        .map(|columns| columns.into_iter().next().unwrap_or_default())
        .collect::<Vec<_>>();

    let matrix_path = dir.join(ArtifactKind::Matrix.file_name());
    let file = File::open(&matrix_path).map_err(|err| {
        IngestError::Filesystem(format!("open {}: {err}", matrix_path.display()))
    })?;
    let (header, entries) = mtx::read_coordinate(BufReader::new(file))?;

    if header.rows != var.len() {
        return Err(IngestError::MatrixParse(format!(
            "matrix declares {} rows but {} lists {} genes",
            header.rows,
            ArtifactKind::Genes.file_name(),
            var.len()
        )));
    }
    if header.cols != obs.len() {
        return Err(IngestError::MatrixParse(format!(
            "matrix declares {} columns but {} lists {} barcodes",
            header.cols,
            ArtifactKind::Barcodes.file_name(),
            obs.len()
        )));
    }

    let mut rows = vec![Vec::new(); obs.len()];
    for entry in entries {
        rows[entry.col as usize].push((entry.row, entry.value));
    }
    AnnotatedMatrix::new(obs, var, var_names, rows, header.field)
}

fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, IngestError> {
    let file = File::open(path)
        .map_err(|err| IngestError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| {
            IngestError::MatrixParse(format!("{}: {err}", path.display()))
        })?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        rows.push(line.split('\t').map(str::to_string).collect());
    }
    Ok(rows)
}

fn make_unique(names: impl Iterator<Item = String>) -> Vec<String> {
    let names = names.collect::<Vec<_>>();
    let mut taken = names
        .iter()
        .cloned()
        .collect::<std::collections::HashSet<_>>();
    let mut seen = HashMap::<String, usize>::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let count = seen.entry(name.clone()).or_insert(0);
        if *count == 0 {
            *count = 1;
            out.push(name);
            continue;
        }
        let mut candidate = format!("{name}-{count}");
        while taken.contains(&candidate) {
            *count += 1;
            candidate = format!("{name}-{count}");
        }
        *count += 1;
        taken.insert(candidate.clone());
        out.push(candidate);
    }
    out
}
