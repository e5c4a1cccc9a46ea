use std::fmt;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

const MAX_PREALLOCATED_ENTRIES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MtxField {
    Integer,
    Real,
    Pattern,
}

impl fmt::Display for MtxField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MtxField::Integer => write!(f, "integer"),
            MtxField::Real => write!(f, "real"),
            MtxField::Pattern => write!(f, "pattern"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtxHeader {
    pub field: MtxField,
    pub rows: usize,
    pub cols: usize,
    pub entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MtxEntry {
    pub row: u32,
    pub col: u32,
    pub value: f32,
}

pub fn read_coordinate<R: BufRead>(reader: R) -> Result<(MtxHeader, Vec<MtxEntry>), IngestError> {
    let mut lines = reader.lines().enumerate();

    let (_, banner) = lines
        .next()
        .ok_or_else(|| IngestError::MatrixParse("empty matrix file".to_string()))?;
    let banner = banner.map_err(|err| IngestError::MatrixParse(err.to_string()))?;
    let field = parse_banner(&banner)?;

    let mut size = None;
    for (line_num, line) in lines.by_ref() {
        let line = line.map_err(|err| IngestError::MatrixParse(err.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        size = Some(parse_size_line(trimmed, line_num + 1)?);
        break;
    }
    let (rows, cols, expected) =
        size.ok_or_else(|| IngestError::MatrixParse("missing size line".to_string()))?;
    let header = MtxHeader {
        field,
        rows,
        cols,
        entries: expected,
    };

    // The size line is untrusted; never reserve more than the matrix can hold.
    let mut entries = Vec::with_capacity(
        expected
            .min(rows.saturating_mul(cols))
            .min(MAX_PREALLOCATED_ENTRIES),
    );
    for (line_num, line) in lines {
        let line = line.map_err(|err| IngestError::MatrixParse(err.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        if entries.len() == expected {
            return Err(IngestError::MatrixParse(format!(
                "more than the declared {expected} entries (line {})",
                line_num + 1
            )));
        }
        entries.push(parse_entry(trimmed, &header, line_num + 1)?);
    }

    if entries.len() != expected {
        return Err(IngestError::MatrixParse(format!(
            "declared {expected} entries but found {}",
            entries.len()
        )));
    }
    Ok((header, entries))
}

pub fn write_coordinate<W: Write>(
    mut writer: W,
    header: &MtxHeader,
    entries: impl IntoIterator<Item = MtxEntry>,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "%%MatrixMarket matrix coordinate {} general",
        header.field
    )?;
    writeln!(writer, "{} {} {}", header.rows, header.cols, header.entries)?;
    for entry in entries {
        match header.field {
            MtxField::Pattern => writeln!(writer, "{} {}", entry.row + 1, entry.col + 1)?,
            MtxField::Integer => writeln!(
                writer,
                "{} {} {}",
                entry.row + 1,
                entry.col + 1,
                entry.value as i64
            )?,
            MtxField::Real => {
                writeln!(writer, "{} {} {}", entry.row + 1, entry.col + 1, entry.value)?
            }
        }
    }
    Ok(())
}

fn parse_banner(line: &str) -> Result<MtxField, IngestError> {
    let tokens = line
        .split_whitespace()
        .map(|token| token.to_lowercase())
        .collect::<Vec<_>>();
    if tokens.first().map(String::as_str) != Some("%%matrixmarket") {
        return Err(IngestError::MatrixParse(
            "missing %%MatrixMarket banner".to_string(),
        ));
    }
    if tokens.len() != 5 || tokens[1] != "matrix" || tokens[2] != "coordinate" {
        return Err(IngestError::MatrixParse(format!(
            "unsupported matrix format: {line}"
        )));
    }
    let field = match tokens[3].as_str() {
        "integer" => MtxField::Integer,
        "real" | "double" => MtxField::Real,
        "pattern" => MtxField::Pattern,
        other => {
            return Err(IngestError::MatrixParse(format!(
                "unsupported value field: {other}"
            )));
        }
    };
    if tokens[4] != "general" {
        return Err(IngestError::MatrixParse(format!(
            "unsupported symmetry: {}",
            tokens[4]
        )));
    }
    Ok(field)
}

fn parse_size_line(line: &str, line_num: usize) -> Result<(usize, usize, usize), IngestError> {
    let values = line
        .split_whitespace()
        .map(|token| token.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| IngestError::MatrixParse(format!("size line {line_num}: {err}")))?;
    match values.as_slice() {
        [rows, cols, entries] => Ok((*rows, *cols, *entries)),
        _ => Err(IngestError::MatrixParse(format!(
            "size line {line_num}: expected `rows cols entries`"
        ))),
    }
}

fn parse_entry(line: &str, header: &MtxHeader, line_num: usize) -> Result<MtxEntry, IngestError> {
    let mut fields = line.split_whitespace();
    let mut index = |name: &str, bound: usize| -> Result<u32, IngestError> {
        let raw = fields.next().ok_or_else(|| {
            IngestError::MatrixParse(format!("line {line_num}: missing {name} index"))
        })?;
        let value = raw
            .parse::<usize>()
            .map_err(|err| IngestError::MatrixParse(format!("line {line_num}: {err}")))?;
        if value == 0 || value > bound {
            return Err(IngestError::MatrixParse(format!(
                "line {line_num}: {name} index {value} outside 1..={bound}"
            )));
        }
        Ok((value - 1) as u32)
    };
    let row = index("row", header.rows)?;
    let col = index("column", header.cols)?;

    let value = match header.field {
        MtxField::Pattern => 1.0,
        MtxField::Integer | MtxField::Real => {
            let raw = fields.next().ok_or_else(|| {
                IngestError::MatrixParse(format!("line {line_num}: missing value"))
            })?;
            if header.field == MtxField::Integer {
                raw.parse::<i64>()
                    .map_err(|err| IngestError::MatrixParse(format!("line {line_num}: {err}")))?
                    as f32
            } else {
                raw.parse::<f32>()
                    .map_err(|err| IngestError::MatrixParse(format!("line {line_num}: {err}")))?
            }
        }
    };
    Ok(MtxEntry { row, col, value })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SMALL: &str = "%%MatrixMarket matrix coordinate integer general\n\
        %metadata_json: {}\n\
        3 2 3\n\
        1 1 5\n\
        3 1 1\n\
        2 2 7\n";

    #[test]
    fn reads_coordinate_entries() {
        let (header, entries) = read_coordinate(SMALL.as_bytes()).unwrap();
        assert_eq!(header.rows, 3);
        assert_eq!(header.cols, 2);
        assert_eq!(header.field, MtxField::Integer);
        assert_eq!(
            entries[1],
            MtxEntry {
                row: 2,
                col: 0,
                value: 1.0
            }
        );
    }

    #[test]
    fn pattern_entries_default_to_one() {
        let text = "%%MatrixMarket matrix coordinate pattern general\n2 2 1\n2 1\n";
        let (_, entries) = read_coordinate(text.as_bytes()).unwrap();
        assert_eq!(entries[0].value, 1.0);
    }

    #[test]
    fn rejects_missing_banner() {
        let err = read_coordinate("3 2 0\n".as_bytes()).unwrap_err();
        assert_matches!(err, IngestError::MatrixParse(_));
    }

    #[test]
    fn rejects_symmetric_matrices() {
        let text = "%%MatrixMarket matrix coordinate real symmetric\n2 2 0\n";
        assert_matches!(
            read_coordinate(text.as_bytes()),
            Err(IngestError::MatrixParse(msg)) if msg.contains("symmetry")
        );
    }

    #[test]
    fn rejects_out_of_range_index() {
        let text = "%%MatrixMarket matrix coordinate integer general\n2 2 1\n3 1 4\n";
        assert_matches!(
            read_coordinate(text.as_bytes()),
            Err(IngestError::MatrixParse(msg)) if msg.contains("outside")
        );
    }

    #[test]
    fn rejects_entry_count_mismatch() {
        let short = "%%MatrixMarket matrix coordinate integer general\n2 2 2\n1 1 4\n";
        assert_matches!(
            read_coordinate(short.as_bytes()),
            Err(IngestError::MatrixParse(_))
        );
        let long = "%%MatrixMarket matrix coordinate integer general\n2 2 1\n1 1 4\n2 2 1\n";
        assert_matches!(
            read_coordinate(long.as_bytes()),
            Err(IngestError::MatrixParse(_))
        );
    }

    #[test]
    fn rejects_absurd_entry_count() {
        let text = "%%MatrixMarket matrix coordinate integer general\n2 2 18446744073709551615\n1 1 4\n";
        assert_matches!(
            read_coordinate(text.as_bytes()),
            Err(IngestError::MatrixParse(msg)) if msg.contains("declared")
        );
        let huge = "%%MatrixMarket matrix coordinate integer general\n2 2 10000000000\n1 1 4\n";
        assert_matches!(
            read_coordinate(huge.as_bytes()),
            Err(IngestError::MatrixParse(_))
        );
    }

    #[test]
    fn written_file_reads_back() {
        let (header, entries) = read_coordinate(SMALL.as_bytes()).unwrap();
        let mut out = Vec::new();
        write_coordinate(&mut out, &header, entries.iter().copied()).unwrap();
        let (again, reread) = read_coordinate(out.as_slice()).unwrap();
        assert_eq!(again, header);
        assert_eq!(reread, entries);
    }
}
