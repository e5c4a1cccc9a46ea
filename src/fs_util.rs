use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::IngestError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompresses `source` into `destination` and returns the number of bytes written.
///
/// Output goes to a temporary sibling first, so `destination` is only
/// replaced once the whole archive has been decoded.
pub fn gunzip_file(source: &Path, destination: &Path) -> Result<u64, IngestError> {
    let decompress_err = |message: String| IngestError::Decompress {
        path: source.display().to_string(),
        message,
    };

    let mut input = fs::File::open(source)
        .map_err(|err| IngestError::Filesystem(format!("open {}: {err}", source.display())))?;
    let mut magic = [0u8; 2];
    let mut seen = 0;
    while seen < magic.len() {
        let n = input
            .read(&mut magic[seen..])
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        if n == 0 {
            break;
        }
        seen += n;
    }
    if seen < magic.len() || magic != GZIP_MAGIC {
        return Err(decompress_err("not a gzip stream".to_string()));
    }

    let parent = destination
        .parent()
        .ok_or_else(|| IngestError::Filesystem("invalid destination path".to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".gunzip")
        .tempfile_in(parent)
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;

    let mut decoder = MultiGzDecoder::new(io::Cursor::new(magic).chain(input));
    let mut buffer = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = decoder
            .read(&mut buffer)
            .map_err(|err| decompress_err(err.to_string()))?;
        if n == 0 {
            break;
        }
        temp.write_all(&buffer[..n])
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        written += n as u64;
    }
    temp.flush()
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;

    if destination.exists() {
        fs::remove_file(destination).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    }
    temp.persist(destination)
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(written)
}

pub fn sha256_file(path: &Path) -> Result<String, IngestError> {
    let mut file = fs::File::open(path)
        .map_err(|err| IngestError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_zip(zip_path: &Path, entries: &[(&str, &[u8])]) -> Result<(), IngestError> {
    let parent = zip_path
        .parent()
        .ok_or_else(|| IngestError::Filesystem("invalid archive path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".bundle")
        .tempfile_in(parent)
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(temp.as_file());
    for (name, content) in entries {
        writer
            .start_file(*name, options)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        writer
            .write_all(content)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    }
    writer
        .finish()
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;

    if zip_path.exists() {
        fs::remove_file(zip_path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    }
    temp.persist(zip_path)
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn read_zip_entry(zip_path: &Path, name: &str) -> Result<String, IngestError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| IngestError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    let mut entry = archive
        .by_name(name)
        .map_err(|err| IngestError::Filesystem(format!("{name}: {err}")))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(text)
}

pub fn validate_zip(zip_path: &Path) -> Result<Vec<String>, IngestError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| IngestError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| IngestError::Filesystem(err.to_string()))?;

    let mut names = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        names.push(entry.name().to_string());
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    }
    Ok(names)
}
