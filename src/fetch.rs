use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::IngestError;
use crate::fs_util;
use crate::lineage::{LineageBackend, RunContext, TrackedFile};
use crate::pipeline::{ProgressEvent, ProgressSink};

pub trait Downloader {
    fn download_url(&self, url: &str, destination: &Path) -> Result<u64, IngestError>;
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Option<Duration>) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("organoid-ingest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IngestError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| IngestError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn normalize_url(url: &str) -> String {
        if let Some(rest) = url.strip_prefix("ftp://ftp.ncbi.nlm.nih.gov/") {
            return format!("https://ftp.ncbi.nlm.nih.gov/{}", rest);
        }
        url.to_string()
    }

    fn write_response_to_file(
        &self,
        url: &str,
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<u64, IngestError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(IngestError::HttpStatus {
                url: url.to_string(),
                status,
                message,
            });
        }
        let mut file =
            File::create(destination).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let mut buffer = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = response
                .read(&mut buffer)
                .map_err(|err| IngestError::Http(err.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
            total += n as u64;
        }
        Ok(total)
    }
}

impl Downloader for HttpDownloader {
    fn download_url(&self, url: &str, destination: &Path) -> Result<u64, IngestError> {
        let url = Self::normalize_url(url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| IngestError::Http(err.to_string()))?;
        self.write_response_to_file(&url, response, destination)
    }
}

/// Downloads `url` to `<destination>.gz`, decompresses it to `destination`,
/// removes the archive and registers the result keyed by its own path.
pub fn fetch_artifact<D, L>(
    ctx: &RunContext,
    downloader: &D,
    lineage: &L,
    url: &str,
    destination: &Utf8Path,
    sink: &dyn ProgressSink,
) -> Result<TrackedFile, IngestError>
where
    D: Downloader + ?Sized,
    L: LineageBackend + ?Sized,
{
    if let Some(dir) = destination.parent().filter(|dir| !dir.as_str().is_empty()) {
        if !dir.as_std_path().exists() {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| IngestError::Filesystem(format!("create {dir}: {err}")))?;
            sink.event(ProgressEvent {
                message: format!("phase=Prepare; created directory {dir}"),
                elapsed: None,
            });
        }
    }

    let archive = Utf8PathBuf::from(format!("{destination}.gz"));
    sink.event(ProgressEvent {
        message: format!("phase=Download; {url}"),
        elapsed: None,
    });
    let start = Instant::now();
    let bytes = downloader.download_url(url, archive.as_std_path())?;
    sink.event(ProgressEvent {
        message: format!("download.response bytes={bytes}"),
        elapsed: Some(start.elapsed()),
    });

    sink.event(ProgressEvent {
        message: format!("phase=Decompress; {archive}"),
        elapsed: None,
    });
    let written = fs_util::gunzip_file(archive.as_std_path(), destination.as_std_path())?;
    tracing::debug!(path = %destination, compressed = bytes, decompressed = written, "decompressed");
    fs::remove_file(archive.as_std_path())
        .map_err(|err| IngestError::Filesystem(format!("remove {archive}: {err}")))?;

    sink.event(ProgressEvent {
        message: format!("phase=Register; {destination}"),
        elapsed: None,
    });
    let tracked = TrackedFile::from_path(ctx, destination, destination.as_str())?;
    lineage.save_file(ctx, &tracked)?;
    Ok(tracked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftp_links_are_served_over_https() {
        assert_eq!(
            HttpDownloader::normalize_url(
                "ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE114nnn/GSE114802/suppl/x.gz"
            ),
            "https://ftp.ncbi.nlm.nih.gov/geo/series/GSE114nnn/GSE114802/suppl/x.gz"
        );
        assert_eq!(
            HttpDownloader::normalize_url("http://127.0.0.1:8080/x.gz"),
            "http://127.0.0.1:8080/x.gz"
        );
    }
}
