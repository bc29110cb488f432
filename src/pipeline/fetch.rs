use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError};
use crate::pipeline::encoding::{self, EncodingOrigin};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Markup dialect of a document, decided from the content type, file
/// extension, or a leading XML declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Html,
    Xml,
}

impl DocumentKind {
    pub fn detect(content_type: Option<&str>, location: &str, bytes: &[u8]) -> Self {
        if let Some(ct) = content_type {
            let base = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            if base.contains("html") {
                return DocumentKind::Html;
            }
            if base.ends_with("/xml") || base.ends_with("+xml") {
                return DocumentKind::Xml;
            }
        }
        let lower = location.to_ascii_lowercase();
        if [".xml", ".rss", ".atom"].iter().any(|ext| lower.ends_with(ext)) {
            return DocumentKind::Xml;
        }
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
        if head.trim_start_matches('\u{feff}').trim_start().starts_with("<?xml")
            && !head.to_ascii_lowercase().contains("<html")
        {
            return DocumentKind::Xml;
        }
        DocumentKind::Html
    }
}

/// A fetched resource. Immutable once built.
#[derive(Debug, Clone)]
pub struct Document {
    /// The identifier the caller asked for
    pub source: String,
    /// Resolved location (final URL after redirects, or a file:// URL)
    pub url: Option<Url>,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub kind: DocumentKind,
    pub encoding: &'static Encoding,
    pub encoding_origin: EncodingOrigin,
    pub status: Option<u16>,
    pub fetched_at: DateTime<Utc>,
    pub checksum: String,
}

impl Document {
    pub fn from_bytes(
        source: impl Into<String>,
        url: Option<Url>,
        bytes: Vec<u8>,
        content_type: Option<String>,
        status: Option<u16>,
        default_encoding: &'static Encoding,
    ) -> Self {
        let source = source.into();
        let location = url.as_ref().map(|u| u.path().to_string()).unwrap_or_else(|| source.clone());
        let kind = DocumentKind::detect(content_type.as_deref(), &location, &bytes);
        let detected = encoding::detect(&bytes, content_type.as_deref(), default_encoding);
        let checksum = {
            let mut h = Sha256::new();
            h.update(&bytes);
            hex::encode(h.finalize())
        };
        Self {
            source,
            url,
            bytes,
            content_type,
            kind,
            encoding: detected.encoding,
            encoding_origin: detected.origin,
            status,
            fetched_at: Utc::now(),
            checksum,
        }
    }

    /// Identifier used in records and logs: the resolved URL when known
    pub fn location(&self) -> String {
        self.url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| self.source.clone())
    }

    pub fn meta(&self) -> FetchMeta {
        FetchMeta {
            source: self.location(),
            status: self.status,
            content_type: self.content_type.clone(),
            kind: self.kind,
            encoding: self.encoding.name(),
            encoding_origin: self.encoding_origin,
            bytes: self.bytes.len(),
            checksum: self.checksum.clone(),
            fetched_at: self.fetched_at,
        }
    }
}

/// Serializable summary of a fetch, returned alongside harvest results
#[derive(Debug, Clone, Serialize)]
pub struct FetchMeta {
    pub source: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub kind: DocumentKind,
    pub encoding: &'static str,
    pub encoding_origin: EncodingOrigin,
    pub bytes: usize,
    pub checksum: String,
    pub fetched_at: DateTime<Utc>,
}

/// Where a source identifier points
#[derive(Debug, Clone, PartialEq)]
pub enum SourceLocation {
    Http(Url),
    File(PathBuf),
}

impl SourceLocation {
    pub fn parse(source: &str) -> Result<Self, FetchError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(invalid(source, "empty identifier"));
        }
        match Url::parse(trimmed) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(SourceLocation::Http(url)),
                "file" => url
                    .to_file_path()
                    .map(SourceLocation::File)
                    .map_err(|_| invalid(source, "file URL has no local path")),
                // single letters are Windows drive prefixes, not schemes
                scheme if scheme.len() == 1 => Ok(SourceLocation::File(PathBuf::from(trimmed))),
                scheme => Err(invalid(source, &format!("unsupported scheme '{scheme}'"))),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(SourceLocation::File(PathBuf::from(trimmed)))
            }
            Err(e) => Err(invalid(source, &e.to_string())),
        }
    }
}

fn invalid(source: &str, reason: &str) -> FetchError {
    FetchError::InvalidSource {
        source_id: source.to_string(),
        reason: reason.to_string(),
    }
}

/// Per-call fetch limits
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_body_bytes: u64,
    pub default_encoding: &'static Encoding,
}

impl FetchLimits {
    pub fn from_config(config: &FetchConfig) -> Result<Self, ConfigError> {
        let default_encoding = Encoding::for_label(config.default_encoding.as_bytes())
            .ok_or_else(|| {
                ConfigError::Setting(format!(
                    "fetch.default_encoding '{}' is not a known encoding",
                    config.default_encoding
                ))
            })?;
        Ok(Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_body_bytes: config.max_body_bytes,
            default_encoding,
        })
    }
}

/// Retrieves one document. Implementations perform exactly one read and never retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &str, limits: &FetchLimits) -> Result<Document, FetchError>;
}

/// Fetches `http(s)://` URLs with reqwest and `file://` URLs or paths from disk
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Setting(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, source: &str, url: Url, limits: &FetchLimits) -> Result<Document, FetchError> {
        let url_s = url.to_string();
        let timeout_error = || FetchError::Timeout {
            url: url_s.clone(),
            timeout_secs: limits.timeout.as_secs(),
        };
        let network_error = |e: reqwest::Error| {
            if e.is_timeout() {
                timeout_error()
            } else {
                FetchError::Network {
                    url: url_s.clone(),
                    message: e.to_string(),
                }
            }
        };

        let request = async {
            let mut resp = self
                .client
                .get(url.clone())
                .timeout(limits.timeout)
                .send()
                .await
                .map_err(network_error)?;
            let status = resp.status().as_u16();
            if !resp.status().is_success() {
                return Err(FetchError::Status {
                    url: url_s.clone(),
                    status,
                });
            }
            let final_url = resp.url().clone();
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let declared_len: Option<u64> = resp
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            if declared_len.is_some_and(|len| len > limits.max_body_bytes) {
                return Err(FetchError::TooLarge {
                    source_id: source.to_string(),
                    limit: limits.max_body_bytes,
                });
            }

            let mut bytes = Vec::new();
            while let Some(chunk) = resp.chunk().await.map_err(network_error)? {
                if (bytes.len() + chunk.len()) as u64 > limits.max_body_bytes {
                    return Err(FetchError::TooLarge {
                        source_id: source.to_string(),
                        limit: limits.max_body_bytes,
                    });
                }
                bytes.extend_from_slice(&chunk);
            }
            Ok(Document::from_bytes(
                source,
                Some(final_url),
                bytes,
                content_type,
                Some(status),
                limits.default_encoding,
            ))
        };

        tokio::time::timeout(limits.timeout, request)
            .await
            .map_err(|_| timeout_error())?
    }

    async fn fetch_file(&self, source: &str, path: PathBuf, limits: &FetchLimits) -> Result<Document, FetchError> {
        let io_error = |e: std::io::Error| FetchError::Io {
            path: path.display().to_string(),
            source: e,
        };
        let read = async {
            let meta = tokio::fs::metadata(&path).await.map_err(io_error)?;
            if meta.len() > limits.max_body_bytes {
                return Err(FetchError::TooLarge {
                    source_id: source.to_string(),
                    limit: limits.max_body_bytes,
                });
            }
            tokio::fs::read(&path).await.map_err(io_error)
        };
        let bytes = tokio::time::timeout(limits.timeout, read)
            .await
            .map_err(|_| FetchError::Timeout {
                url: source.to_string(),
                timeout_secs: limits.timeout.as_secs(),
            })??;
        Ok(Document::from_bytes(
            source,
            file_url(&path),
            bytes,
            None,
            None,
            limits.default_encoding,
        ))
    }
}

/// Absolute file:// URL for a path, so relative links inside the file can be resolved
fn file_url(path: &Path) -> Option<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Url::from_file_path(absolute).ok()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, limits), fields(timeout_secs = limits.timeout.as_secs()))]
    async fn fetch(&self, source: &str, limits: &FetchLimits) -> Result<Document, FetchError> {
        let started = Instant::now();
        let result = match SourceLocation::parse(source) {
            Ok(SourceLocation::Http(url)) => {
                debug!("fetch: GET {}", url);
                self.fetch_http(source, url, limits).await
            }
            Ok(SourceLocation::File(path)) => {
                debug!("fetch: reading {}", path.display());
                self.fetch_file(source, path, limits).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(doc) => {
                let secs = started.elapsed().as_secs_f64();
                crate::metrics::fetch::success(secs, doc.bytes.len());
                info!(
                    "fetch: ok source={} bytes={} encoding={} origin={:?} kind={:?} secs={:.3}",
                    doc.location(),
                    doc.bytes.len(),
                    doc.encoding.name(),
                    doc.encoding_origin,
                    doc.kind,
                    secs
                );
            }
            Err(e) => {
                crate::metrics::fetch::error(e.kind());
                warn!("fetch: failed source={} err={}", source, e);
            }
        }
        result
    }
}
