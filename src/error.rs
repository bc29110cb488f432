use thiserror::Error;

/// Failures while retrieving a document. Fatal for the invocation, never retried.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid source '{source_id}': {reason}")]
    InvalidSource { source_id: String, reason: String },

    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Body of {source_id} exceeds {limit} bytes")]
    TooLarge { source_id: String, limit: u64 },
}

impl FetchError {
    /// Short machine-readable label used for metrics and API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidSource { .. } => "invalid_source",
            FetchError::Timeout { .. } => "timeout",
            FetchError::Status { .. } => "status",
            FetchError::Network { .. } => "network",
            FetchError::Io { .. } => "io",
            FetchError::TooLarge { .. } => "too_large",
        }
    }
}

/// The byte stream could not be turned into a tree.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Document {source_id} cannot be decoded as any of: {tried}")]
    Undecodable { source_id: String, tried: String },
}

/// Problems found while loading or compiling profiles.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Profile '{profile}': invalid selector '{selector}': {message}")]
    Selector {
        profile: String,
        selector: String,
        message: String,
    },

    #[error("Profile '{profile}': invalid pattern '{pattern}': {source}")]
    Pattern {
        profile: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Profile '{profile}': {message}")]
    Profile { profile: String, message: String },

    #[error("Duplicate profile name: {0}")]
    DuplicateProfile(String),

    #[error("Invalid setting: {0}")]
    Setting(String),
}

/// Malformed aggregation options. Reported before any record is processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("Unknown field '{field}' in {option}")]
    UnknownField { option: &'static str, field: String },

    #[error("Field '{0}' cannot be both grouped and summarised")]
    GroupedSummary(String),

    #[error("Field '{0}' appears more than once in group_by")]
    DuplicateGroupField(String),

    #[error("Summary '{summary}' needs a numeric field, '{field}' is {field_type}")]
    NonNumericSummary {
        field: String,
        summary: &'static str,
        field_type: &'static str,
    },

    #[error("Unknown summary '{0}' (expected count, sum, min, max or distinct_count)")]
    UnknownSummary(String),
}

/// Everything that can abort a harvest invocation.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("No source given and profile '{0}' declares none")]
    MissingSource(String),

    #[error("Invocation cancelled before {stage}")]
    Cancelled { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
