/// Default values and environment variable names shared across the crate

// Environment variables
pub const CONFIG_PATH_ENV: &str = "SITE_SCRAPER_CONFIG";
pub const BIND_ADDR_ENV: &str = "SITE_SCRAPER_BIND";

// Defaults (used when config.toml leaves a setting out)
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_ENCODING: &str = "utf-8";
pub const DEFAULT_USER_AGENT: &str = concat!("site_scraper/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_PREFIX: &str = "site_scraper.log";

/// How many leading bytes are scanned for an in-document charset declaration
pub const ENCODING_PRESCAN_BYTES: usize = 1024;

/// Separator used when a list value is flattened into a single CSV cell
pub const LIST_CELL_SEPARATOR: &str = "|";
