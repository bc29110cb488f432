//! Prometheus metrics for the harvest pipeline
//!
//! Each pipeline stage records through its own module so call sites read like
//! `metrics::fetch::success(..)`. Metric names are defined once in [`MetricName`].

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// All metric names used in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    FetchSuccess,
    FetchError,
    FetchDuration,
    FetchBytes,
    ParseDuration,
    ParseError,
    RecordsExtracted,
    RecordsAccepted,
    RecordsRejected,
    AggregateGroups,
    HarvestRuns,
    HarvestDuration,
    RegistryReloads,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FetchSuccess => "site_scraper_fetch_success_total",
            MetricName::FetchError => "site_scraper_fetch_error_total",
            MetricName::FetchDuration => "site_scraper_fetch_duration_seconds",
            MetricName::FetchBytes => "site_scraper_fetch_bytes",
            MetricName::ParseDuration => "site_scraper_parse_duration_seconds",
            MetricName::ParseError => "site_scraper_parse_error_total",
            MetricName::RecordsExtracted => "site_scraper_records_extracted_total",
            MetricName::RecordsAccepted => "site_scraper_records_accepted_total",
            MetricName::RecordsRejected => "site_scraper_records_rejected_total",
            MetricName::AggregateGroups => "site_scraper_aggregate_groups",
            MetricName::HarvestRuns => "site_scraper_harvest_runs_total",
            MetricName::HarvestDuration => "site_scraper_harvest_duration_seconds",
            MetricName::RegistryReloads => "site_scraper_registry_reloads_total",
        }
    }
}

/// Install the Prometheus recorder and return the handle used by `/metrics`.
pub fn init() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))
}

pub mod fetch {
    use super::MetricName;

    pub fn success(secs: f64, bytes: usize) {
        ::metrics::counter!(MetricName::FetchSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::FetchDuration.as_str()).record(secs);
        ::metrics::histogram!(MetricName::FetchBytes.as_str()).record(bytes as f64);
    }

    pub fn error(kind: &'static str) {
        ::metrics::counter!(MetricName::FetchError.as_str(), "kind" => kind).increment(1);
    }
}

pub mod parse {
    use super::MetricName;

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::ParseDuration.as_str()).record(secs);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::ParseError.as_str()).increment(1);
    }
}

pub mod records {
    use super::MetricName;

    /// Record the outcome of one document's extraction and validation
    pub fn processed(profile: &str, extracted: usize, accepted: usize, rejected: usize) {
        let profile = profile.to_string();
        ::metrics::counter!(MetricName::RecordsExtracted.as_str(), "profile" => profile.clone())
            .increment(extracted as u64);
        ::metrics::counter!(MetricName::RecordsAccepted.as_str(), "profile" => profile.clone())
            .increment(accepted as u64);
        ::metrics::counter!(MetricName::RecordsRejected.as_str(), "profile" => profile)
            .increment(rejected as u64);
    }
}

pub mod aggregate {
    use super::MetricName;

    pub fn groups(count: usize) {
        ::metrics::histogram!(MetricName::AggregateGroups.as_str()).record(count as f64);
    }
}

pub mod harvest {
    use super::MetricName;

    pub fn finished(profile: &str, outcome: &'static str, secs: f64) {
        ::metrics::counter!(
            MetricName::HarvestRuns.as_str(),
            "profile" => profile.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        ::metrics::histogram!(MetricName::HarvestDuration.as_str()).record(secs);
    }
}

pub mod registry {
    use super::MetricName;

    pub fn reloaded(ok: bool) {
        let outcome = if ok { "success" } else { "error" };
        ::metrics::counter!(MetricName::RegistryReloads.as_str(), "outcome" => outcome)
            .increment(1);
    }
}
