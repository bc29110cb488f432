//! Harvest pipeline: fetch, parse, extract, validate, aggregate.
//!
//! One invocation runs its stages in sequence and owns all of its state. The
//! fetch is the only suspension point; parsing through aggregation run in
//! synchronous helpers so no document tree is ever held across an await.

pub mod aggregate;
pub mod encoding;
pub mod extract;
pub mod fetch;
pub mod follow;
pub mod markup;
pub mod schema;
pub mod selector;
pub mod validate;

use crate::config::FetchConfig;
use crate::error::{ConfigError, PipelineError, Result};
use crate::registry::{Profile, ProfileRegistry};
use aggregate::{aggregate, AggregateOptions, Table};
use fetch::{Document, FetchLimits, FetchMeta, Fetcher, HttpFetcher};
use follow::FollowPlan;
use markup::{Html5Parser, MarkupParser, MeteredParser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validate::{validate, ValidatedRecord, ValidationFailure};

/// One harvest invocation as a caller describes it
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HarvestRequest {
    pub profile: String,
    /// Overrides the profile's own source
    pub source: Option<String>,
    #[serde(flatten)]
    pub aggregate: AggregateOptions,
    /// Overrides `fetch.timeout_secs`
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HarvestOutcome {
    pub run_id: Uuid,
    pub profile: String,
    pub source: String,
    /// Every document fetched: the source first, then followed pages
    pub documents: Vec<FetchMeta>,
    pub extracted: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub table: Table,
    pub failures: Vec<ValidationFailure>,
}

/// Records and failures from one or more documents
#[derive(Default)]
struct Batch {
    extracted: usize,
    records: Vec<ValidatedRecord>,
    failures: Vec<ValidationFailure>,
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn MarkupParser>,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>, parser: Arc<dyn MarkupParser>) -> Self {
        Self { fetcher, parser }
    }

    /// reqwest-backed fetcher with the metered html5ever parser
    pub fn from_config(config: &FetchConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(
            Arc::new(HttpFetcher::new(config)?),
            Arc::new(MeteredParser::new(Html5Parser)),
        ))
    }

    #[instrument(skip_all, fields(profile = %request.profile))]
    pub async fn run(
        &self,
        registry: &ProfileRegistry,
        request: &HarvestRequest,
        cancel: &CancellationToken,
    ) -> Result<HarvestOutcome> {
        let started = Instant::now();
        let result = self.run_inner(registry, request, cancel).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(PipelineError::Cancelled { .. }) => "cancelled",
            Err(_) => "error",
        };
        crate::metrics::harvest::finished(&request.profile, outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn run_inner(
        &self,
        registry: &ProfileRegistry,
        request: &HarvestRequest,
        cancel: &CancellationToken,
    ) -> Result<HarvestOutcome> {
        let profile = registry
            .get(&request.profile)
            .ok_or_else(|| PipelineError::UnknownProfile(request.profile.clone()))?;
        // malformed options fail before anything is fetched
        let plan = request.aggregate.resolve(&profile.schema)?;
        let source = request
            .source
            .clone()
            .or_else(|| profile.source.clone())
            .ok_or_else(|| PipelineError::MissingSource(profile.name.clone()))?;

        let mut limits = *registry.limits();
        if let Some(secs) = request.timeout_secs.filter(|s| *s > 0) {
            limits.timeout = Duration::from_secs(secs);
        }

        let run_id = Uuid::new_v4();
        info!(
            "harvest: start run={} profile={} source={} timeout_secs={}",
            run_id,
            profile.name,
            source,
            limits.timeout.as_secs()
        );

        let document = self.fetch(&source, &limits, cancel).await?;
        let mut documents = vec![document.meta()];
        let mut batch = Batch::default();

        match &profile.follow {
            None => self.process(profile, document, cancel, &mut batch)?,
            Some(follow) => {
                let links = self.follow_links(follow, document, cancel)?;
                info!("harvest: following {} link(s) from {}", links.len(), source);
                for link in links {
                    let page = self.fetch(&link, &limits, cancel).await?;
                    documents.push(page.meta());
                    self.process(profile, page, cancel, &mut batch)?;
                }
            }
        }

        checkpoint(cancel, "aggregate")?;
        let accepted = batch.records.len();
        let rejected = batch.failures.len();
        let table = aggregate(batch.records, &plan);

        info!(
            "harvest: done run={} profile={} documents={} extracted={} accepted={} rejected={}",
            run_id,
            profile.name,
            documents.len(),
            batch.extracted,
            accepted,
            rejected
        );
        Ok(HarvestOutcome {
            run_id,
            profile: profile.name.clone(),
            source,
            documents,
            extracted: batch.extracted,
            accepted,
            rejected,
            table,
            failures: batch.failures,
        })
    }

    async fn fetch(
        &self,
        source: &str,
        limits: &FetchLimits,
        cancel: &CancellationToken,
    ) -> Result<Document> {
        checkpoint(cancel, "fetch")?;
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("harvest: cancelled while fetching {}", source);
                Err(PipelineError::Cancelled { stage: "fetch" })
            }
            fetched = self.fetcher.fetch(source, limits) => Ok(fetched?),
        }
    }

    fn follow_links(
        &self,
        follow: &FollowPlan,
        document: Document,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        checkpoint(cancel, "parse")?;
        let tree = self.parser.parse(&document)?;
        Ok(follow.collect_links(&tree))
    }

    /// Parse one document and push each of its records through validation
    fn process(
        &self,
        profile: &Profile,
        document: Document,
        cancel: &CancellationToken,
        batch: &mut Batch,
    ) -> Result<()> {
        checkpoint(cancel, "parse")?;
        let tree = self.parser.parse(&document)?;
        drop(document);

        checkpoint(cancel, "extract")?;
        let (mut accepted, mut rejected) = (0, 0);
        let offset = batch.extracted;
        for mut raw in profile.plan.extract(&tree) {
            raw.index += offset;
            batch.extracted += 1;
            match validate(&raw, &profile.schema) {
                Ok(record) => {
                    accepted += 1;
                    batch.records.push(record);
                }
                Err(failure) => {
                    debug!(
                        "validate: rejected record index={} errors={}",
                        failure.index,
                        failure.errors.len()
                    );
                    rejected += 1;
                    batch.failures.push(failure);
                }
            }
        }

        crate::metrics::records::processed(&profile.name, accepted + rejected, accepted, rejected);
        info!(
            "extract: profile={} source={} records={} accepted={} rejected={}",
            profile.name,
            tree.source,
            accepted + rejected,
            accepted,
            rejected
        );
        Ok(())
    }
}

fn checkpoint(cancel: &CancellationToken, stage: &'static str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled { stage })
    } else {
        Ok(())
    }
}
