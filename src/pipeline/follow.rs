use crate::error::ConfigError;
use crate::pipeline::extract::{case_insensitive, collapse_whitespace};
use crate::pipeline::markup::ParsedTree;
use crate::pipeline::selector::parse_selector;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Link-following rule: records are extracted from the pages the index links to
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FollowSpec {
    pub selector: String,
    #[serde(default = "default_attribute")]
    pub attribute: String,
    pub text_matches: Option<String>,
    pub limit: Option<usize>,
}

fn default_attribute() -> String {
    "href".to_string()
}

#[derive(Debug, Clone)]
pub struct FollowPlan {
    selector: Selector,
    attribute: String,
    text_matches: Option<Regex>,
    limit: Option<usize>,
}

impl FollowSpec {
    pub fn compile(&self, profile: &str) -> Result<FollowPlan, ConfigError> {
        if self.limit == Some(0) {
            return Err(ConfigError::Profile {
                profile: profile.to_string(),
                message: "follow.limit must be at least 1".to_string(),
            });
        }
        Ok(FollowPlan {
            selector: parse_selector(profile, self.selector.trim())?,
            attribute: self.attribute.trim().to_ascii_lowercase(),
            text_matches: self
                .text_matches
                .as_deref()
                .map(|p| case_insensitive(profile, p))
                .transpose()?,
            limit: self.limit,
        })
    }
}

impl FollowPlan {
    /// Link targets in document order, resolved and deduplicated
    pub fn collect_links(&self, tree: &ParsedTree) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for element in tree.html.select(&self.selector) {
            if let Some(regex) = &self.text_matches {
                let text = collapse_whitespace(&element.text().collect::<String>());
                if !regex.is_match(&text) {
                    continue;
                }
            }
            let Some(raw) = element.value().attr(&self.attribute) else {
                continue;
            };
            let Some(target) = resolve(tree.url.as_ref(), raw) else {
                debug!("follow: skipping unusable link '{}'", raw);
                continue;
            };
            if seen.insert(target.clone()) {
                links.push(target);
            }
            if self.limit.is_some_and(|limit| links.len() >= limit) {
                break;
            }
        }
        links
    }
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    // local files are reachable only from a page that is itself a local file
    let allowed = match url.scheme() {
        "http" | "https" => true,
        "file" => base.is_some_and(|b| b.scheme() == "file"),
        _ => false,
    };
    if !allowed {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}
