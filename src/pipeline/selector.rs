//! The declarative extraction rule language.
//!
//! A [`FieldSpec`] names a CSS selector, evaluated relative to the record
//! group, and a rule saying what to take from each matched element:
//!
//! | rule            | yields                                        |
//! |-----------------|-----------------------------------------------|
//! | `text`          | collapsed, trimmed element text               |
//! | `html`          | inner HTML                                    |
//! | `attr:<name>`   | attribute value (absent when missing)         |
//! | `const:<value>` | a literal, selector ignored                   |
//! | `source_url`    | URL of the document the record came from      |
//! | `regex`         | capture `group` of `pattern` over the text    |

use crate::error::ConfigError;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    /// `.` or empty selects the group root
    #[serde(default)]
    pub selector: String,
    #[serde(default = "default_rule")]
    pub rule: String,
    /// Pattern for the `regex` rule
    pub pattern: Option<String>,
    /// Capture group for the `regex` rule
    pub group: Option<usize>,
    /// Keep only one match; negative counts from the end
    pub nth: Option<i64>,
}

fn default_rule() -> String {
    "text".to_string()
}

/// Where a selector points inside a record group
#[derive(Debug, Clone)]
pub enum Target {
    Root,
    Css(Selector),
}

impl Target {
    pub fn parse(profile: &str, selector: &str) -> Result<Self, ConfigError> {
        let trimmed = selector.trim();
        if trimmed.is_empty() || trimmed == "." {
            return Ok(Target::Root);
        }
        parse_selector(profile, trimmed).map(Target::Css)
    }
}

pub fn parse_selector(profile: &str, selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::Selector {
        profile: profile.to_string(),
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

#[derive(Debug, Clone)]
pub enum ExtractRule {
    Text,
    Html,
    Attr(String),
    Const(String),
    SourceUrl,
    Regex { regex: Regex, group: usize },
}

impl ExtractRule {
    /// Rules that never look at the tree
    pub fn is_computed(&self) -> bool {
        matches!(self, ExtractRule::Const(_) | ExtractRule::SourceUrl)
    }
}

/// A FieldSpec with its selector parsed and rule resolved
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub target: Target,
    pub rule: ExtractRule,
    pub nth: Option<i64>,
}

impl FieldSpec {
    pub fn compile(&self, profile: &str) -> Result<CompiledField, ConfigError> {
        let rule = self.compile_rule(profile)?;
        let target = if rule.is_computed() {
            Target::Root
        } else {
            Target::parse(profile, &self.selector)?
        };
        if self.pattern.is_some() && !matches!(rule, ExtractRule::Regex { .. }) {
            return Err(self.error(profile, "`pattern` only applies to the regex rule"));
        }
        Ok(CompiledField {
            name: self.name.clone(),
            target,
            rule,
            nth: self.nth,
        })
    }

    fn compile_rule(&self, profile: &str) -> Result<ExtractRule, ConfigError> {
        let rule = self.rule.trim();
        if let Some(name) = rule.strip_prefix("attr:") {
            let name = name.trim();
            if name.is_empty() {
                return Err(self.error(profile, "attr rule needs an attribute name"));
            }
            return Ok(ExtractRule::Attr(name.to_ascii_lowercase()));
        }
        if let Some(value) = rule.strip_prefix("const:") {
            return Ok(ExtractRule::Const(value.to_string()));
        }
        match rule {
            "text" => Ok(ExtractRule::Text),
            "html" => Ok(ExtractRule::Html),
            "source_url" => Ok(ExtractRule::SourceUrl),
            "regex" => {
                let pattern = self
                    .pattern
                    .as_deref()
                    .ok_or_else(|| self.error(profile, "regex rule needs a `pattern`"))?;
                let regex = Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                    profile: profile.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })?;
                let group = self.group.unwrap_or(1);
                // group 0 is always valid; anything past the last group falls back to it
                let group = if group < regex.captures_len() { group } else { 0 };
                Ok(ExtractRule::Regex { regex, group })
            }
            other => Err(self.error(profile, &format!("unknown rule '{other}'"))),
        }
    }

    fn error(&self, profile: &str, message: &str) -> ConfigError {
        ConfigError::Profile {
            profile: profile.to_string(),
            message: format!("field '{}': {}", self.name, message),
        }
    }
}
