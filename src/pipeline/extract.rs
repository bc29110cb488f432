use crate::error::ConfigError;
use crate::pipeline::markup::ParsedTree;
use crate::pipeline::selector::{parse_selector, CompiledField, ExtractRule, FieldSpec, Target};
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Untyped value of one field. `Absent` is an extraction gap, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Absent,
    Single(String),
    List(Vec<String>),
}

impl RawValue {
    fn from_values(mut values: Vec<String>) -> Self {
        match values.len() {
            0 => RawValue::Absent,
            1 => RawValue::Single(values.remove(0)),
            _ => RawValue::List(values),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RawValue::Absent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Position of the record group in document order
    pub index: usize,
    /// Document the record came from
    pub source: Arc<str>,
    pub fields: IndexMap<String, RawValue>,
}

impl RawRecord {
    pub fn get(&self, field: &str) -> &RawValue {
        self.fields.get(field).unwrap_or(&RawValue::Absent)
    }
}

/// Collapse runs of whitespace to one space and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Compiled record boundary and field rules of one profile
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    record: Selector,
    text_matches: Option<Regex>,
    fields: Vec<CompiledField>,
}

impl ExtractionPlan {
    pub fn compile(
        profile: &str,
        record: &str,
        text_matches: Option<&str>,
        fields: &[FieldSpec],
    ) -> Result<Self, ConfigError> {
        let record = parse_selector(profile, record.trim())?;
        let text_matches = text_matches.map(|p| case_insensitive(profile, p)).transpose()?;

        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(fields.len());
        for spec in fields {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::Profile {
                    profile: profile.to_string(),
                    message: format!("field '{}' is declared twice", spec.name),
                });
            }
            compiled.push(spec.compile(profile)?);
        }

        Ok(Self {
            record,
            text_matches,
            fields: compiled,
        })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Lazily walk the record groups of `tree` in document order
    pub fn extract<'a>(&'a self, tree: &'a ParsedTree) -> RecordIter<'a> {
        let groups = tree.html.select(&self.record);
        RecordIter {
            plan: self,
            groups: Box::new(groups),
            source: Arc::from(tree.source.as_str()),
            next_index: 0,
        }
    }

    fn matches_text(&self, group: ElementRef<'_>) -> bool {
        match &self.text_matches {
            Some(regex) => regex.is_match(&element_text(group)),
            None => true,
        }
    }

    fn extract_group(&self, group: ElementRef<'_>, index: usize, source: &Arc<str>) -> RawRecord {
        let fields = self
            .fields
            .iter()
            .map(|field| (field.name.clone(), extract_field(field, group, source)))
            .collect();
        RawRecord {
            index,
            source: Arc::clone(source),
            fields,
        }
    }
}

pub fn case_insensitive(profile: &str, pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::Pattern {
            profile: profile.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}

/// Lazy, finite, single-pass sequence of raw records
pub struct RecordIter<'a> {
    plan: &'a ExtractionPlan,
    groups: Box<dyn Iterator<Item = ElementRef<'a>> + 'a>,
    source: Arc<str>,
    next_index: usize,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let plan = self.plan;
        let group = self.groups.by_ref().find(|g| plan.matches_text(*g))?;
        let index = self.next_index;
        self.next_index += 1;
        Some(plan.extract_group(group, index, &self.source))
    }
}

fn extract_field(field: &CompiledField, group: ElementRef<'_>, source: &Arc<str>) -> RawValue {
    match &field.rule {
        ExtractRule::Const(value) => return RawValue::Single(value.clone()),
        ExtractRule::SourceUrl => return RawValue::Single(source.to_string()),
        _ => {}
    }

    let mut matched: Vec<ElementRef<'_>> = match &field.target {
        Target::Root => vec![group],
        Target::Css(selector) => group.select(selector).collect(),
    };
    if let Some(nth) = field.nth {
        matched = pick(matched, nth).into_iter().collect();
    }

    let values = matched
        .into_iter()
        .filter_map(|element| apply_rule(&field.rule, element))
        .collect();
    RawValue::from_values(values)
}

fn pick<T>(mut items: Vec<T>, nth: i64) -> Option<T> {
    let len = items.len() as i64;
    let position = if nth < 0 { len + nth } else { nth };
    if (0..len).contains(&position) {
        Some(items.swap_remove(position as usize))
    } else {
        None
    }
}

fn apply_rule(rule: &ExtractRule, element: ElementRef<'_>) -> Option<String> {
    match rule {
        ExtractRule::Text => Some(element_text(element)),
        ExtractRule::Html => Some(element.inner_html().trim().to_string()),
        ExtractRule::Attr(name) => element.value().attr(name).map(|v| v.to_string()),
        ExtractRule::Regex { regex, group } => {
            let text = element_text(element);
            let caps = regex.captures(&text)?;
            caps.get(*group)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        }
        ExtractRule::Const(value) => Some(value.clone()),
        ExtractRule::SourceUrl => None,
    }
}
