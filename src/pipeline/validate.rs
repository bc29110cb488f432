//! Coercion of raw records into typed records.
//!
//! Every field of the schema is visited and every error is collected before
//! the record is accepted or rejected, so one failure lists all its problems.

use crate::pipeline::extract::{RawRecord, RawValue};
use crate::pipeline::schema::{FieldRule, FieldType, FieldValue, Schema};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use url::Url;

static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?[0-9]+$").expect("integer pattern"));

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?$")
        .expect("number pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    Missing,
    MultipleValues,
    InvalidType,
    Empty,
    OutOfRange,
    NotAllowed,
    PatternMismatch,
    Length,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
    /// The raw value that failed
    pub value: RawValue,
}

impl FieldError {
    fn new(rule: &FieldRule, kind: FieldErrorKind, message: String, value: RawValue) -> Self {
        Self {
            field: rule.name.clone(),
            kind,
            message,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFailure {
    pub index: usize,
    pub source: Arc<str>,
    pub errors: Vec<FieldError>,
}

/// A record holding exactly the schema's fields, in declaration order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRecord {
    #[serde(skip)]
    pub index: usize,
    #[serde(skip)]
    pub source: Arc<str>,
    #[serde(flatten)]
    pub values: IndexMap<String, FieldValue>,
}

impl ValidatedRecord {
    pub fn get(&self, field: &str) -> &FieldValue {
        self.values.get(field).unwrap_or(&FieldValue::Null)
    }
}

pub fn validate(raw: &RawRecord, schema: &Schema) -> Result<ValidatedRecord, ValidationFailure> {
    let base = Url::parse(&raw.source).ok();
    let mut values = IndexMap::with_capacity(schema.len());
    let mut errors = Vec::new();

    for rule in schema.fields() {
        match validate_field(rule, raw.get(&rule.name), base.as_ref()) {
            Ok(value) => {
                values.insert(rule.name.clone(), value);
            }
            Err(mut field_errors) => errors.append(&mut field_errors),
        }
    }

    if errors.is_empty() {
        Ok(ValidatedRecord {
            index: raw.index,
            source: Arc::clone(&raw.source),
            values,
        })
    } else {
        Err(ValidationFailure {
            index: raw.index,
            source: Arc::clone(&raw.source),
            errors,
        })
    }
}

fn validate_field(
    rule: &FieldRule,
    raw: &RawValue,
    base: Option<&Url>,
) -> Result<FieldValue, Vec<FieldError>> {
    match raw {
        RawValue::Absent => match (&rule.default, rule.required) {
            (Some(default), _) => Ok(default.clone()),
            (None, true) => Err(vec![FieldError::new(
                rule,
                FieldErrorKind::Missing,
                format!("required field '{}' is missing", rule.name),
                RawValue::Absent,
            )]),
            (None, false) => Ok(FieldValue::Null),
        },
        RawValue::List(items) if !rule.multiple => Err(vec![FieldError::new(
            rule,
            FieldErrorKind::MultipleValues,
            format!("expected one value, found {}", items.len()),
            raw.clone(),
        )]),
        RawValue::List(items) => check_all(rule, items, base),
        RawValue::Single(s) if rule.multiple => check_all(rule, std::slice::from_ref(s), base),
        RawValue::Single(s) => check_value(rule, s, base),
    }
}

fn check_all(
    rule: &FieldRule,
    items: &[String],
    base: Option<&Url>,
) -> Result<FieldValue, Vec<FieldError>> {
    let mut values = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for item in items {
        match check_value(rule, item, base) {
            Ok(v) => values.push(v),
            Err(mut e) => errors.append(&mut e),
        }
    }
    if errors.is_empty() {
        Ok(FieldValue::List(values))
    } else {
        Err(errors)
    }
}

/// Coerce one raw string by the field's type, then apply its constraints
pub(crate) fn check_value(
    rule: &FieldRule,
    raw: &str,
    base: Option<&Url>,
) -> Result<FieldValue, Vec<FieldError>> {
    let value = coerce(rule, raw, base).map_err(|message| {
        vec![FieldError::new(
            rule,
            FieldErrorKind::InvalidType,
            message,
            RawValue::Single(raw.to_string()),
        )]
    })?;

    let errors = constraint_errors(rule, raw, &value);
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

fn coerce(rule: &FieldRule, raw: &str, base: Option<&Url>) -> Result<FieldValue, String> {
    match rule.field_type {
        FieldType::String => Ok(FieldValue::Text(raw.to_string())),
        FieldType::Integer => {
            if !INTEGER.is_match(raw) {
                return Err(format!("'{}' is not an integer", raw));
            }
            raw.parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| format!("'{}' is out of integer range", raw))
        }
        FieldType::Number => {
            if !NUMBER.is_match(raw) {
                return Err(format!("'{}' is not a number", raw));
            }
            match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(FieldValue::Number(n)),
                _ => Err(format!("'{}' is out of number range", raw)),
            }
        }
        FieldType::Boolean => {
            let lowered = raw.to_lowercase();
            if rule.true_values.contains(&lowered) {
                Ok(FieldValue::Boolean(true))
            } else if rule.false_values.contains(&lowered) {
                Ok(FieldValue::Boolean(false))
            } else {
                Err(format!("'{}' is not a boolean", raw))
            }
        }
        FieldType::Url => {
            let parsed = match Url::parse(raw) {
                Ok(url) => Ok(url),
                Err(url::ParseError::RelativeUrlWithoutBase) => match base {
                    Some(base) => base.join(raw).map_err(|e| e.to_string()),
                    None => Err("relative URL with no base".to_string()),
                },
                Err(e) => Err(e.to_string()),
            };
            parsed
                .map(|url| FieldValue::Text(url.to_string()))
                .map_err(|e| format!("'{}' is not a URL: {}", raw, e))
        }
    }
}

fn constraint_errors(rule: &FieldRule, raw: &str, value: &FieldValue) -> Vec<FieldError> {
    let c = &rule.constraints;
    let mut errors = Vec::new();
    let mut fail = |kind: FieldErrorKind, message: String| {
        errors.push(FieldError::new(rule, kind, message, RawValue::Single(raw.to_string())));
    };

    if c.non_empty && raw.trim().is_empty() {
        fail(FieldErrorKind::Empty, "value is empty".to_string());
    }

    let length = raw.chars().count();
    if let Some(min) = c.min_length {
        if length < min {
            fail(
                FieldErrorKind::Length,
                format!("length {} is below the minimum of {}", length, min),
            );
        }
    }
    if let Some(max) = c.max_length {
        if length > max {
            fail(
                FieldErrorKind::Length,
                format!("length {} is above the maximum of {}", length, max),
            );
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = c.min.filter(|min| n < *min) {
            fail(FieldErrorKind::OutOfRange, format!("{} is less than {}", n, min));
        }
        if let Some(max) = c.max.filter(|max| n > *max) {
            fail(FieldErrorKind::OutOfRange, format!("{} is greater than {}", n, max));
        }
        if let Some(min) = c.exclusive_min.filter(|min| n <= *min) {
            fail(FieldErrorKind::OutOfRange, format!("{} must be greater than {}", n, min));
        }
        if let Some(max) = c.exclusive_max.filter(|max| n >= *max) {
            fail(FieldErrorKind::OutOfRange, format!("{} must be less than {}", n, max));
        }
    }

    if let Some(allowed) = &c.one_of {
        let found = if c.case_insensitive {
            let lowered = raw.to_lowercase();
            allowed.iter().any(|a| a.to_lowercase() == lowered)
        } else {
            allowed.iter().any(|a| a == raw)
        };
        if !found {
            fail(
                FieldErrorKind::NotAllowed,
                format!("'{}' is not one of [{}]", raw, allowed.join(", ")),
            );
        }
    }

    if let Some(pattern) = &c.pattern {
        if !pattern.is_match(raw) {
            fail(
                FieldErrorKind::PatternMismatch,
                format!("'{}' does not match /{}/", raw, pattern.as_str()),
            );
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::FieldSchema;

    fn schema(toml_src: &str) -> Schema {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            schema: Vec<FieldSchema>,
        }
        let w: Wrapper = toml::from_str(toml_src).unwrap();
        Schema::compile("test", &w.schema).unwrap()
    }

    fn record(fields: &[(&str, RawValue)]) -> RawRecord {
        RawRecord {
            index: 0,
            source: Arc::from("https://example.com/catalog/"),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn single(s: &str) -> RawValue {
        RawValue::Single(s.to_string())
    }

    #[test]
    fn test_integer_and_number_syntax() {
        let s = schema(
            r#"
            [[schema]]
            name = "qty"
            type = "integer"
            [[schema]]
            name = "price"
            type = "number"
            "#,
        );
        let ok = validate(&record(&[("qty", single("+12")), ("price", single("1.5e2"))]), &s).unwrap();
        assert_eq!(ok.get("qty"), &FieldValue::Integer(12));
        assert_eq!(ok.get("price"), &FieldValue::Number(150.0));

        for (qty, price) in [("1,000", "1.0"), ("12", "1,5"), (" 12", "2"), ("1.0", "3")] {
            let failure =
                validate(&record(&[("qty", single(qty)), ("price", single(price))]), &s).unwrap_err();
            assert!(failure
                .errors
                .iter()
                .all(|e| e.kind == FieldErrorKind::InvalidType));
        }
    }

    #[test]
    fn test_all_errors_are_accumulated() {
        let s = schema(
            r#"
            [[schema]]
            name = "name"
            required = true
            [[schema]]
            name = "price"
            type = "number"
            exclusive_min = 0
            [[schema]]
            name = "code"
            pattern = "^[A-Z]{3}$"
            "#,
        );
        let failure = validate(
            &record(&[("price", single("-3")), ("code", single("ab"))]),
            &s,
        )
        .unwrap_err();
        let kinds: Vec<FieldErrorKind> = failure.errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FieldErrorKind::Missing,
                FieldErrorKind::OutOfRange,
                FieldErrorKind::PatternMismatch
            ]
        );
        assert_eq!(failure.errors[1].field, "price");
        assert_eq!(failure.errors[1].value, single("-3"));
    }

    #[test]
    fn test_absent_fields_take_default_or_null() {
        let s = schema(
            r#"
            [[schema]]
            name = "currency"
            default = "XOF"
            [[schema]]
            name = "note"
            [[schema]]
            name = "title"
            "#,
        );
        let ok = validate(&record(&[("title", single("Basilique"))]), &s).unwrap();
        let keys: Vec<&str> = ok.values.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["currency", "note", "title"]);
        assert_eq!(ok.get("currency"), &FieldValue::Text("XOF".into()));
        assert_eq!(ok.get("note"), &FieldValue::Null);
    }

    #[test]
    fn test_multiple_values() {
        let s = schema(
            r#"
            [[schema]]
            name = "tags"
            multiple = true
            [[schema]]
            name = "title"
            "#,
        );
        let list = RawValue::List(vec!["a".into(), "b".into()]);
        let failure = validate(&record(&[("title", list.clone())]), &s).unwrap_err();
        assert_eq!(failure.errors[0].kind, FieldErrorKind::MultipleValues);

        let ok = validate(&record(&[("tags", single("solo"))]), &s).unwrap();
        assert_eq!(
            ok.get("tags"),
            &FieldValue::List(vec![FieldValue::Text("solo".into())])
        );
        let ok = validate(&record(&[("tags", list)]), &s).unwrap();
        assert!(matches!(ok.get("tags"), FieldValue::List(items) if items.len() == 2));
    }

    #[test]
    fn test_booleans() {
        let s = schema(
            r#"
            [[schema]]
            name = "open"
            type = "boolean"
            [[schema]]
            name = "stock"
            type = "boolean"
            true_values = ["En stock"]
            false_values = ["Rupture"]
            "#,
        );
        let ok = validate(&record(&[("open", single("ON")), ("stock", single("en stock"))]), &s).unwrap();
        assert_eq!(ok.get("open"), &FieldValue::Boolean(true));
        assert_eq!(ok.get("stock"), &FieldValue::Boolean(true));

        let failure = validate(&record(&[("stock", single("yes"))]), &s).unwrap_err();
        assert_eq!(failure.errors[0].field, "stock");
    }

    #[test]
    fn test_one_of_case_handling() {
        let s = schema(
            r#"
            [[schema]]
            name = "strict"
            one_of = ["Abidjan", "Bouaké"]
            [[schema]]
            name = "loose"
            one_of = ["Abidjan", "Bouaké"]
            case_insensitive = true
            "#,
        );
        let failure =
            validate(&record(&[("strict", single("abidjan")), ("loose", single("BOUAKÉ"))]), &s)
                .unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].field, "strict");
        assert_eq!(failure.errors[0].kind, FieldErrorKind::NotAllowed);
    }

    #[test]
    fn test_urls_resolve_against_source() {
        let s = schema(
            r#"
            [[schema]]
            name = "image"
            type = "url"
            "#,
        );
        let ok = validate(&record(&[("image", single("../img/a.png"))]), &s).unwrap();
        assert_eq!(
            ok.get("image"),
            &FieldValue::Text("https://example.com/img/a.png".into())
        );
    }

    #[test]
    fn test_non_empty_and_length() {
        let s = schema(
            r#"
            [[schema]]
            name = "title"
            non_empty = true
            max_length = 5
            "#,
        );
        let failure = validate(&record(&[("title", single(""))]), &s).unwrap_err();
        assert_eq!(failure.errors[0].kind, FieldErrorKind::Empty);
        let failure = validate(&record(&[("title", single("toolong"))]), &s).unwrap_err();
        assert_eq!(failure.errors[0].kind, FieldErrorKind::Length);
    }
}
