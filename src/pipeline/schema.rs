use crate::constants::LIST_CELL_SEPARATOR;
use crate::error::ConfigError;
use crate::pipeline::validate::check_value;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Url,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Url => "url",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Number)
    }
}

/// One field of a record schema as written in `[[profiles.schema]]`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub non_empty: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub exclusive_min: Option<f64>,
    pub exclusive_max: Option<f64>,
    pub one_of: Option<Vec<String>>,
    #[serde(default)]
    pub case_insensitive: bool,
    pub pattern: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub true_values: Option<Vec<String>>,
    pub false_values: Option<Vec<String>>,
}

/// Typed value of a validated field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(LIST_CELL_SEPARATOR)?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

/// Checks applied after a raw string has been coerced
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub non_empty: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub exclusive_min: Option<f64>,
    pub exclusive_max: Option<f64>,
    pub one_of: Option<Vec<String>>,
    pub case_insensitive: bool,
    pub pattern: Option<Regex>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<FieldValue>,
    pub multiple: bool,
    pub constraints: Constraints,
    pub true_values: Vec<String>,
    pub false_values: Vec<String>,
}

/// Compiled record schema; field order is declaration order
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: IndexMap<String, FieldRule>,
}

const TRUE_VALUES: [&str; 4] = ["true", "yes", "1", "on"];
const FALSE_VALUES: [&str; 4] = ["false", "no", "0", "off"];

impl Schema {
    pub fn compile(profile: &str, defs: &[FieldSchema]) -> Result<Self, ConfigError> {
        let mut fields = IndexMap::with_capacity(defs.len());
        for def in defs {
            let rule = compile_field(profile, def)?;
            if fields.insert(def.name.clone(), rule).is_some() {
                return Err(profile_error(profile, &def.name, "declared twice in schema"));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldRule> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&FieldRule> {
        self.fields.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn compile_field(profile: &str, def: &FieldSchema) -> Result<FieldRule, ConfigError> {
    let pattern = def
        .pattern
        .as_deref()
        .map(|p| {
            Regex::new(p).map_err(|source| ConfigError::Pattern {
                profile: profile.to_string(),
                pattern: p.to_string(),
                source,
            })
        })
        .transpose()?;

    let has_bounds = def.min.is_some()
        || def.max.is_some()
        || def.exclusive_min.is_some()
        || def.exclusive_max.is_some();
    if has_bounds && !def.field_type.is_numeric() {
        return Err(profile_error(
            profile,
            &def.name,
            &format!("numeric bounds on a {} field", def.field_type.as_str()),
        ));
    }
    if (def.true_values.is_some() || def.false_values.is_some())
        && def.field_type != FieldType::Boolean
    {
        return Err(profile_error(
            profile,
            &def.name,
            "true_values/false_values only apply to boolean fields",
        ));
    }
    if let (Some(min), Some(max)) = (def.min_length, def.max_length) {
        if min > max {
            return Err(profile_error(profile, &def.name, "min_length exceeds max_length"));
        }
    }

    // one side overridden alone keeps the built-in words for the other
    let lower = |values: &Option<Vec<String>>, fallback: &[&str]| -> Vec<String> {
        match values {
            Some(v) => v.iter().map(|s| s.to_lowercase()).collect(),
            None => fallback.iter().map(|s| s.to_string()).collect(),
        }
    };
    let mut rule = FieldRule {
        name: def.name.clone(),
        field_type: def.field_type,
        required: def.required,
        default: None,
        multiple: def.multiple,
        constraints: Constraints {
            non_empty: def.non_empty,
            min: def.min,
            max: def.max,
            exclusive_min: def.exclusive_min,
            exclusive_max: def.exclusive_max,
            one_of: def.one_of.clone(),
            case_insensitive: def.case_insensitive,
            pattern,
            min_length: def.min_length,
            max_length: def.max_length,
        },
        true_values: lower(&def.true_values, &TRUE_VALUES),
        false_values: lower(&def.false_values, &FALSE_VALUES),
    };

    if let Some(default) = &def.default {
        rule.default = Some(coerce_default(profile, &rule, default)?);
    }
    Ok(rule)
}

/// Defaults go through the same coercion and constraints as extracted values
fn coerce_default(
    profile: &str,
    rule: &FieldRule,
    default: &serde_json::Value,
) -> Result<FieldValue, ConfigError> {
    let as_text = |v: &serde_json::Value| -> Result<String, ConfigError> {
        match v {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::Bool(b) => Ok(b.to_string()),
            _ => Err(profile_error(profile, &rule.name, "default must be a scalar")),
        }
    };
    let check = |raw: String| {
        check_value(rule, &raw, None).map_err(|errors| {
            let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
            profile_error(
                profile,
                &rule.name,
                &format!("invalid default: {}", messages.join("; ")),
            )
        })
    };

    match default {
        serde_json::Value::Array(items) if rule.multiple => items
            .iter()
            .map(|item| as_text(item).and_then(&check))
            .collect::<Result<Vec<_>, _>>()
            .map(FieldValue::List),
        serde_json::Value::Array(_) => Err(profile_error(
            profile,
            &rule.name,
            "list default on a field that is not multiple",
        )),
        scalar => {
            let value = as_text(scalar).and_then(&check)?;
            Ok(if rule.multiple {
                FieldValue::List(vec![value])
            } else {
                value
            })
        }
    }
}

fn profile_error(profile: &str, field: &str, message: &str) -> ConfigError {
    ConfigError::Profile {
        profile: profile.to_string(),
        message: format!("schema field '{}': {}", field, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(toml_src: &str) -> FieldSchema {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_defaults_are_coerced() {
        let schema = Schema::compile(
            "p",
            &[
                def("name = \"qty\"\ntype = \"integer\"\ndefault = 1"),
                def("name = \"in_stock\"\ntype = \"boolean\"\ndefault = \"yes\""),
                def("name = \"tags\"\nmultiple = true\ndefault = [\"a\", \"b\"]"),
            ],
        )
        .unwrap();
        assert_eq!(schema.field("qty").unwrap().default, Some(FieldValue::Integer(1)));
        assert_eq!(
            schema.field("in_stock").unwrap().default,
            Some(FieldValue::Boolean(true))
        );
        assert_eq!(
            schema.field("tags").unwrap().default,
            Some(FieldValue::List(vec![
                FieldValue::Text("a".into()),
                FieldValue::Text("b".into())
            ]))
        );
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["qty", "in_stock", "tags"]);
    }

    #[test]
    fn test_invalid_default_is_a_config_error() {
        let result = Schema::compile("p", &[def("name = \"qty\"\ntype = \"integer\"\ndefault = \"many\"")]);
        assert!(matches!(result, Err(ConfigError::Profile { .. })));

        let result = Schema::compile(
            "p",
            &[def("name = \"price\"\ntype = \"number\"\nmin = 1\ndefault = 0")],
        );
        assert!(matches!(result, Err(ConfigError::Profile { .. })));
    }

    #[test]
    fn test_schema_shape_errors() {
        let dup = Schema::compile("p", &[def("name = \"a\""), def("name = \"a\"")]);
        assert!(matches!(dup, Err(ConfigError::Profile { .. })));

        let bounds = Schema::compile("p", &[def("name = \"a\"\nmin = 3")]);
        assert!(matches!(bounds, Err(ConfigError::Profile { .. })));

        let pattern = Schema::compile("p", &[def("name = \"a\"\npattern = \"[\"")]);
        assert!(matches!(pattern, Err(ConfigError::Pattern { .. })));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<FieldSchema, _> = toml::from_str("name = \"a\"\ntype = \"date\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::Null.to_string(), "");
        assert_eq!(FieldValue::Number(45.0).to_string(), "45");
        assert_eq!(FieldValue::Number(19.99).to_string(), "19.99");
        assert_eq!(
            FieldValue::List(vec![FieldValue::Integer(1), FieldValue::Text("x".into())]).to_string(),
            "1|x"
        );
    }
}
