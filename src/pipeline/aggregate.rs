use crate::error::AggregationError;
use crate::pipeline::schema::{FieldType, FieldValue, Schema};
use crate::pipeline::validate::ValidatedRecord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// One output row: column name to value, in column order
pub type Row = IndexMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    Count,
    Sum,
    Min,
    Max,
    DistinctCount,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryKind::Count => "count",
            SummaryKind::Sum => "sum",
            SummaryKind::Min => "min",
            SummaryKind::Max => "max",
            SummaryKind::DistinctCount => "distinct_count",
        }
    }

    fn needs_numeric(&self) -> bool {
        matches!(self, SummaryKind::Sum | SummaryKind::Min | SummaryKind::Max)
    }
}

impl FromStr for SummaryKind {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(SummaryKind::Count),
            "sum" => Ok(SummaryKind::Sum),
            "min" => Ok(SummaryKind::Min),
            "max" => Ok(SummaryKind::Max),
            "distinct_count" | "distinct-count" => Ok(SummaryKind::DistinctCount),
            _ => Err(AggregationError::UnknownSummary(s.to_string())),
        }
    }
}

/// Aggregation options as a caller writes them
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregateOptions {
    pub columns: Option<Vec<String>>,
    pub group_by: Vec<String>,
    pub summaries: IndexMap<String, String>,
}

/// Options checked against a schema
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    pub columns: Vec<String>,
    pub group_by: Vec<String>,
    pub summaries: Vec<Summary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub field: String,
    pub kind: SummaryKind,
    pub field_type: FieldType,
}

impl Summary {
    pub fn column(&self) -> String {
        format!("{}_{}", self.field, self.kind.as_str())
    }
}

impl AggregateOptions {
    pub fn resolve(&self, schema: &Schema) -> Result<AggregatePlan, AggregationError> {
        let known = |option: &'static str, field: &str| {
            schema
                .field(field)
                .ok_or_else(|| AggregationError::UnknownField {
                    option,
                    field: field.to_string(),
                })
        };

        let columns = match &self.columns {
            Some(requested) => {
                let mut columns: Vec<String> = Vec::with_capacity(requested.len());
                for column in requested {
                    known("columns", column)?;
                    if !columns.contains(column) {
                        columns.push(column.clone());
                    }
                }
                columns
            }
            None => schema.names().map(|n| n.to_string()).collect(),
        };

        let mut group_by: Vec<String> = Vec::with_capacity(self.group_by.len());
        for field in &self.group_by {
            known("group_by", field)?;
            if group_by.contains(field) {
                return Err(AggregationError::DuplicateGroupField(field.clone()));
            }
            group_by.push(field.clone());
        }

        let mut summaries = Vec::with_capacity(self.summaries.len());
        for (field, kind) in &self.summaries {
            let kind: SummaryKind = kind.parse()?;
            let rule = known("summaries", field)?;
            if group_by.contains(field) {
                return Err(AggregationError::GroupedSummary(field.clone()));
            }
            if kind.needs_numeric() && !rule.field_type.is_numeric() {
                return Err(AggregationError::NonNumericSummary {
                    field: field.clone(),
                    summary: kind.as_str(),
                    field_type: rule.field_type.as_str(),
                });
            }
            summaries.push(Summary {
                field: field.clone(),
                kind,
                field_type: rule.field_type,
            });
        }

        Ok(AggregatePlan {
            columns,
            group_by,
            summaries,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub key: Row,
    pub summaries: Row,
    pub records: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableBody {
    Records(Vec<Row>),
    Groups(Vec<Group>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub summary_columns: Vec<String>,
    #[serde(flatten)]
    pub body: TableBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<Row>,
}

/// On-demand statistics over one projected column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: usize,
    pub non_null: usize,
    pub sum: Option<f64>,
    pub min: FieldValue,
    pub max: FieldValue,
    pub distinct: usize,
}

impl Table {
    pub fn is_grouped(&self) -> bool {
        matches!(self.body, TableBody::Groups(_))
    }

    /// Flat rows: the records, or one row per group holding key and summary columns
    pub fn rows(&self) -> Vec<Row> {
        match &self.body {
            TableBody::Records(rows) => rows.clone(),
            TableBody::Groups(groups) => groups
                .iter()
                .map(|g| {
                    let mut row = g.key.clone();
                    row.extend(g.summaries.iter().map(|(k, v)| (k.clone(), v.clone())));
                    row
                })
                .collect(),
        }
    }

    /// Number of member records, whether grouped or not
    pub fn record_count(&self) -> usize {
        match &self.body {
            TableBody::Records(rows) => rows.len(),
            TableBody::Groups(groups) => groups.iter().map(|g| g.records.len()).sum(),
        }
    }

    pub fn column_stats(&self, column: &str) -> Option<ColumnStats> {
        if !self.columns.iter().any(|c| c == column) {
            return None;
        }
        let records: Vec<&Row> = match &self.body {
            TableBody::Records(rows) => rows.iter().collect(),
            TableBody::Groups(groups) => groups.iter().flat_map(|g| g.records.iter()).collect(),
        };
        let values: Vec<&FieldValue> = records
            .iter()
            .map(|r| r.get(column).unwrap_or(&FieldValue::Null))
            .collect();
        let numbers: Vec<f64> = scalars(&values).filter_map(|v| v.as_f64()).collect();

        Some(ColumnStats {
            count: values.len(),
            non_null: values.iter().filter(|v| !v.is_null()).count(),
            sum: if numbers.is_empty() {
                None
            } else {
                Some(numbers.iter().sum())
            },
            min: extreme(&values, std::cmp::Ordering::Less),
            max: extreme(&values, std::cmp::Ordering::Greater),
            distinct: distinct(&values),
        })
    }
}

/// Assemble validated records into a table. Records must all come from `plan`'s schema.
pub fn aggregate(records: impl IntoIterator<Item = ValidatedRecord>, plan: &AggregatePlan) -> Table {
    let summary_columns: Vec<String> = plan.summaries.iter().map(Summary::column).collect();

    if plan.group_by.is_empty() {
        let records: Vec<ValidatedRecord> = records.into_iter().collect();
        let totals = if plan.summaries.is_empty() {
            None
        } else {
            let members: Vec<&ValidatedRecord> = records.iter().collect();
            Some(summarize(&plan.summaries, &members))
        };
        let rows = records.iter().map(|r| project(r, &plan.columns)).collect();
        return Table {
            columns: plan.columns.clone(),
            group_by: Vec::new(),
            summary_columns,
            body: TableBody::Records(rows),
            totals,
        };
    }

    let mut groups: IndexMap<String, (Row, Vec<ValidatedRecord>)> = IndexMap::new();
    for record in records {
        let key = project(&record, &plan.group_by);
        let identity = group_identity(&key);
        groups
            .entry(identity)
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(record);
    }

    crate::metrics::aggregate::groups(groups.len());
    let groups = groups
        .into_values()
        .map(|(key, members)| {
            let refs: Vec<&ValidatedRecord> = members.iter().collect();
            Group {
                key,
                summaries: summarize(&plan.summaries, &refs),
                records: members.iter().map(|r| project(r, &plan.columns)).collect(),
            }
        })
        .collect();

    Table {
        columns: plan.columns.clone(),
        group_by: plan.group_by.clone(),
        summary_columns,
        body: TableBody::Groups(groups),
        totals: None,
    }
}

/// Debug keeps Integer(1), Number(1.0) and Text("1") apart; -0.0 joins 0.0
fn group_identity(key: &Row) -> String {
    fn canonical(value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Number(n) if *n == 0.0 => FieldValue::Number(0.0),
            FieldValue::List(items) => FieldValue::List(items.iter().map(canonical).collect()),
            other => other.clone(),
        }
    }
    format!("{:?}", key.values().map(canonical).collect::<Vec<_>>())
}

fn project(record: &ValidatedRecord, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), record.get(c).clone()))
        .collect()
}

fn summarize(summaries: &[Summary], members: &[&ValidatedRecord]) -> Row {
    summaries
        .iter()
        .map(|summary| {
            let values: Vec<&FieldValue> = members.iter().map(|r| r.get(&summary.field)).collect();
            (summary.column(), compute(summary, &values))
        })
        .collect()
}

/// List values contribute each of their items
fn scalars<'a>(values: &'a [&'a FieldValue]) -> impl Iterator<Item = &'a FieldValue> + 'a {
    values.iter().flat_map(|v| match v {
        FieldValue::List(items) => items.iter().collect::<Vec<_>>(),
        other => vec![*other],
    })
}

fn compute(summary: &Summary, values: &[&FieldValue]) -> FieldValue {
    match summary.kind {
        SummaryKind::Count => {
            FieldValue::Integer(values.iter().filter(|v| !v.is_null()).count() as i64)
        }
        SummaryKind::DistinctCount => FieldValue::Integer(distinct(values) as i64),
        SummaryKind::Sum if summary.field_type == FieldType::Integer => {
            let total = scalars(values).try_fold(0i64, |acc, v| match v {
                FieldValue::Integer(i) => acc.checked_add(*i),
                _ => Some(acc),
            });
            match total {
                Some(total) => FieldValue::Integer(total),
                None => FieldValue::Number(scalars(values).filter_map(|v| v.as_f64()).sum()),
            }
        }
        SummaryKind::Sum => FieldValue::Number(scalars(values).filter_map(|v| v.as_f64()).sum()),
        SummaryKind::Min => extreme(values, std::cmp::Ordering::Less),
        SummaryKind::Max => extreme(values, std::cmp::Ordering::Greater),
    }
}

/// Smallest or largest numeric value, `Null` when there is none
fn extreme(values: &[&FieldValue], wanted: std::cmp::Ordering) -> FieldValue {
    scalars(values)
        .filter(|v| v.as_f64().is_some())
        .fold(None::<&FieldValue>, |best, v| match best {
            Some(b) if b.as_f64().partial_cmp(&v.as_f64()) != Some(wanted.reverse()) => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(FieldValue::Null)
}

fn distinct(values: &[&FieldValue]) -> usize {
    values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| format!("{:?}", v))
        .collect::<HashSet<_>>()
        .len()
}
