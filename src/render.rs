use crate::pipeline::aggregate::Table;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Json,
    Csv,
}

/// Write a table as CSV. Grouped tables get one row per group with key and
/// summary columns; lists are joined with `|` and nulls are empty cells.
pub fn to_csv(table: &Table) -> Result<Vec<u8>, csv::Error> {
    let header: Vec<&str> = if table.is_grouped() {
        table
            .group_by
            .iter()
            .chain(table.summary_columns.iter())
            .map(String::as_str)
            .collect()
    } else {
        table.columns.iter().map(String::as_str).collect()
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    for row in table.rows() {
        writer.write_record(header.iter().map(|column| {
            row.get(*column).map(|v| v.to_string()).unwrap_or_default()
        }))?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
