//! Table and JSON rendering.

use clap::ValueEnum;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// Print `rows` as a rounded table, or as a JSON array.
pub(crate) fn print_rows<T>(rows: &[T], format: OutputFormat) -> Result<(), serde_json::Error>
where
    T: Tabled + Serialize,
{
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("(none)");
            } else {
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{table}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
    }
    Ok(())
}

/// Two-column property table.
#[derive(Debug, Clone, Serialize, Tabled)]
pub(crate) struct Property {
    #[tabled(rename = "Property")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl Property {
    pub(crate) fn new(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Shorten `text` to `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max && !text.contains('\n') {
        return line.to_string();
    }
    let kept: String = line.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_single_lines() {
        assert_eq!(truncate("Fix it", 10), "Fix it");
    }

    #[test]
    fn truncate_cuts_long_and_multiline_text() {
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(truncate("first\nsecond", 20), "first…");
    }
}
