//! Output formatting for CLI

use kino_cast_core::CapabilitySnapshot;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Serialize `data` as pretty JSON
pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Tabled)]
struct CapabilityRow {
    #[tabled(rename = "Capability")]
    name: &'static str,
    #[tabled(rename = "Available")]
    available: &'static str,
}

/// Render a capability snapshot as a table
pub fn capability_table(snapshot: &CapabilitySnapshot) -> String {
    let rows = snapshot.flags().into_iter().map(|(name, available)| CapabilityRow {
        name,
        available: if available { "yes" } else { "no" },
    });
    Table::new(rows).to_string()
}

/// Render a capability snapshot as one line per flag
pub fn capability_lines(snapshot: &CapabilitySnapshot) -> String {
    snapshot
        .flags()
        .iter()
        .map(|(name, available)| format!("  {:<26} {}", name, available))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert!(matches!(OutputFormat::from("JSON"), OutputFormat::Json));
        assert!(matches!(OutputFormat::from("table"), OutputFormat::Table));
        assert!(matches!(OutputFormat::from("anything"), OutputFormat::Text));
    }

    #[test]
    fn test_capability_table_lists_every_flag() {
        let snapshot = CapabilitySnapshot {
            chromecast: true,
            ..CapabilitySnapshot::default()
        };
        let table = capability_table(&snapshot);
        assert!(table.contains("Capability"));
        assert!(table.contains("remotePresentationDisplay"));
        assert!(table.contains("yes"));
        assert_eq!(capability_lines(&snapshot).lines().count(), 13);
    }
}
