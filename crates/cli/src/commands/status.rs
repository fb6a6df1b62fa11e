use anyhow::Result;
use clap::ValueEnum;
use strata_migrate::MigrationStatusEntry;

use super::ConnectionArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFormat {
    Table,
    Json,
}

pub async fn run(connection: &ConnectionArgs, format: StatusFormat) -> Result<()> {
    let engine = connection.engine()?;
    let entries = engine.status().await?;

    match format {
        StatusFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        StatusFormat::Table => print!("{}", render_table(&entries)),
    }
    Ok(())
}

/// Fixed-width table with a summary line
pub fn render_table(entries: &[MigrationStatusEntry]) -> String {
    if entries.is_empty() {
        return "No migrations found\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<14}{:<10}{:<22}{}\n",
        "Version", "Status", "Applied At", "Description"
    ));
    out.push_str(&format!("{}\n", "-".repeat(80)));

    for entry in entries {
        let status = match (entry.applied, entry.orphan) {
            (_, true) => "Orphaned",
            (true, false) => "Applied",
            (false, false) => "Pending",
        };
        let applied_at = entry
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<14}{:<10}{:<22}{}\n",
            entry.version, status, applied_at, entry.description
        ));
    }

    let applied = entries.iter().filter(|e| e.applied).count();
    out.push_str(&format!(
        "\n{} total, {} applied, {} pending\n",
        entries.len(),
        applied,
        entries.len() - applied
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_table() {
        let entries = vec![
            MigrationStatusEntry {
                version: "202401010000".to_string(),
                description: "Create users".to_string(),
                applied: true,
                applied_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
                orphan: false,
            },
            MigrationStatusEntry {
                version: "202402010000".to_string(),
                description: "Create orders".to_string(),
                applied: false,
                applied_at: None,
                orphan: false,
            },
        ];

        let table = render_table(&entries);
        assert!(table.contains("202401010000  Applied   2024-01-02 03:04:05   Create users"));
        assert!(table.contains("202402010000  Pending"));
        assert!(table.contains("2 total, 1 applied, 1 pending"));
    }

    #[test]
    fn test_render_empty_table() {
        assert_eq!(render_table(&[]), "No migrations found\n");
    }
}
