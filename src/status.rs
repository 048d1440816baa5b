// System status display: row counts per table, merged lifetime days and run state.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use colored::Colorize;

use crate::db::models::LifetimeKind;
use crate::db::Database;

/// Display system status to the terminal. `db_file` is the SQLite path, when
/// that backend is in use.
pub async fn show(db: &Arc<dyn Database>, db_display: &str, db_file: Option<&str>) -> Result<()> {
    match db_file {
        Some(path) if Path::new(path).exists() => {
            let file_size = std::fs::metadata(path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Database: {} ({})", db_display, file_size);
        }
        Some(_) => {
            println!("Database: not initialized");
            println!("\nRun `agenda init` to set up the database.");
            return Ok(());
        }
        None => println!("Database: {}", db_display),
    }

    println!("\n{}", "Rows".bold());
    for (table, count) in db.row_counts().await? {
        let count_str = count.to_string();
        let shown = if count == 0 { count_str.as_str().dimmed() } else { count_str.as_str().normal() };
        println!("  {:<24} {:>8}", table, shown);
    }

    println!("\n{}", "Lifetimes".bold());
    for kind in LifetimeKind::ALL {
        let days = db.get_merged_days(kind).await?;
        match (days.first(), days.last()) {
            (Some(first), Some(last)) => println!(
                "  {:<10} {} days merged, {} to {}",
                kind,
                days.len(),
                first.date,
                last.date
            ),
            _ => println!("  {:<10} {}", kind, "never run".dimmed()),
        }
    }

    let state = db.get_all_run_state().await?;
    if !state.is_empty() {
        println!("\n{}", "Run state".bold());
        for (key, value) in state {
            println!("  {key} = {value}");
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[tokio::test]
    async fn test_show_on_memory_database() {
        let db = crate::db::memory_sqlite().unwrap();
        db.set_run_state("narratives_window", "2024-01-04..2024-01-10").await.unwrap();
        show(&db, ":memory:", None).await.unwrap();
    }
}
