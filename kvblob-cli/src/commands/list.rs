//! List Command
//!
//! Lists blobs whose names start with a prefix.

use super::{format_bytes, Store};
use crate::symbols;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;

/// List configuration
pub struct ListConfig {
    pub prefix: String,
    pub long_format: bool,
    pub human_readable: bool,
}

/// Run list command
pub async fn run(store: &Store, config: ListConfig) -> Result<()> {
    let blobs = store
        .list(config.prefix.clone())
        .await
        .context("Failed to list blobs")?;

    if blobs.is_empty() {
        println!(
            "{} No blobs found with prefix '{}'",
            style("Info:").cyan(),
            config.prefix
        );
        return Ok(());
    }

    if config.long_format {
        println!(
            "{:<40} {:>12} {:>8} {:>20} {}",
            style("NAME").bold(),
            style("SIZE").bold(),
            style("CHUNKS").bold(),
            style("CREATED").bold(),
            style("SHA256").bold()
        );
        println!("{}", "-".repeat(100));
    }

    let mut total_size: u64 = 0;
    let mut incomplete = 0usize;

    for meta in &blobs {
        if !meta.valid {
            incomplete += 1;
        }
        total_size += meta.size;

        if config.long_format {
            let size_str = if config.human_readable {
                format_bytes(meta.size)
            } else {
                meta.size.to_string()
            };
            let hash = meta
                .hash
                .map(|h| truncate_string(&h.to_hex(), 16))
                .unwrap_or_else(|| style("incomplete").yellow().to_string());

            println!(
                "{:<40} {:>12} {:>8} {:>20} {}",
                truncate_key(&meta.name, 40),
                size_str,
                meta.chunk_count,
                format_time(meta.creation_time),
                hash
            );
        } else if meta.valid {
            println!("{}", meta.name);
        } else {
            println!("{} {}", meta.name, style(symbols::WARN).yellow());
        }
    }

    if config.long_format {
        println!("{}", "-".repeat(100));
        println!(
            "{} blobs, {} total",
            style(blobs.len()).green(),
            if config.human_readable {
                format_bytes(total_size)
            } else {
                format!("{} bytes", total_size)
            }
        );
    }
    if incomplete > 0 {
        println!(
            "{}",
            style(format!("({} incomplete, being written or failed)", incomplete)).yellow()
        );
    }

    Ok(())
}

/// Truncate a name for display
fn truncate_key(key: &str, max_len: usize) -> String {
    if key.len() <= max_len {
        return key.to_string();
    }
    let mut start = key.len() - (max_len - 3);
    while !key.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &key[start..])
}

/// Truncate a string for display
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}
