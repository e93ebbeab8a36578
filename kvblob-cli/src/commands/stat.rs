//! Stat Command
//!
//! Shows the metadata record of one blob.

use super::{format_bytes, Store};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;

/// Run stat command
pub async fn run(store: &Store, name: String) -> Result<()> {
    let meta = store
        .metadata(name.clone())
        .await
        .context("Failed to read metadata")?;

    let Some(meta) = meta else {
        anyhow::bail!("Blob not found: {}", name);
    };

    println!();
    println!("{}", style(&meta.name).bold().underlined());
    println!("{}", symbols::HLINE);
    if meta.valid {
        println!("  {:<16} {}", "state:", style("valid").green());
    } else {
        println!(
            "  {:<16} {} {}",
            "state:",
            style(symbols::WARN).yellow(),
            style("incomplete (write in progress or failed)").yellow()
        );
    }
    println!("  {:<16} {} ({} bytes)", "size:", format_bytes(meta.size), meta.size);
    println!("  {:<16} {}", "chunks:", meta.chunk_count);
    println!("  {:<16} {} bytes", "chunk ceiling:", meta.chunk_max_size);
    if let Some(hash) = meta.hash {
        println!("  {:<16} {}", "sha256:", hash);
    }
    if let Some(created) = meta.creation_time {
        println!("  {:<16} {}", "created:", created.to_rfc3339());
    }
    println!("  {:<16} {}", "write id:", style(meta.write_id).dim());
    println!();

    Ok(())
}
