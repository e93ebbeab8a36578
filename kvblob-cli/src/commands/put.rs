//! Put Command
//!
//! Stores a file, or standard input, as a blob.

use super::{format_bytes, Store};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use kvblob_core::{BlobMetadata, KvBlobError};
use std::fs::File;
use std::time::Duration;

/// Put configuration
pub struct PutConfig {
    pub name: String,
    /// File to read; standard input when `None` or "-"
    pub path: Option<String>,
}

/// Run put command
pub async fn run(store: &Store, config: PutConfig) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Writing {}", config.name));

    let result = match config.path.as_deref() {
        None | Some("-") => store.put_reader(config.name.clone(), std::io::stdin()).await,
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
            store.put_reader(config.name.clone(), file).await
        }
    };
    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            // A failure can land before or after the invalid record was written
            let record = store.metadata(config.name.clone()).await.ok().flatten();
            eprintln!(
                "{} {} {}",
                style(symbols::CROSS).red(),
                config.name,
                describe_failure(&e, record.as_ref())
            );
            return Err(e).context("Put failed");
        }
    };

    let meta = &report.metadata;
    println!(
        "{} Stored {} ({}, {} chunks, {} transactions, {} ms)",
        style(symbols::CHECK).green(),
        style(&meta.name).bold(),
        format_bytes(meta.size),
        meta.chunk_count,
        report.transactions,
        report.elapsed.as_millis()
    );
    if let Some(hash) = meta.hash {
        println!("  {} {}", style("sha256:").dim(), hash);
    }

    Ok(())
}

/// What a failed put left under its name, given the record found afterwards
fn describe_failure(err: &KvBlobError, record: Option<&BlobMetadata>) -> &'static str {
    match (err, record) {
        (KvBlobError::ConcurrentWrite(_), _) => "was not stored, another writer took the name",
        (_, Some(meta)) if !meta.valid => "was not stored and is marked invalid",
        (_, Some(_)) => "was not stored, the previous version is unchanged",
        (_, None) => "was not stored",
    }
}
