//! Get Command
//!
//! Reads a blob back to a file or standard output.

use super::{format_bytes, Store};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use kvblob_store::ReadOptions;
use std::io::Write;

/// Get configuration
pub struct GetConfig {
    pub name: String,
    /// Output file; standard output when `None` or "-"
    pub output: Option<String>,
    pub verify: bool,
}

/// Run get command
pub async fn run(store: &Store, config: GetConfig) -> Result<()> {
    let options = ReadOptions {
        verify_hash: config.verify,
    };
    let blob = match store.get_with(config.name.clone(), options).await {
        Ok(blob) => blob,
        Err(e) if e.is_unavailable() => {
            eprintln!("{} {}", style(symbols::WARN).yellow(), e);
            anyhow::bail!("{} is not available", config.name);
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", config.name)),
    };

    match config.output.as_deref() {
        None | Some("-") => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&blob.data)
                .context("Failed to write to stdout")?;
            stdout.flush()?;
        }
        Some(path) => {
            tokio::fs::write(path, &blob.data)
                .await
                .with_context(|| format!("Failed to write {}", path))?;
            eprintln!(
                "{} Wrote {} to {}{}",
                style(symbols::CHECK).green(),
                format_bytes(blob.metadata.size),
                path,
                if config.verify { " (verified)" } else { "" }
            );
        }
    }

    Ok(())
}
