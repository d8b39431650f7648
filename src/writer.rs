//! Whole-file persistence of the merge store

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::store::{empty_ledger_path, MergeStore, UTF8_BOM};

/// Rewrite `destination` (and its no-trade ledger) from the store.
///
/// Each file is written to a temp file beside it and renamed into place,
/// so readers only ever see the previous or the new dataset.
pub fn flush(store: &MergeStore, destination: &Path) -> Result<()> {
    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    // BOM so spreadsheet tools pick UTF-8
    write!(tmp, "{}", UTF8_BOM)?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        for row in store.serialize() {
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }
    tmp.persist(destination)
        .with_context(|| format!("Failed to replace {}", destination.display()))?;

    let ledger = empty_ledger_path(destination);
    let empty_dates = store.empty_dates();
    if empty_dates.is_empty() {
        if ledger.exists() {
            fs::remove_file(&ledger)
                .with_context(|| format!("Failed to remove {}", ledger.display()))?;
        }
        return Ok(());
    }

    let mut tmp = NamedTempFile::new_in(dir)?;
    for date in empty_dates {
        writeln!(tmp, "{}", date)?;
    }
    tmp.persist(&ledger)
        .with_context(|| format!("Failed to replace {}", ledger.display()))?;

    Ok(())
}
