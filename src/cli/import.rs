use std::path::PathBuf;

use crate::error::{LedgerError, Result};
use crate::importer::{import_file, ImportFormat};
use crate::propagate::fill_from_map;
use crate::settings::load_settings;

use super::open_db;

pub fn run(file: &str, format: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let format = format
        .map(|key| {
            ImportFormat::from_key(key)
                .ok_or_else(|| LedgerError::InvalidImport(format!("unknown format '{key}'")))
        })
        .transpose()?;

    let result = import_file(&conn, &PathBuf::from(file), format, &settings)?;
    if result.duplicate_file {
        println!("This file has already been imported (duplicate checksum).");
        return Ok(());
    }

    println!(
        "{} imported, {} updated, {} skipped",
        result.imported, result.updated, result.skipped
    );
    if result.excluded > 0 {
        println!("{} flagged as transfers or forbidden (not matched)", result.excluded);
    }

    let filled = fill_from_map(&conn)?;
    if filled > 0 {
        println!("{filled} categorized from known suppliers");
    }
    Ok(())
}
