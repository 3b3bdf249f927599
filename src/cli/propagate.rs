use crate::error::Result;
use crate::propagate::{fill_from_map, rebuild_supplier_map};
use crate::settings::load_settings;

use super::open_db;

pub fn run() -> Result<()> {
    let conn = open_db(&load_settings())?;
    let mapped = rebuild_supplier_map(&conn)?;
    let filled = fill_from_map(&conn)?;
    println!("{mapped} supplier mappings updated");
    println!("{filled} transactions categorized");
    Ok(())
}
