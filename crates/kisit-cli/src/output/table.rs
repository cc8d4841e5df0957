use anyhow::Result;
use comfy_table::Table;

pub fn print_table(table: Table) -> Result<()> {
    println!("{table}");
    Ok(())
}

/// Render an optional cell value, with `-` for absent ones.
pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}
