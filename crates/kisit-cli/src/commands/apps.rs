use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Table};
use kisit_core::{ApplicationCatalog, PackagingOrigin};
use kisit_core::catalog::write_installed_applications;
use kisit_core::permissions::set_state_access;
use serde::Serialize;
use serde_json::json;

use super::{Access, Gate, Invocation};
use crate::output::json::print_json;
use crate::output::table::{or_dash, print_table};

#[derive(Serialize)]
struct ApplicationRow<'a> {
    id: &'a str,
    name: Option<&'a str>,
    origin: PackagingOrigin,
    exec: Option<&'a str>,
}

/// List the applications shown to users.
pub fn list(inv: &Invocation) -> Result<i32> {
    let catalog = ApplicationCatalog::new(&inv.ctx.config);
    let rows: Vec<ApplicationRow<'_>> = catalog
        .list_applications()
        .into_iter()
        .map(|entry| ApplicationRow {
            id: &entry.id,
            name: entry.entry.name.as_deref(),
            origin: entry.origin,
            exec: entry.entry.exec.as_deref(),
        })
        .collect();

    if inv.format.is_json() {
        print_json(&rows)?;
        return Ok(0);
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Origin", "Exec"]);
    for row in &rows {
        table.add_row(vec![
            Cell::new(row.id),
            Cell::new(or_dash(row.name)),
            Cell::new(row.origin.as_str()),
            Cell::new(or_dash(row.exec)),
        ]);
    }
    print_table(table)?;
    Ok(0)
}

/// Refresh the installed-application list read by the management UI.
pub fn generate_applist(inv: &Invocation) -> Result<i32> {
    if let Gate::Escalated(code) = inv.gate(Access::Admin)? {
        return Ok(code);
    }

    let path = inv.ctx.config.installed_applications_path();
    let catalog = ApplicationCatalog::new(&inv.ctx.config);
    let count = write_installed_applications(&catalog, &path)?;
    if let Err(err) = set_state_access(&path, &inv.ctx.ownership) {
        tracing::warn!(path = %path.display(), error = %err, "could not set application list permissions");
    }
    tracing::info!(count, path = %path.display(), "application list written");

    if inv.format.is_json() {
        print_json(&json!({ "path": path, "applications": count }))?;
    } else {
        println!(
            "{} Wrote {count} application(s) to {}",
            "✓".green(),
            path.display()
        );
    }
    Ok(0)
}
