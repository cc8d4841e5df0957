use anyhow::Result;
use comfy_table::{Cell, Table};
use kisit_core::ActivationCoordinator;
use kisit_core::profile::AxisRules;

use super::Invocation;
use crate::output::json::print_json;
use crate::output::table::print_table;

pub fn run(inv: &Invocation) -> Result<i32> {
    let status = ActivationCoordinator::new(&inv.ctx).status()?;

    if inv.format.is_json() {
        print_json(&status)?;
        return Ok(0);
    }

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![
        Cell::new("Restriction"),
        Cell::new(if status.active { "active" } else { "inactive" }),
    ]);
    table.add_row(vec![Cell::new("Current profile"), Cell::new(&status.current_profile)]);
    if let Some(applied) = &status.applied_profile {
        table.add_row(vec![Cell::new("Applications"), Cell::new(describe_axis(&applied.application))]);
        table.add_row(vec![Cell::new("Websites"), Cell::new(describe_axis(&applied.website))]);
    }
    table.add_row(vec![
        Cell::new("DNS filter"),
        Cell::new(if status.dns_redirect { "on" } else { "off" }),
    ]);
    print_table(table)?;
    Ok(0)
}

/// `denylist (3)` style summary of one axis.
pub fn describe_axis(rules: &AxisRules) -> String {
    match rules.active_list() {
        Some(list) => format!("{} ({})", rules.restriction_type.as_str(), list.len()),
        None => rules.restriction_type.as_str().to_string(),
    }
}
