use anyhow::Result;
use colored::Colorize;
use kisit_core::{ActivationCoordinator, EnforcementReport, Transition, TransitionReport};
use serde_json::json;

use super::{Access, Gate, Invocation};
use crate::output::json::print_json;

pub fn restrict(inv: &Invocation) -> Result<i32> {
    transition(inv, |coordinator| coordinator.restrict())
}

pub fn unrestrict(inv: &Invocation) -> Result<i32> {
    transition(inv, |coordinator| coordinator.unrestrict())
}

pub fn reload(inv: &Invocation) -> Result<i32> {
    transition(inv, |coordinator| coordinator.reload())
}

fn transition<F>(inv: &Invocation, run: F) -> Result<i32>
where
    F: FnOnce(&ActivationCoordinator<'_>) -> kisit_core::Result<TransitionReport>,
{
    if let Gate::Escalated(code) = inv.gate(Access::Root)? {
        return Ok(code);
    }

    let coordinator = ActivationCoordinator::new(&inv.ctx);
    let outcome = run(&coordinator)?;
    print_transition(inv, &outcome)?;
    Ok(0)
}

/// Print a transition outcome. Shared with `profile use`.
pub fn print_transition(inv: &Invocation, outcome: &TransitionReport) -> Result<()> {
    if inv.format.is_json() {
        return print_json(outcome);
    }

    let headline = match outcome.transition {
        Transition::Activated => format!(
            "Restriction active with profile '{}'",
            outcome.profile.as_deref().unwrap_or("-")
        ),
        Transition::Deactivated => "Restriction lifted".to_string(),
        Transition::AlreadyActive => "Restriction is already active".to_string(),
        Transition::AlreadyInactive => "No restriction is active".to_string(),
    };
    println!("{} {headline}", "✓".green());
    print_report(&outcome.report);
    Ok(())
}

pub fn set_website_restriction(inv: &Invocation, enabled: bool) -> Result<i32> {
    if let Gate::Escalated(code) = inv.gate(Access::Root)? {
        return Ok(code);
    }

    let coordinator = ActivationCoordinator::new(&inv.ctx);
    let report = if enabled {
        coordinator.enable_website_restriction()?
    } else {
        coordinator.disable_website_restriction()?
    };

    if inv.format.is_json() {
        print_json(&json!({ "website_restriction": enabled, "report": report }))?;
    } else {
        let state = if enabled { "enabled" } else { "disabled" };
        println!("{} Website restriction {state}", "✓".green());
        print_report(&report);
    }
    Ok(0)
}

pub fn fix_permissions(inv: &Invocation) -> Result<i32> {
    if let Gate::Escalated(code) = inv.gate(Access::Root)? {
        return Ok(code);
    }

    let repaired = ActivationCoordinator::new(&inv.ctx).fix_permissions()?;
    if inv.format.is_json() {
        print_json(&json!({ "repaired": repaired }))?;
    } else {
        for path in &repaired {
            println!("  {}", path.display());
        }
        println!("{} Repaired {} state file(s)", "✓".green(), repaired.len());
    }
    Ok(0)
}

pub fn always_restricted_apps(inv: &Invocation) -> Result<i32> {
    if let Gate::Escalated(code) = inv.gate(Access::Root)? {
        return Ok(code);
    }

    let report = ActivationCoordinator::new(&inv.ctx).apply_always_restricted()?;
    if inv.format.is_json() {
        print_json(&report)?;
    } else {
        println!("{} Always-restricted applications restricted", "✓".green());
        print_report(&report);
    }
    Ok(0)
}

fn print_report(report: &EnforcementReport) {
    if !report.touched.is_empty() {
        println!("  {} file(s) updated", report.touched.len());
    }
    for skipped in &report.skipped {
        println!("  {} skipped {skipped}", "!".yellow());
    }
    for failure in &report.failures {
        println!("  {} {failure}", "✗".red());
    }
}
