use anyhow::{Result, bail};
use colored::Colorize;
use comfy_table::{Cell, Table};
use kisit_core::profile::AxisRules;
use kisit_core::{ActivationCoordinator, Profile, ProfileStore, RestrictionType, RuleList};
use serde::Serialize;
use serde_json::json;

use super::activation::print_transition;
use super::status::describe_axis;
use super::{Access, Gate, Invocation};
use crate::cli::{Axis, ListKind, ProfileCommands, RestrictionKind, RuleAction, RuleArgs};
use crate::output::json::print_json;
use crate::output::table::print_table;

pub fn run(command: ProfileCommands, inv: &Invocation) -> Result<i32> {
    match command {
        ProfileCommands::List => list(inv),
        ProfileCommands::Show { name } => show(inv, name),
        ProfileCommands::Create { name, owner } => edit(inv, |store| {
            store.insert_default_profile(&name, owner.as_deref())?;
            Ok(format!("Created profile '{name}'"))
        }),
        ProfileCommands::Duplicate {
            source,
            target,
            owner,
        } => edit(inv, |store| {
            store.duplicate_profile(&source, &target, owner.as_deref())?;
            Ok(format!("Copied profile '{source}' to '{target}'"))
        }),
        ProfileCommands::Remove { name } => edit(inv, |store| {
            store.remove_profile(&name)?;
            Ok(format!("Removed profile '{name}'"))
        }),
        ProfileCommands::Rename { old, new } => edit(inv, |store| {
            if !store.rename_profile(&old, &new)? {
                if store.profiles().contains_key(&new) {
                    bail!("profile already exists: {new}");
                }
                return Ok(format!("No profile named '{old}', nothing renamed"));
            }
            Ok(format!("Renamed profile '{old}' to '{new}'"))
        }),
        ProfileCommands::Use { name } => use_profile(inv, &name),
        ProfileCommands::SetType { name, axis, kind } => edit(inv, |store| {
            let restriction_type = restriction_type(kind);
            store.update_profile(&name, |profile| {
                axis_rules(profile, axis).restriction_type = restriction_type;
            })?;
            Ok(format!(
                "Profile '{name}' now uses {} for {}",
                restriction_type.as_str(),
                axis_label(axis)
            ))
        }),
        ProfileCommands::Rule { action } => match action {
            RuleAction::Add(args) => edit_rules(inv, args, true),
            RuleAction::Remove(args) => edit_rules(inv, args, false),
        },
    }
}

#[derive(Serialize)]
struct ProfileRow<'a> {
    name: &'a str,
    current: bool,
    owner: &'a str,
    #[serde(flatten)]
    profile: &'a Profile,
}

fn list(inv: &Invocation) -> Result<i32> {
    let store = inv.load_store()?;
    let current = store.current_profile_name();
    let rows: Vec<ProfileRow<'_>> = store
        .profiles()
        .iter()
        .map(|(name, profile)| ProfileRow {
            name,
            current: name == current,
            owner: profile.owner(name),
            profile,
        })
        .collect();

    if inv.format.is_json() {
        print_json(&rows)?;
        return Ok(0);
    }

    let mut table = Table::new();
    table.set_header(vec!["", "Name", "Owner", "Applications", "Websites", "On login"]);
    for row in &rows {
        table.add_row(vec![
            Cell::new(if row.current { "*" } else { "" }),
            Cell::new(row.name),
            Cell::new(row.owner),
            Cell::new(describe_axis(&row.profile.application)),
            Cell::new(describe_axis(&row.profile.website)),
            Cell::new(if row.profile.activate_on_startup { "yes" } else { "no" }),
        ]);
    }
    print_table(table)?;
    Ok(0)
}

fn show(inv: &Invocation, name: Option<String>) -> Result<i32> {
    let store = inv.load_store()?;
    let name = name.unwrap_or_else(|| store.current_profile_name().to_string());
    let profile = store.get_profile(&name)?;

    if inv.format.is_json() {
        print_json(&ProfileRow {
            name: &name,
            current: name == store.current_profile_name(),
            owner: profile.owner(&name),
            profile,
        })?;
        return Ok(0);
    }

    println!("{} {}", "Profile:".bold(), name);
    println!("  Owner:    {}", profile.owner(&name));
    println!("  On login: {}", if profile.activate_on_startup { "yes" } else { "no" });
    if profile.is_default {
        println!("  Managed externally");
    }
    print_axis("Applications", &profile.application);
    print_axis("Websites", &profile.website);
    Ok(0)
}

fn print_axis(label: &str, rules: &AxisRules) {
    println!("\n{} {}", format!("{label}:").bold(), rules.restriction_type.as_str());
    for (title, entries) in [("allowlist", &rules.allowlist), ("denylist", &rules.denylist)] {
        if entries.is_empty() {
            continue;
        }
        println!("  {title}:");
        for entry in entries {
            println!("    {entry}");
        }
    }
}

/// Load and modify the store while holding the state guard. Store
/// mutators persist the document themselves.
fn edit<F>(inv: &Invocation, apply: F) -> Result<i32>
where
    F: FnOnce(&mut ProfileStore) -> Result<String>,
{
    if let Gate::Escalated(code) = inv.gate(Access::Admin)? {
        return Ok(code);
    }

    let _guard = inv.guard()?;
    let mut store = inv.load_store()?;
    let message = apply(&mut store)?;

    if inv.format.is_json() {
        print_json(&json!({ "message": message }))?;
    } else {
        println!("{} {message}", "✓".green());
    }
    Ok(0)
}

fn edit_rules(inv: &Invocation, args: RuleArgs, add: bool) -> Result<i32> {
    let RuleArgs {
        name,
        axis,
        list,
        entries,
    } = args;
    let list = rule_list(list);

    edit(inv, |store| {
        let mut changed = 0;
        store.update_profile(&name, |profile| {
            let rules = axis_rules(profile, axis);
            for entry in &entries {
                let entry = entry.trim();
                if entry.is_empty() {
                    continue;
                }
                let done = if add {
                    rules.insert(list, entry)
                } else {
                    rules.remove(list, entry)
                };
                if done {
                    changed += 1;
                }
            }
        })?;
        let verb = if add { "Added" } else { "Removed" };
        Ok(format!("{verb} {changed} {} rule(s) in '{name}'", axis_label(axis)))
    })
}

/// Make `name` current. While a restriction is active the new profile is
/// applied right away, which needs root.
fn use_profile(inv: &Invocation, name: &str) -> Result<i32> {
    let coordinator = ActivationCoordinator::new(&inv.ctx);
    let active = coordinator.is_active();
    let access = if active { Access::Root } else { Access::Admin };
    if let Gate::Escalated(code) = inv.gate(access)? {
        return Ok(code);
    }

    // The coordinator takes the guard itself, so it is released before reloading.
    {
        let _guard = inv.guard()?;
        inv.load_store()?.set_current_profile(name)?;
    }

    if active {
        let outcome = coordinator.reload()?;
        print_transition(inv, &outcome)?;
    } else if inv.format.is_json() {
        print_json(&json!({ "message": format!("Current profile is '{name}'") }))?;
    } else {
        println!("{} Current profile is '{name}'", "✓".green());
    }
    Ok(0)
}

fn axis_rules(profile: &mut Profile, axis: Axis) -> &mut AxisRules {
    match axis {
        Axis::Application => &mut profile.application,
        Axis::Website => &mut profile.website,
    }
}

fn axis_label(axis: Axis) -> &'static str {
    match axis {
        Axis::Application => "application",
        Axis::Website => "website",
    }
}

fn restriction_type(kind: RestrictionKind) -> RestrictionType {
    match kind {
        RestrictionKind::None => RestrictionType::None,
        RestrictionKind::Allowlist => RestrictionType::Allowlist,
        RestrictionKind::Denylist => RestrictionType::Denylist,
    }
}

fn rule_list(list: ListKind) -> RuleList {
    match list {
        ListKind::Allowlist => RuleList::Allowlist,
        ListKind::Denylist => RuleList::Denylist,
    }
}
