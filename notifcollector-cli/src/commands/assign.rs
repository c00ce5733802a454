//! Assignment commands - route providers on this device to ledger users

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::Confirm;
use notifcollector_core::Provider;

use super::{block_on, get_context};
use crate::output;

fn parse_provider(tag: &str) -> Result<Provider> {
    let provider: Provider = tag.parse().with_context(|| {
        let known: Vec<_> = Provider::KNOWN.iter().map(|p| p.as_str()).collect();
        format!("Known providers: {}", known.join(", "))
    })?;
    if !provider.is_known() {
        anyhow::bail!("The unknown provider cannot be assigned");
    }
    Ok(provider)
}

pub fn run_assign(provider: &str, user_id: &str, json: bool) -> Result<()> {
    let provider = parse_provider(provider)?;
    let ctx = get_context("assign")?;

    let assignment = block_on(ctx.assignment_service.assign(provider, user_id, &ctx.device_id))??;

    if json {
        println!("{}", serde_json::to_string_pretty(&assignment)?);
    } else {
        output::success(&format!(
            "{} events on this device now go to {}",
            assignment.provider, assignment.user_id
        ));
        output::info("Run 'ncol flush' to deliver events that were waiting.");
    }
    Ok(())
}

pub fn run_unassign(provider: &str, force: bool) -> Result<()> {
    let provider = parse_provider(provider)?;
    let ctx = get_context("unassign")?;

    let Some(user_id) = ctx.assignment_service.lookup(provider, &ctx.device_id)? else {
        output::warning(&format!("{} is not assigned on this device", provider));
        return Ok(());
    };

    if !force {
        println!(
            "\n{}",
            format!("This will stop routing {} events to {}.", provider, user_id).yellow()
        );
        println!("{}\n", "New events will wait as pending until reassigned.".dimmed());

        if !Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?
        {
            println!("{}\n", "Cancelled".dimmed());
            return Ok(());
        }
    }

    block_on(ctx.assignment_service.unassign(provider, &ctx.device_id))??;
    output::success(&format!("{} unassigned", provider));
    Ok(())
}

pub fn run_list(sync: bool, remote: bool, json: bool) -> Result<()> {
    let ctx = get_context("assignments")?;

    if remote {
        let list = block_on(ctx.assignment_service.remote_assignments(&ctx.device_id))??;
        if json {
            println!("{}", serde_json::to_string_pretty(&list)?);
            return Ok(());
        }
        let mut table = output::create_table();
        table.set_header(vec!["Provider", "User", "Device"]);
        for a in &list {
            table.add_row(vec![
                a.provider.clone(),
                a.user_id.clone(),
                a.device_id.clone().unwrap_or_default(),
            ]);
        }
        println!("{}", "Ledger Assignments".bold());
        println!("{}", table);
        return Ok(());
    }

    if sync {
        let synced = block_on(ctx.assignment_service.sync_from_remote(&ctx.device_id))??;
        if !json {
            output::success(&format!("Synced {} assignments from the ledger", synced.len()));
        }
    }

    let list = ctx.assignment_service.list_for_device(&ctx.device_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!("Device: {}", ctx.device_id.dimmed());
    if list.is_empty() {
        output::warning("No assignments. Events stay pending until a provider is assigned.");
        return Ok(());
    }
    let mut table = output::create_table();
    table.set_header(vec!["Provider", "User", "Assigned"]);
    for a in &list {
        table.add_row(vec![
            a.provider.to_string(),
            a.user_id.clone(),
            a.assigned_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub fn run_users(json: bool) -> Result<()> {
    let ctx = get_context("users")?;
    let users = block_on(ctx.assignment_service.list_users())??;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }
    let mut table = output::create_table();
    table.set_header(vec!["ID", "Name", "Email"]);
    for user in &users {
        table.add_row(vec![
            user.id.clone(),
            user.display_name().to_string(),
            user.email.clone(),
        ]);
    }
    println!("{}", table);
    Ok(())
}
