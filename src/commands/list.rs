use crate::commands::format_timestamp;
use crate::config::LeaseholdConfig;
use crate::error::Result;
use crate::locking::{LockFilter, LockListing, LockManager, global_token};
use colored::*;
use comfy_table::{Cell, Color, Table};

pub struct ListCommand {
    manager: LockManager,
}

impl ListCommand {
    pub fn new(config: &LeaseholdConfig) -> Result<Self> {
        Ok(Self {
            manager: LockManager::from_config(config)?,
        })
    }

    pub fn execute(&self, filter: LockFilter, json: bool) -> Result<()> {
        let listing = self.manager.list_locks(&global_token(), filter)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&listing)?);
            return Ok(());
        }

        if listing.locks.is_empty() {
            println!("No locks found in '{}'", self.manager.table_name());
        } else {
            println!("{}", render_table(&listing));
            let active = listing.locks.values().filter(|info| info.active).count();
            println!(
                "{} lock{} ({active} active)",
                listing.locks.len(),
                if listing.locks.len() == 1 { "" } else { "s" }
            );
        }

        for failure in &listing.failures {
            eprintln!(
                "{} Unreadable row {}: {}",
                "✗".red(),
                failure.key.as_deref().unwrap_or("<unknown>"),
                failure.details
            );
        }
        Ok(())
    }
}

fn render_table(listing: &LockListing) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
    table.set_header(vec![
        Cell::new("Key"),
        Cell::new("Token"),
        Cell::new("Acquired"),
        Cell::new("Expires"),
        Cell::new("Status"),
        Cell::new("Logs"),
    ]);

    for (key, info) in &listing.locks {
        let status = if info.active {
            Cell::new("active").fg(Color::Green)
        } else {
            Cell::new("expired").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(key),
            Cell::new(&info.token),
            Cell::new(format_timestamp(info.acquired_at)),
            Cell::new(format_timestamp(info.expires_at)),
            status,
            Cell::new(info.log_ref.as_deref().unwrap_or("-")),
        ]);
    }
    table
}
