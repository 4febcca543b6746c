use crate::config::LeaseholdConfig;
use crate::error::Result;
use crate::locking::{LockHygieneRunner, LockManager, global_token};
use colored::*;

pub struct PurgeCommand {
    manager: LockManager,
}

impl PurgeCommand {
    pub fn new(config: &LeaseholdConfig) -> Result<Self> {
        Ok(Self {
            manager: LockManager::from_config(config)?,
        })
    }

    pub fn execute(&self, dry_run: bool) -> Result<()> {
        let report = LockHygieneRunner::new(self.manager.clone())
            .dry_run(dry_run)
            .run(&global_token())?;

        if report.scanned == 0 {
            println!("No expired locks in '{}'", self.manager.table_name());
        } else if dry_run {
            println!(
                "Would remove {} expired lock{}",
                report.removed,
                if report.removed == 1 { "" } else { "s" }
            );
        } else {
            println!(
                "{} Removed {} expired lock{}",
                "✓".green().bold(),
                report.removed,
                if report.removed == 1 { "" } else { "s" }
            );
        }
        if report.skipped > 0 {
            println!("  {} re-acquired during the sweep and kept", report.skipped);
        }
        if report.errors > 0 {
            eprintln!(
                "{} {} row{} could not be removed (run with -v for details)",
                "✗".red(),
                report.errors,
                if report.errors == 1 { "" } else { "s" }
            );
        }
        Ok(())
    }
}
