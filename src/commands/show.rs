use crate::commands::format_timestamp;
use crate::config::LeaseholdConfig;
use crate::error::Result;
use crate::locking::{LockInfo, LockManager, global_token};
use colored::*;

pub struct ShowCommand {
    manager: LockManager,
}

impl ShowCommand {
    pub fn new(config: &LeaseholdConfig) -> Result<Self> {
        Ok(Self {
            manager: LockManager::from_config(config)?,
        })
    }

    pub fn execute(&self, key: &str, json: bool) -> Result<()> {
        let lock = self.manager.get_lock(&global_token(), key)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&lock)?);
            return Ok(());
        }

        match lock {
            Some(info) => print!("{}", describe(&info)),
            None => println!("Lock '{key}' not found in '{}'", self.manager.table_name()),
        }
        Ok(())
    }
}

fn describe(info: &LockInfo) -> String {
    let status = if info.active {
        "active".green().to_string()
    } else {
        "expired".yellow().to_string()
    };
    let mut out = format!(
        "Lock: {}\n  Status: {status}\n  Token: {}\n  Acquired: {}\n  Expires: {}\n",
        info.key,
        info.token,
        format_timestamp(info.acquired_at),
        format_timestamp(info.expires_at)
    );
    if let Some(log_ref) = &info.log_ref {
        out.push_str(&format!("  Logs: {log_ref}\n"));
    }
    if !info.metadata.is_empty() {
        out.push_str("  Metadata:\n");
        for (name, value) in &info.metadata {
            out.push_str(&format!("    {name}: {value}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::Metadata;
    use chrono::{DateTime, TimeDelta};
    use serde_json::json;

    #[test]
    fn test_describe_includes_diagnostics() {
        let acquired_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("shard".to_string(), json!(4));
        let info = LockInfo {
            key: "reindex".to_string(),
            token: "req-9-0".to_string(),
            acquired_at,
            expires_at: acquired_at + TimeDelta::seconds(20),
            log_ref: Some("https://logs.example/req-9".to_string()),
            metadata,
            active: false,
        };

        let text = describe(&info);
        assert!(text.contains("Lock: reindex"));
        assert!(text.contains("Token: req-9-0"));
        assert!(text.contains("Logs: https://logs.example/req-9"));
        assert!(text.contains("shard: 4"));
        assert!(text.contains("expired"));
    }
}
