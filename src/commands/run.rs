use crate::config::LeaseholdConfig;
use crate::error::{LeaseholdError, Result};
use crate::locking::{
    CancellationToken, LockAttempt, LockHandle, LockManager, Metadata, global_token,
};
use log::{debug, info, warn};
use serde_json::Value;
use std::io;
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parses a `KEY=VALUE` metadata argument. Values that parse as JSON are
/// stored as JSON, anything else as a string.
pub fn parse_meta_pair(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("metadata key is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Debug)]
enum Supervision {
    Exited(ExitStatus),
    LeaseEnded,
    Interrupted,
}

pub struct RunCommand {
    manager: LockManager,
}

impl RunCommand {
    pub fn new(config: &LeaseholdConfig) -> Result<Self> {
        Ok(Self {
            manager: LockManager::from_config(config)?,
        })
    }

    pub fn with_manager(manager: LockManager) -> Self {
        Self { manager }
    }

    /// Runs `command` while holding `key` and returns the command's exit
    /// code. The command is killed if the lease is lost or the process is
    /// interrupted.
    pub fn execute(
        &self,
        key: &str,
        metadata: Vec<(String, Value)>,
        command: &[String],
    ) -> Result<i32> {
        let Some((program, args)) = command.split_first() else {
            return Err(LeaseholdError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no command given to run",
            )));
        };

        let mut metadata: Metadata = metadata.into_iter().collect();
        metadata
            .entry("command".to_string())
            .or_insert_with(|| Value::String(command.join(" ")));
        metadata
            .entry("pid".to_string())
            .or_insert_with(|| Value::from(std::process::id()));

        let scope = CancellationToken::new();
        let mut handle = match self.manager.acquire(&scope, key, metadata)? {
            LockAttempt::Acquired(handle) => handle,
            LockAttempt::Contended(holder) => {
                return Err(LeaseholdError::LockUnavailable {
                    key: key.to_string(),
                    holder: Box::new(holder),
                });
            }
        };

        let supervision = supervise(&handle, &global_token(), program, args);
        let released = handle.release(&CancellationToken::new());

        let supervision = match supervision {
            Ok(supervision) => supervision,
            Err(err) => {
                if let Err(release_err) = released {
                    warn!("Failed to release lock '{key}' after spawn failure: {release_err}");
                }
                return Err(err);
            }
        };

        match supervision {
            Supervision::Exited(status) => {
                released?;
                let code = exit_code(status);
                info!("Command under lock '{key}' exited with {code}");
                Ok(code)
            }
            Supervision::LeaseEnded => Err(released.err().unwrap_or_else(|| {
                LeaseholdError::NotHeld {
                    key: key.to_string(),
                    token: handle.token().to_string(),
                    details: "the lease ended while the command was running".to_string(),
                }
            })),
            Supervision::Interrupted => {
                if let Err(err) = released {
                    warn!("Failed to release lock '{key}' after interruption: {err}");
                }
                Err(LeaseholdError::Cancelled {
                    operation: "run",
                    key: key.to_string(),
                })
            }
        }
    }
}

fn supervise(
    handle: &LockHandle,
    signals: &CancellationToken,
    program: &str,
    args: &[String],
) -> Result<Supervision> {
    debug!("Spawning {program} {args:?} under lock '{}'", handle.key());
    let mut child = Command::new(program).args(args).spawn()?;

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Supervision::Exited(status));
        }
        if handle.lease_context().is_cancelled() {
            warn!(
                "Lease on lock '{}' ended; stopping command (pid {})",
                handle.key(),
                child.id()
            );
            stop_child(&mut child);
            return Ok(Supervision::LeaseEnded);
        }
        if signals.is_cancelled() {
            stop_child(&mut child);
            return Ok(Supervision::Interrupted);
        }
        handle.lease_context().wait_timeout(POLL_INTERVAL);
    }
}

fn stop_child(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!("Failed to kill pid {}: {err}", child.id());
    }
    if let Err(err) = child.wait() {
        warn!("Failed to reap pid {}: {err}", child.id());
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
