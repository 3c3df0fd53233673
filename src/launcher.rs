//! Starting the chosen browser process.

use std::process::{Command, Stdio};

use crate::error::LaunchError;
use crate::resolve::LaunchDecision;

/// Starts a browser executable with an argument string.
pub trait ProcessLauncher {
    fn launch(&self, target: &str, arguments: &str) -> Result<(), LaunchError>;
}

/// Spawns a detached child process with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, target: &str, arguments: &str) -> Result<(), LaunchError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(LaunchError::EmptyTarget);
        }

        let args = split_arguments(arguments);
        log::info!("Launching {} {:?}", target, args);

        Command::new(target)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|source| LaunchError::Spawn {
                target: target.to_string(),
                source,
            })
    }
}

/// Splits an argument string on whitespace, keeping double-quoted runs
/// together and dropping the quotes.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending = false;

    for ch in arguments.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                pending = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        args.push(current);
    }
    args
}

/// Carries out an auto-launch decision.
///
/// Returns `Ok(false)` when the decision does not auto-launch a browser and
/// the caller should fall back to the chooser.
pub fn launch_decision(
    launcher: &impl ProcessLauncher,
    decision: &LaunchDecision,
) -> Result<bool, LaunchError> {
    let browser = match &decision.browser {
        Some(browser) if decision.auto_launch => browser,
        _ => return Ok(false),
    };
    launcher.launch(&browser.target, &decision.arguments)?;
    Ok(true)
}
