//! Command-line host: argument parsing and the actions behind each mode.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::candidates::{add_candidates, PathCandidates};
use crate::config::SettingsManager;
use crate::error::{AppError, CliError};
use crate::filesystem::AppPaths;
use crate::import::{import_and_save, MergePolicy};
use crate::launcher::{launch_decision, CommandLauncher};
use crate::resolve::{Modifiers, Resolver};

/// Exit status when no browser was started and the chooser should be shown.
const EXIT_CHOOSER_NEEDED: u8 = 2;

pub const USAGE: &str = "\
Usage:
  browser-chooser [--launch] [--chooser] [--hotkey <digit>] <url-or-file>
  browser-chooser --import <file> [--overwrite]
  browser-chooser --detect";

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Resolve {
        input: String,
        launch: bool,
        hotkey: Option<char>,
        show_chooser: bool,
    },
    Import {
        source: PathBuf,
        overwrite: bool,
    },
    Detect,
    Help,
}

/// Parses arguments, program name already skipped.
pub fn parse_args<I>(args: I) -> Result<CliCommand, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut input = None;
    let mut launch = false;
    let mut show_chooser = false;
    let mut hotkey = None;
    let mut import = None;
    let mut overwrite = false;
    let mut detect = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "--launch" => launch = true,
            "--chooser" => show_chooser = true,
            "--overwrite" => overwrite = true,
            "--detect" => detect = true,
            "--hotkey" => {
                let value = args.next().ok_or(CliError::MissingValue("--hotkey"))?;
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_digit() => hotkey = Some(c),
                    _ => return Err(CliError::InvalidHotkey(value)),
                }
            }
            "--import" => {
                let value = args.next().ok_or(CliError::MissingValue("--import"))?;
                import = Some(PathBuf::from(value));
            }
            flag if flag.starts_with("--") => {
                return Err(CliError::UnknownOption(flag.to_string()));
            }
            _ => input = Some(arg),
        }
    }

    if let Some(source) = import {
        return Ok(CliCommand::Import { source, overwrite });
    }
    if detect {
        return Ok(CliCommand::Detect);
    }
    let input = input.ok_or(CliError::MissingInput)?;
    Ok(CliCommand::Resolve {
        input,
        launch,
        hotkey,
        show_chooser,
    })
}

fn print_json(value: &impl Serialize) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs a parsed command against the settings under `paths`.
pub fn execute(command: CliCommand, paths: &AppPaths) -> Result<ExitCode, AppError> {
    match command {
        CliCommand::Help => {
            println!("{}", USAGE);
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Resolve {
            input,
            launch,
            hotkey,
            show_chooser,
        } => {
            let manager = SettingsManager::new(paths.settings_file.clone())?;
            let settings = manager.get();
            let resolver = Resolver::new(&settings);
            let modifiers = Modifiers { show_chooser };

            let decision = hotkey
                .and_then(|key| resolver.resolve_hotkey(&input, key))
                .unwrap_or_else(|| resolver.resolve(&input, modifiers));
            print_json(&decision)?;

            if !launch {
                return Ok(ExitCode::SUCCESS);
            }
            if decision.auto_launch && decision.delay_seconds > 0 {
                thread::sleep(Duration::from_secs(decision.delay_seconds.into()));
            }
            if launch_decision(&CommandLauncher, &decision)? {
                Ok(ExitCode::SUCCESS)
            } else {
                log::info!("No browser chosen automatically for '{}'", input);
                Ok(ExitCode::from(EXIT_CHOOSER_NEEDED))
            }
        }
        CliCommand::Import { source, overwrite } => {
            paths.ensure_directories().map_err(AppError::Paths)?;
            let manager = SettingsManager::new(paths.settings_file.clone())?;
            let report = import_and_save(
                &manager,
                paths,
                &source,
                MergePolicy::everything(overwrite),
            )?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Detect => {
            let manager = SettingsManager::new(paths.settings_file.clone())?;
            let mut session = manager.session();
            let added = add_candidates(&mut session, &PathCandidates::from_env());
            let names: Vec<String> = added
                .iter()
                .filter_map(|id| session.get(*id).map(|b| b.name.clone()))
                .collect();
            if session.is_modified() {
                manager.commit_session(&mut session)?;
            }
            print_json(&names)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
