use std::env;
use std::process::ExitCode;

pub mod candidates;
pub mod cli;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod import;
pub mod launcher;
pub mod legacy;
pub mod models;
pub mod resolve;
pub mod session;

pub use config::{JsonGateway, PersistenceGateway, SettingsManager};
pub use error::{ImportError, LaunchError, LoadError, ParseError, SaveError};
pub use import::{import_file, merge, MergePolicy, MergeReport};
pub use models::{AutoUrl, Browser, FileType, Protocol, Settings};
pub use resolve::{resolve, LaunchDecision, MatchReason, Modifiers, Resolver};
pub use session::{Direction, EditingSession, EntryId, SessionEvent};

/// Entry point of the command-line host.
pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = match cli::parse_args(env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, cli::USAGE);
            return ExitCode::FAILURE;
        }
    };

    let paths = match filesystem::AppPaths::discover() {
        Ok(paths) => paths,
        Err(e) => {
            log::error!("Could not locate settings directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli::execute(command, &paths) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
