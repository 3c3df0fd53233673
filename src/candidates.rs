//! Detecting installed browsers and adding them to a session.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use crate::models::Browser;
use crate::session::{EditingSession, EntryId};

/// Executables probed on `PATH`, with the display name they get.
const KNOWN_BROWSERS: &[(&str, &str)] = &[
    ("Firefox", "firefox"),
    ("Chrome", "google-chrome"),
    ("Chromium", "chromium"),
    ("Edge", "microsoft-edge"),
    ("Brave", "brave-browser"),
    ("Opera", "opera"),
    ("Vivaldi", "vivaldi"),
    ("LibreWolf", "librewolf"),
];

/// Anything that can suggest `(name, target)` pairs for browsers.
pub trait BrowserCandidateSource {
    fn candidates(&self) -> Vec<(String, String)>;
}

/// Looks for well-known browser executables in a list of directories.
#[derive(Debug, Clone, Default)]
pub struct PathCandidates {
    dirs: Vec<PathBuf>,
}

impl PathCandidates {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Directories from the `PATH` environment variable.
    pub fn from_env() -> Self {
        let dirs = env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).collect())
            .unwrap_or_default();
        Self { dirs }
    }
}

impl BrowserCandidateSource for PathCandidates {
    fn candidates(&self) -> Vec<(String, String)> {
        KNOWN_BROWSERS
            .iter()
            .filter_map(|(name, exe)| {
                let file = format!("{}{}", exe, env::consts::EXE_SUFFIX);
                self.dirs
                    .iter()
                    .map(|dir| dir.join(&file))
                    .find(|path| path.is_file())
                    .map(|path| (name.to_string(), path.to_string_lossy().into_owned()))
            })
            .collect()
    }
}

/// Adds every candidate whose target is not configured yet.
///
/// New browsers fill the first free cells of the chooser grid in row-major
/// order, `grid_width` cells per row.
pub fn add_candidates(
    session: &mut EditingSession,
    source: &impl BrowserCandidateSource,
) -> Vec<EntryId<Browser>> {
    let width = session.settings().grid_width.max(1);
    let mut known: HashSet<String> = HashSet::new();
    let mut occupied: HashSet<(u32, u32)> = HashSet::new();
    for (_, browser) in session.entries::<Browser>() {
        known.insert(browser.target.to_lowercase());
        occupied.insert((browser.pos_x, browser.pos_y));
    }

    let mut cell = 0u32;
    let mut added = Vec::new();
    for (name, target) in source.candidates() {
        if !known.insert(target.to_lowercase()) {
            log::debug!("Browser {} already configured", target);
            continue;
        }
        while occupied.contains(&(cell % width, cell / width)) {
            cell += 1;
        }
        let position = (cell % width, cell / width);
        occupied.insert(position);

        let mut browser = Browser::new(name, target);
        browser.pos_x = position.0;
        browser.pos_y = position.1;
        log::info!("Adding detected browser {} at {:?}", browser.name, position);
        added.push(session.add(browser));
    }
    added
}
