use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::SaveError;

/// Directory name under the platform config directory
pub const APP_DIR_NAME: &str = "browser-chooser";
/// Settings document file name
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// AppPaths describes where the application keeps its data.
///
/// The structure is:
/// - `{base_dir}/settings.json` - Current settings document
/// - `{base_dir}/backups/` - Timestamped copies taken before imports
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    /// Base data directory for the application
    pub base_dir: PathBuf,
    /// Path to the settings document
    pub settings_file: PathBuf,
    /// Directory for settings backups
    pub backups_dir: PathBuf,
}

impl AppPaths {
    /// Creates paths under the platform config directory.
    ///
    /// On Linux: ~/.config/browser-chooser/
    /// On macOS: ~/Library/Application Support/browser-chooser/
    /// On Windows: C:\Users\{user}\AppData\Roaming\browser-chooser\
    pub fn new() -> io::Result<Self> {
        let base_dir = dirs::config_dir()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "Could not determine config directory",
                )
            })?
            .join(APP_DIR_NAME);

        Ok(Self::new_with_base(&base_dir))
    }

    /// Creates paths rooted at a custom base directory.
    /// Useful for testing and portable installs.
    pub fn new_with_base(base_dir: &Path) -> Self {
        let base_dir = base_dir.to_path_buf();
        let settings_file = base_dir.join(SETTINGS_FILE_NAME);
        let backups_dir = base_dir.join("backups");

        Self {
            base_dir,
            settings_file,
            backups_dir,
        }
    }

    /// Prefers a portable install (settings next to the executable) over the
    /// per-user config directory.
    pub fn discover() -> io::Result<Self> {
        let portable = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .filter(|dir| dir.join(SETTINGS_FILE_NAME).is_file());

        match portable {
            Some(dir) => {
                log::info!("Using portable settings in {}", dir.display());
                Ok(Self::new_with_base(&dir))
            }
            None => Self::new(),
        }
    }

    /// Ensures the base and backup directories exist.
    pub fn ensure_directories(&self) -> io::Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        fs::create_dir_all(&self.backups_dir)?;
        Ok(())
    }

    /// Backup file path for a given moment.
    pub fn backup_path_at(&self, at: DateTime<Local>) -> PathBuf {
        let stamp = at.format("%Y%m%d%H%M%S");
        self.backups_dir.join(format!("settings-{}.json", stamp))
    }

    /// First backup path for `at` that is not taken yet. Later backups within
    /// the same second get a `-1`, `-2`, ... suffix.
    fn free_backup_path(&self, at: DateTime<Local>) -> PathBuf {
        let first = self.backup_path_at(at);
        if !first.exists() {
            return first;
        }
        let stamp = at.format("%Y%m%d%H%M%S");
        (1u32..)
            .map(|n| self.backups_dir.join(format!("settings-{}-{}.json", stamp, n)))
            .find(|path| !path.exists())
            .unwrap_or(first)
    }

    /// Copies the current settings document into the backups directory.
    ///
    /// # Returns
    /// * `Ok(Some(path))` - Where the backup was written
    /// * `Ok(None)` - No settings document exists yet
    /// * `Err(SaveError)` - If copying fails
    pub fn backup_settings(&self) -> Result<Option<PathBuf>, SaveError> {
        if !self.settings_file.is_file() {
            return Ok(None);
        }
        fs::create_dir_all(&self.backups_dir).map_err(|source| SaveError::Write {
            path: self.backups_dir.clone(),
            source,
        })?;

        let backup = self.free_backup_path(Local::now());
        fs::copy(&self.settings_file, &backup).map_err(|source| SaveError::Write {
            path: backup.clone(),
            source,
        })?;
        log::info!("Backed up settings to {}", backup.display());
        Ok(Some(backup))
    }

    /// Existing backups, oldest first.
    pub fn list_backups(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.backups_dir) else {
            return vec![];
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("settings-") && n.ends_with(".json"))
            })
            .collect();
        backups.sort_by_key(|path| backup_order(path));
        backups
    }
}

/// Sort key for backup files: timestamp, then same-second sequence number.
fn backup_order(path: &Path) -> (String, u32) {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("settings-"))
        .unwrap_or_default();
    match stem.split_once('-') {
        Some((stamp, n)) => (stamp.to_string(), n.parse().unwrap_or(0)),
        None => (stem.to_string(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_app_paths_new_with_base() {
        let temp_dir = tempdir().unwrap();
        let paths = AppPaths::new_with_base(temp_dir.path());

        assert_eq!(paths.base_dir, temp_dir.path());
        assert_eq!(paths.settings_file, temp_dir.path().join("settings.json"));
        assert_eq!(paths.backups_dir, temp_dir.path().join("backups"));
    }

    #[test]
    fn test_ensure_directories_idempotent() {
        let temp_dir = tempdir().unwrap();
        let paths = AppPaths::new_with_base(&temp_dir.path().join("app"));

        assert!(!paths.backups_dir.exists());
        paths.ensure_directories().unwrap();
        paths.ensure_directories().unwrap();
        assert!(paths.base_dir.is_dir());
        assert!(paths.backups_dir.is_dir());
    }

    #[test]
    fn test_backup_path_format() {
        let temp_dir = tempdir().unwrap();
        let paths = AppPaths::new_with_base(temp_dir.path());
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(
            paths.backup_path_at(at),
            temp_dir.path().join("backups").join("settings-20240309140507.json")
        );
    }

    #[test]
    fn test_backup_without_settings_is_none() {
        let temp_dir = tempdir().unwrap();
        let paths = AppPaths::new_with_base(temp_dir.path());
        assert!(paths.backup_settings().unwrap().is_none());
        assert!(paths.list_backups().is_empty());
    }

    #[test]
    fn test_backups_in_same_second_do_not_collide() {
        let temp_dir = tempdir().unwrap();
        let paths = AppPaths::new_with_base(temp_dir.path());
        fs::create_dir_all(&paths.backups_dir).unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let first = paths.free_backup_path(at);
        fs::write(&first, "first").unwrap();
        let second = paths.free_backup_path(at);
        fs::write(&second, "second").unwrap();
        let third = paths.free_backup_path(at);

        assert_ne!(first, second);
        assert_eq!(second, paths.backups_dir.join("settings-20240309140507-1.json"));
        assert_eq!(third, paths.backups_dir.join("settings-20240309140507-2.json"));
        assert_eq!(fs::read_to_string(&first).unwrap(), "first");
        assert_eq!(paths.list_backups(), vec![first, second]);
    }

    #[test]
    fn test_repeated_backups_keep_every_copy() {
        let temp_dir = tempdir().unwrap();
        let paths = AppPaths::new_with_base(temp_dir.path());
        fs::write(&paths.settings_file, "{\"defaultDelay\": 1}").unwrap();
        let a = paths.backup_settings().unwrap().unwrap();
        fs::write(&paths.settings_file, "{\"defaultDelay\": 2}").unwrap();
        let b = paths.backup_settings().unwrap().unwrap();

        assert_ne!(a, b);
        assert_eq!(fs::read_to_string(&a).unwrap(), "{\"defaultDelay\": 1}");
        assert_eq!(paths.list_backups().len(), 2);
    }

    #[test]
    fn test_backup_copies_settings() {
        let temp_dir = tempdir().unwrap();
        let paths = AppPaths::new_with_base(temp_dir.path());
        fs::write(&paths.settings_file, "{\"defaultDelay\": 3}").unwrap();

        let backup = paths.backup_settings().unwrap().unwrap();

        assert_eq!(fs::read_to_string(&backup).unwrap(), "{\"defaultDelay\": 3}");
        assert_eq!(paths.list_backups(), vec![backup]);
    }
}
