use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{LoadError, SaveError};
use crate::models::{Settings, SETTINGS_FILE_VERSION};
use crate::resolve::{resolve, LaunchDecision, Modifiers};
use crate::session::EditingSession;

/// Debounce delay for settings saves (1 second)
const SAVE_DEBOUNCE_MS: u64 = 1000;

/// Loads and stores a settings aggregate.
pub trait PersistenceGateway {
    fn load(&self, path: &Path) -> Result<Settings, LoadError>;
    fn save(&self, settings: &Settings, path: &Path) -> Result<(), SaveError>;
}

/// Pretty-printed JSON documents on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonGateway;

impl PersistenceGateway for JsonGateway {
    fn load(&self, path: &Path) -> Result<Settings, LoadError> {
        let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        merge_settings_with_defaults(&content).map_err(|e| match e {
            LoadError::Malformed { source, .. } => LoadError::Malformed {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    fn save(&self, settings: &Settings, path: &Path) -> Result<(), SaveError> {
        write_settings(settings, path)
    }
}

fn write_settings(settings: &Settings, path: &Path) -> Result<(), SaveError> {
    let mut settings = settings.clone();
    settings.file_version = SETTINGS_FILE_VERSION;
    let content = serde_json::to_string_pretty(&settings)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SaveError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, content).map_err(|source| SaveError::Write {
        path: path.to_path_buf(),
        source,
    })
}

macro_rules! merge_fields {
    ($obj:expr, $settings:expr, $($key:literal => $field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $obj.get($key) {
                match serde_json::from_value(v.clone()) {
                    Ok(value) => $settings.$field = value,
                    Err(e) => log::warn!("Ignoring invalid '{}' in settings: {}", $key, e),
                }
            }
        )+
    };
}

/// Deserializes each element of an array on its own, dropping the ones
/// that do not parse.
fn merge_list<T: DeserializeOwned>(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<Vec<T>> {
    let items = obj.get(key)?.as_array()?;
    let parsed = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value(item.clone()) {
            Ok(entity) => Some(entity),
            Err(e) => {
                log::warn!("Skipping malformed {} entry #{}: {}", key, i, e);
                None
            }
        })
        .collect();
    Some(parsed)
}

/// Merges a partial settings document with defaults.
///
/// Missing fields keep their default; a field of the wrong type is logged
/// and ignored rather than failing the whole load. Entities inside a
/// collection are parsed one by one.
///
/// # Returns
/// * `Ok(Settings)` - The merged settings
/// * `Err(LoadError)` - If the text is not a JSON object
pub fn merge_settings_with_defaults(partial_json: &str) -> Result<Settings, LoadError> {
    if partial_json.trim().is_empty() {
        return Ok(Settings::default());
    }

    let json_value: serde_json::Value =
        serde_json::from_str(partial_json).map_err(|source| LoadError::Malformed {
            path: PathBuf::new(),
            source,
        })?;
    let obj = json_value.as_object().ok_or(LoadError::NotAnObject)?;

    let mut settings = Settings::default();

    if let Some(browsers) = merge_list(obj, "browsers") {
        settings.browsers = browsers;
    }
    if let Some(protocols) = merge_list(obj, "protocols") {
        settings.protocols = protocols;
    }
    if let Some(file_types) = merge_list(obj, "fileTypes") {
        settings.file_types = file_types;
    }
    if let Some(auto_urls) = merge_list(obj, "autoUrls") {
        settings.auto_urls = auto_urls;
    }

    merge_fields!(obj, settings,
        "defaultBrowserGuid" => default_browser_guid,
        "defaultDelay" => default_delay,
        "defaultMessage" => default_message,
        "optionsShortcut" => options_shortcut,
        "gridWidth" => grid_width,
        "gridHeight" => grid_height,
        "iconScale" => icon_scale,
        "showUrl" => show_url,
        "revealShortUrls" => reveal_short_urls,
        "portableMode" => portable_mode,
        "checkDefaultOnLaunch" => check_default_on_launch,
        "automaticUpdates" => automatic_updates,
        "userAgent" => user_agent,
        "fileVersion" => file_version,
    );

    if settings.file_version < SETTINGS_FILE_VERSION {
        log::info!(
            "Upgrading settings document from version {} to {}",
            settings.file_version,
            SETTINGS_FILE_VERSION
        );
        settings.file_version = SETTINGS_FILE_VERSION;
    }
    settings.normalize_default();

    Ok(settings)
}

/// SettingsManager owns the committed settings snapshot.
///
/// Features:
/// - Copy-on-read access: callers get clones, never a live reference
/// - Debounced saving to avoid excessive disk writes
/// - Missing settings file starts from defaults
pub struct SettingsManager {
    settings: Arc<RwLock<Settings>>,
    settings_path: Arc<PathBuf>,
    save_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SettingsManager {
    /// Creates a new SettingsManager for the given file.
    ///
    /// A missing file yields default settings; any other read or parse
    /// failure is returned.
    pub fn new(settings_path: PathBuf) -> Result<Self, LoadError> {
        let settings = match JsonGateway.load(&settings_path) {
            Ok(settings) => settings,
            Err(LoadError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                log::info!(
                    "No settings at {}, starting from defaults",
                    settings_path.display()
                );
                Settings::default()
            }
            Err(e) => return Err(e),
        };
        Ok(Self::with_settings(settings_path, settings))
    }

    pub fn with_settings(settings_path: PathBuf, settings: Settings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            settings_path: Arc::new(settings_path),
            save_handle: Mutex::new(None),
        }
    }

    /// Gets a clone of the current settings.
    pub fn get(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Updates the settings using a closure.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
    }

    /// Replaces the whole snapshot.
    pub fn replace(&self, settings: Settings) {
        self.update(|current| *current = settings);
    }

    /// Opens an editing session over a copy of the current settings.
    pub fn session(&self) -> EditingSession {
        EditingSession::with_settings(self.get())
    }

    /// Commits a session, persists the result and clears its modified flag.
    pub fn commit_session(&self, session: &mut EditingSession) -> Result<(), SaveError> {
        let settings = session.commit();
        self.replace(settings);
        self.save_sync()?;
        session.mark_saved();
        Ok(())
    }

    /// Resolves `input` against the current snapshot.
    pub fn resolve(&self, input: &str, modifiers: Modifiers) -> LaunchDecision {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        resolve(input, &settings, modifiers)
    }

    /// Schedules a debounced save operation.
    ///
    /// If a save is already scheduled, it will be cancelled and a new one
    /// will be scheduled. The save will occur after SAVE_DEBOUNCE_MS
    /// milliseconds. Must be called from within a tokio runtime.
    pub async fn schedule_save(&self) {
        let mut handle_guard = self.save_handle.lock().await;

        if let Some(handle) = handle_guard.take() {
            handle.abort();
        }

        let settings_ref = Arc::clone(&self.settings);
        let path_ref = Arc::clone(&self.settings_path);

        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(SAVE_DEBOUNCE_MS)).await;

            let settings = settings_ref
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Err(e) = write_settings(&settings, &path_ref) {
                log::error!("Debounced settings save failed: {}", e);
            }
        });

        *handle_guard = Some(handle);
    }

    /// Updates the settings and schedules a debounced save.
    pub async fn update_and_save<F>(&self, f: F)
    where
        F: FnOnce(&mut Settings),
    {
        self.update(f);
        self.schedule_save().await;
    }

    /// Saves the settings to disk immediately.
    pub fn save_sync(&self) -> Result<(), SaveError> {
        let settings = self.get();
        JsonGateway.save(&settings, &self.settings_path)
    }

    /// Returns the settings file path.
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutoUrl, Browser, Protocol};
    use crate::resolve::MatchReason;
    use proptest::prelude::*;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn test_settings_manager_new_no_file() {
        let temp_dir = tempdir().unwrap();
        let settings_path = temp_dir.path().join("settings.json");

        let manager = SettingsManager::new(settings_path).unwrap();
        assert_eq!(manager.get(), Settings::default());
    }

    #[test]
    fn test_settings_manager_load_existing_partial() {
        let temp_dir = tempdir().unwrap();
        let settings_path = temp_dir.path().join("settings.json");
        fs::write(&settings_path, r#"{ "defaultDelay": 12, "showUrl": false }"#).unwrap();

        let settings = SettingsManager::new(settings_path).unwrap().get();

        assert_eq!(settings.default_delay, 12);
        assert!(!settings.show_url);
        assert_eq!(settings.user_agent, Settings::default().user_agent);
        assert!(settings.browsers.is_empty());
    }

    #[test]
    fn test_settings_manager_malformed_file_is_error() {
        let temp_dir = tempdir().unwrap();
        let settings_path = temp_dir.path().join("settings.json");
        fs::write(&settings_path, "{ not json").unwrap();

        let err = SettingsManager::new(settings_path.clone()).err().unwrap();
        match err {
            LoadError::Malformed { path, .. } => assert_eq!(path, settings_path),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_gateway_missing_file_is_load_error() {
        let temp_dir = tempdir().unwrap();
        let result = JsonGateway.load(&temp_dir.path().join("absent.json"));
        assert!(matches!(result, Err(LoadError::Read { .. })));
    }

    #[test]
    fn test_gateway_round_trip() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        let browser = Browser::new("Firefox", "/usr/bin/firefox");
        settings.protocols.push(Protocol::new("https", "https://", browser.guid));
        settings.auto_urls.push(AutoUrl::new("example.com", browser.guid, -1));
        settings.browsers.push(browser.clone());
        settings.set_default_browser(browser.guid);

        JsonGateway.save(&settings, &path).unwrap();
        let loaded = JsonGateway.load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_merge_skips_malformed_entities() {
        let good = Uuid::new_v4();
        let json = format!(
            r#"{{ "browsers": [ {{ "name": "Good", "guid": "{}" }}, {{ "name": 42 }} ] }}"#,
            good
        );
        let settings = merge_settings_with_defaults(&json).unwrap();
        assert_eq!(settings.browsers.len(), 1);
        assert_eq!(settings.browsers[0].guid, good);
        assert_eq!(settings.browsers[0].scale, 1.0);
    }

    #[test]
    fn test_merge_ignores_wrong_scalar_type() {
        let settings = merge_settings_with_defaults(r#"{ "defaultDelay": "soon" }"#).unwrap();
        assert_eq!(settings.default_delay, Settings::default().default_delay);
    }

    #[test]
    fn test_merge_upgrades_file_version() {
        let settings = merge_settings_with_defaults(r#"{ "fileVersion": 1 }"#).unwrap();
        assert_eq!(settings.file_version, SETTINGS_FILE_VERSION);
    }

    #[test]
    fn test_merge_rejects_non_object() {
        assert!(matches!(
            merge_settings_with_defaults("[1, 2]"),
            Err(LoadError::NotAnObject)
        ));
        assert_eq!(merge_settings_with_defaults("").unwrap(), Settings::default());
    }

    #[test]
    fn test_commit_session_persists_and_clears_flag() {
        let temp_dir = tempdir().unwrap();
        let settings_path = temp_dir.path().join("settings.json");
        let manager = SettingsManager::new(settings_path.clone()).unwrap();

        let mut session = manager.session();
        let browser = Browser::new("Chrome", "/usr/bin/chrome");
        let id = session.add(browser.clone());
        session.set_default_browser(id);
        manager.commit_session(&mut session).unwrap();

        assert!(!session.is_modified());
        let reloaded = SettingsManager::new(settings_path).unwrap();
        assert_eq!(reloaded.get().default_browser_guid, browser.guid);

        let decision = reloaded.resolve("https://anything.org", Modifiers::default());
        assert_eq!(decision.reason, MatchReason::Default);
    }

    #[tokio::test]
    async fn test_schedule_save_writes_after_debounce() {
        let temp_dir = tempdir().unwrap();
        let settings_path = temp_dir.path().join("settings.json");
        let manager = SettingsManager::new(settings_path.clone()).unwrap();

        manager.update_and_save(|s| s.default_delay = 21).await;
        assert!(!settings_path.exists());

        sleep(Duration::from_millis(SAVE_DEBOUNCE_MS + 500)).await;
        let content = fs::read_to_string(&settings_path).unwrap();
        assert!(content.contains("\"defaultDelay\": 21"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Scalars present in a partial document are used; everything else
        /// keeps its default.
        #[test]
        fn prop_merge_preserves_defaults(
            delay in proptest::option::of(0u32..120),
            message in proptest::option::of("[a-zA-Z ]{0,20}"),
            show_url in proptest::option::of(any::<bool>()),
        ) {
            let mut obj = serde_json::Map::new();
            if let Some(v) = delay {
                obj.insert("defaultDelay".to_string(), serde_json::json!(v));
            }
            if let Some(v) = &message {
                obj.insert("defaultMessage".to_string(), serde_json::json!(v));
            }
            if let Some(v) = show_url {
                obj.insert("showUrl".to_string(), serde_json::json!(v));
            }

            let settings = merge_settings_with_defaults(&serde_json::to_string(&obj).unwrap()).unwrap();
            let defaults = Settings::default();

            prop_assert_eq!(settings.default_delay, delay.unwrap_or(defaults.default_delay));
            prop_assert_eq!(&settings.default_message, message.as_ref().unwrap_or(&defaults.default_message));
            prop_assert_eq!(settings.show_url, show_url.unwrap_or(defaults.show_url));
            prop_assert_eq!(&settings.user_agent, &defaults.user_agent);
            prop_assert_eq!(settings.grid_width, defaults.grid_width);
        }
    }
}
