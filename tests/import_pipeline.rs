use std::fs;

use browser_chooser_lib::config::{JsonGateway, PersistenceGateway, SettingsManager};
use browser_chooser_lib::filesystem::AppPaths;
use browser_chooser_lib::import::{import_and_save, import_file, MergePolicy};
use browser_chooser_lib::resolve::{resolve, MatchReason, Modifiers};
use browser_chooser_lib::session::EditingSession;
use browser_chooser_lib::{Browser, ImportError, Settings};
use tempfile::tempdir;
use uuid::Uuid;

const B1: &str = "6f9619ff-8b86-d011-b42d-00c04fc964ff";
const B2: &str = "0e984725-c51c-4bf4-9960-e1c80e27aba0";

fn legacy_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<Settings xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <DefaultDelay>3</DefaultDelay>
  <Browsers>
    <Browser>
      <Name>Firefox</Name>
      <Target>/usr/bin/firefox</Target>
      <Arguments>-new-tab {{url}}</Arguments>
      <Guid>{{{B1}}}</Guid>
      <Hotkey>1</Hotkey>
      <IsDefault>true</IsDefault>
    </Browser>
    <Browser>
      <Name>Chromium</Name>
      <Target>/usr/bin/chromium</Target>
      <Guid>{B2}</Guid>
      <Hotkey>2</Hotkey>
    </Browser>
  </Browsers>
  <Protocols>
    <Protocol>
      <Name>HTTPS</Name>
      <Header>https://</Header>
      <SupportingBrowsers>
        <guid>{B1}</guid>
        <guid>{B2}</guid>
      </SupportingBrowsers>
    </Protocol>
  </Protocols>
  <FileTypes>
    <FileType>
      <Name>PDF</Name>
      <Extension>.PDF</Extension>
      <SupportingBrowsers><guid>{B2}</guid></SupportingBrowsers>
    </FileType>
  </FileTypes>
  <AutoURLs>
    <AutoURL>
      <URL>intranet.example.com</URL>
      <Delay>0</Delay>
      <SupportingBrowsers><guid>{B2}</guid></SupportingBrowsers>
    </AutoURL>
  </AutoURLs>
</Settings>"#
    )
}

#[test]
fn legacy_import_survives_save_and_reload() {
    let temp_dir = tempdir().unwrap();
    let paths = AppPaths::new_with_base(temp_dir.path());
    paths.ensure_directories().unwrap();
    let legacy = temp_dir.path().join("BrowserChooser2Config.xml");
    fs::write(&legacy, legacy_xml()).unwrap();

    let manager = SettingsManager::new(paths.settings_file.clone()).unwrap();
    let report =
        import_and_save(&manager, &paths, &legacy, MergePolicy::everything(false)).unwrap();
    assert_eq!(report.browsers, 2);
    assert_eq!(report.protocols, 1);

    let reloaded = JsonGateway.load(&paths.settings_file).unwrap();
    assert_eq!(reloaded, manager.get());

    let b1 = Uuid::parse_str(B1).unwrap();
    let b2 = Uuid::parse_str(B2).unwrap();
    assert_eq!(reloaded.protocols[0].browser_guid, b1);
    assert_eq!(reloaded.default_browser_guid, b1);
    assert_eq!(reloaded.default_delay, 3);

    let pattern = resolve("https://intranet.example.com/wiki", &reloaded, Modifiers::default());
    assert_eq!(pattern.reason, MatchReason::UrlPattern);
    assert_eq!(pattern.browser.as_ref().map(|b| b.guid), Some(b2));
    assert_eq!(pattern.delay_seconds, 0);

    let protocol = resolve("https://example.org", &reloaded, Modifiers::default());
    assert_eq!(protocol.reason, MatchReason::Protocol);
    assert_eq!(protocol.arguments, "-new-tab https://example.org");
    assert_eq!(protocol.delay_seconds, 3);

    let file = resolve("/home/me/report.pdf", &reloaded, Modifiers::default());
    assert_eq!(file.reason, MatchReason::FileType);
    assert_eq!(file.browser.map(|b| b.guid), Some(b2));
}

#[test]
fn second_import_merges_without_duplicates() {
    let temp_dir = tempdir().unwrap();
    let legacy = temp_dir.path().join("old.xml");
    fs::write(&legacy, legacy_xml()).unwrap();

    let mut settings = Settings::default();
    import_file(&legacy, &mut settings, MergePolicy::default()).unwrap();
    let second = import_file(&legacy, &mut settings, MergePolicy::default()).unwrap();

    assert_eq!(second.browsers, 0);
    assert_eq!(settings.browsers.len(), 2);
    assert_eq!(settings.browsers.iter().filter(|b| b.is_default).count(), 1);
}

#[test]
fn failed_import_leaves_disk_untouched() {
    let temp_dir = tempdir().unwrap();
    let paths = AppPaths::new_with_base(temp_dir.path());
    let mut settings = Settings::default();
    settings.browsers.push(Browser::new("Keep", "keep"));
    let manager = SettingsManager::with_settings(paths.settings_file.clone(), settings);
    manager.save_sync().unwrap();
    let before = fs::read_to_string(&paths.settings_file).unwrap();

    let broken = temp_dir.path().join("broken.xml");
    fs::write(&broken, "<Settings><Browsers></Settings>").unwrap();
    let err = import_and_save(&manager, &paths, &broken, MergePolicy::everything(true))
        .unwrap_err();

    assert!(matches!(err, ImportError::Legacy(_)));
    assert_eq!(fs::read_to_string(&paths.settings_file).unwrap(), before);
    assert_eq!(manager.get().browsers[0].name, "Keep");
    assert!(paths.list_backups().is_empty());
}

#[test]
fn edited_session_commits_through_manager() {
    let temp_dir = tempdir().unwrap();
    let paths = AppPaths::new_with_base(temp_dir.path());
    let manager = SettingsManager::new(paths.settings_file.clone()).unwrap();

    let mut session: EditingSession = manager.session();
    let mut browser = Browser::new("Firefox", "/usr/bin/firefox");
    browser.is_default = true;
    let id = session.add(browser);
    let copy = session.duplicate(id).unwrap();
    manager.commit_session(&mut session).unwrap();

    assert!(!session.is_modified());
    let reloaded = JsonGateway.load(&paths.settings_file).unwrap();
    assert_eq!(reloaded.browsers.len(), 2);
    assert_ne!(reloaded.browsers[0].guid, reloaded.browsers[1].guid);
    assert!(!session.get(copy).unwrap().is_default);
    assert_eq!(
        resolve("https://anything", &reloaded, Modifiers::default()).reason,
        MatchReason::Default
    );
}
