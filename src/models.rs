use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version stamped into every settings document written by this crate.
pub const SETTINGS_FILE_VERSION: u32 = 3;

/// Default countdown before the default browser auto-launches (seconds)
pub const DEFAULT_DELAY_SECONDS: u32 = 5;

/// Common surface shared by the four identity-bearing entity kinds.
///
/// The editing session and the merge pipeline are generic over this trait,
/// so they only need to know how to read and mint a persistent identity.
pub trait Entity: Clone {
    fn guid(&self) -> Uuid;
    fn set_guid(&mut self, guid: Uuid);

    /// Assigns a fresh identity when the entity has none yet.
    fn ensure_guid(&mut self) -> Uuid {
        if self.guid().is_nil() {
            self.set_guid(Uuid::new_v4());
        }
        self.guid()
    }
}

/// A configured launch target.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Browser {
    pub name: String,
    /// Executable path
    pub target: String,
    /// Argument template; may contain [`crate::resolve::URL_PLACEHOLDER`]
    pub arguments: String,
    pub guid: Uuid,
    pub hotkey: Option<char>,
    pub pos_x: u32,
    pub pos_y: u32,
    pub scale: f64,
    pub icon_index: i32,
    pub category: String,
    pub visible: bool,
    pub is_default: bool,
    pub custom_image_path: Option<String>,
}

impl Default for Browser {
    fn default() -> Self {
        Self {
            name: String::new(),
            target: String::new(),
            arguments: String::new(),
            guid: Uuid::nil(),
            hotkey: None,
            pos_x: 0,
            pos_y: 0,
            scale: 1.0,
            icon_index: 0,
            category: String::new(),
            visible: true,
            is_default: false,
            custom_image_path: None,
        }
    }
}

impl Browser {
    /// Creates a browser with a fresh identity.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            guid: Uuid::new_v4(),
            ..Default::default()
        }
    }
}

/// A URI scheme bound to a browser, e.g. `http://` -> Firefox.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Protocol {
    pub name: String,
    /// Scheme prefix, e.g. `https://` or `mailto:`
    pub header: String,
    pub guid: Uuid,
    /// Nil means unassigned
    pub browser_guid: Uuid,
    pub category: String,
    pub active: bool,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            name: String::new(),
            header: String::new(),
            guid: Uuid::nil(),
            browser_guid: Uuid::nil(),
            category: String::new(),
            active: true,
        }
    }
}

impl Protocol {
    pub fn new(name: impl Into<String>, header: impl Into<String>, browser_guid: Uuid) -> Self {
        Self {
            name: name.into(),
            header: header.into(),
            guid: Uuid::new_v4(),
            browser_guid,
            ..Default::default()
        }
    }
}

/// A file extension bound to a browser.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FileType {
    pub name: String,
    /// Extension including the leading dot, e.g. `.pdf`
    pub extension: String,
    pub guid: Uuid,
    pub browser_guid: Uuid,
    pub category: String,
    pub active: bool,
}

impl Default for FileType {
    fn default() -> Self {
        Self {
            name: String::new(),
            extension: String::new(),
            guid: Uuid::nil(),
            browser_guid: Uuid::nil(),
            category: String::new(),
            active: true,
        }
    }
}

impl FileType {
    pub fn new(name: impl Into<String>, extension: impl Into<String>, browser_guid: Uuid) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            guid: Uuid::new_v4(),
            browser_guid,
            ..Default::default()
        }
    }
}

/// An ordered, first-match-wins rule mapping incoming URLs to a browser.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoUrl {
    pub url_pattern: String,
    pub guid: Uuid,
    /// Nil means "use the default browser"
    pub browser_guid: Uuid,
    /// Seconds before auto-launch; negative defers to `Settings::default_delay`
    pub delay_time: i32,
    pub category: String,
}

impl Default for AutoUrl {
    fn default() -> Self {
        Self {
            url_pattern: String::new(),
            guid: Uuid::nil(),
            browser_guid: Uuid::nil(),
            delay_time: -1,
            category: String::new(),
        }
    }
}

impl AutoUrl {
    pub fn new(url_pattern: impl Into<String>, browser_guid: Uuid, delay_time: i32) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            guid: Uuid::new_v4(),
            browser_guid,
            delay_time,
            ..Default::default()
        }
    }

    /// Effective countdown, never negative.
    pub fn effective_delay(&self, default_delay: u32) -> u32 {
        u32::try_from(self.delay_time).unwrap_or(default_delay)
    }
}

macro_rules! impl_entity {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Entity for $ty {
                fn guid(&self) -> Uuid {
                    self.guid
                }

                fn set_guid(&mut self, guid: Uuid) {
                    self.guid = guid;
                }
            }
        )+
    };
}

impl_entity!(Browser, Protocol, FileType, AutoUrl);

/// A BrowserGuid that points at no configured browser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DanglingReference {
    pub kind: &'static str,
    pub owner: Uuid,
    pub browser_guid: Uuid,
}

/// The full persisted configuration: scalar preferences plus the four
/// ordered entity collections.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub browsers: Vec<Browser>,
    pub protocols: Vec<Protocol>,
    pub file_types: Vec<FileType>,
    pub auto_urls: Vec<AutoUrl>,
    pub default_browser_guid: Uuid,
    pub default_delay: u32,
    pub default_message: String,
    pub options_shortcut: char,
    pub grid_width: u32,
    pub grid_height: u32,
    pub icon_scale: f64,
    pub show_url: bool,
    pub reveal_short_urls: bool,
    pub portable_mode: bool,
    pub check_default_on_launch: bool,
    pub automatic_updates: bool,
    pub user_agent: String,
    pub file_version: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browsers: vec![],
            protocols: vec![],
            file_types: vec![],
            auto_urls: vec![],
            default_browser_guid: Uuid::nil(),
            default_delay: DEFAULT_DELAY_SECONDS,
            default_message: "Opening default browser in {s} seconds".to_string(),
            options_shortcut: 'O',
            grid_width: 5,
            grid_height: 1,
            icon_scale: 1.0,
            show_url: true,
            reveal_short_urls: false,
            portable_mode: false,
            check_default_on_launch: false,
            automatic_updates: false,
            user_agent: "BrowserChooser".to_string(),
            file_version: SETTINGS_FILE_VERSION,
        }
    }
}

impl Settings {
    /// Looks up a browser by identity. Nil and dangling references both
    /// yield `None`.
    pub fn find_browser(&self, guid: Uuid) -> Option<&Browser> {
        if guid.is_nil() {
            return None;
        }
        self.browsers.iter().find(|b| b.guid == guid)
    }

    pub fn default_browser(&self) -> Option<&Browser> {
        self.find_browser(self.default_browser_guid)
    }

    /// First browser bound to the given hotkey digit.
    pub fn browser_by_hotkey(&self, key: char) -> Option<&Browser> {
        if !key.is_ascii_digit() {
            return None;
        }
        self.browsers.iter().find(|b| b.hotkey == Some(key))
    }

    /// Makes `guid` the single default browser.
    ///
    /// Clears `is_default` on every other browser. Passing the nil Guid
    /// clears the default entirely. Returns `false` (and changes nothing)
    /// when `guid` names no configured browser.
    pub fn set_default_browser(&mut self, guid: Uuid) -> bool {
        if !guid.is_nil() && self.find_browser(guid).is_none() {
            return false;
        }
        for browser in &mut self.browsers {
            browser.is_default = browser.guid == guid;
        }
        self.default_browser_guid = guid;
        true
    }

    /// Restores the single-default invariant after a bulk change.
    ///
    /// `default_browser_guid` wins when it resolves; otherwise the first
    /// browser flagged `is_default` is promoted.
    pub fn normalize_default(&mut self) {
        let guid = if self.default_browser().is_some() {
            self.default_browser_guid
        } else {
            self.browsers
                .iter()
                .find(|b| b.is_default)
                .map(|b| b.guid)
                .unwrap_or(self.default_browser_guid)
        };
        for browser in &mut self.browsers {
            browser.is_default = !guid.is_nil() && browser.guid == guid;
        }
        self.default_browser_guid = guid;
    }

    /// Lists every rule whose BrowserGuid is set but matches no browser.
    pub fn validate(&self) -> Vec<DanglingReference> {
        let mut dangling = Vec::new();
        let mut check = |kind: &'static str, owner: Uuid, browser_guid: Uuid| {
            if !browser_guid.is_nil() && self.find_browser(browser_guid).is_none() {
                dangling.push(DanglingReference { kind, owner, browser_guid });
            }
        };
        for p in &self.protocols {
            check("protocol", p.guid, p.browser_guid);
        }
        for f in &self.file_types {
            check("file-type", f.guid, f.browser_guid);
        }
        for a in &self.auto_urls {
            check("url-pattern", a.guid, a.browser_guid);
        }
        dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.default_delay, DEFAULT_DELAY_SECONDS);
        assert_eq!(settings.file_version, SETTINGS_FILE_VERSION);
        assert!(settings.browsers.is_empty());
        assert!(settings.default_browser_guid.is_nil());
    }

    #[test]
    fn test_browser_default_is_visible_and_unscaled() {
        let browser = Browser::default();
        assert!(browser.visible);
        assert_eq!(browser.scale, 1.0);
        assert!(browser.guid.is_nil());
    }

    #[test]
    fn test_ensure_guid_keeps_existing() {
        let mut browser = Browser::new("Firefox", "firefox");
        let before = browser.guid;
        assert_eq!(browser.ensure_guid(), before);

        let mut blank = Browser::default();
        let minted = blank.ensure_guid();
        assert!(!minted.is_nil());
    }

    #[test]
    fn test_auto_url_effective_delay() {
        let rule = AutoUrl::new("example.com", Uuid::nil(), -1);
        assert_eq!(rule.effective_delay(7), 7);
        let rule = AutoUrl::new("example.com", Uuid::nil(), 0);
        assert_eq!(rule.effective_delay(7), 0);
        let rule = AutoUrl::new("example.com", Uuid::nil(), 12);
        assert_eq!(rule.effective_delay(7), 12);
    }

    #[test]
    fn test_find_browser_nil_is_none() {
        let mut settings = Settings::default();
        settings.browsers.push(Browser::new("X", "x"));
        assert!(settings.find_browser(Uuid::nil()).is_none());
        assert!(settings.find_browser(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_set_default_browser_rejects_unknown() {
        let mut settings = Settings::default();
        settings.browsers.push(Browser::new("X", "x"));
        assert!(!settings.set_default_browser(Uuid::new_v4()));
        assert!(settings.default_browser_guid.is_nil());
    }

    #[test]
    fn test_browser_by_hotkey() {
        let mut settings = Settings::default();
        let mut b = Browser::new("X", "x");
        b.hotkey = Some('3');
        settings.browsers.push(b.clone());
        assert_eq!(settings.browser_by_hotkey('3').map(|b| b.guid), Some(b.guid));
        assert!(settings.browser_by_hotkey('4').is_none());
        assert!(settings.browser_by_hotkey('a').is_none());
    }

    #[test]
    fn test_normalize_default_prefers_guid_field() {
        let mut settings = Settings::default();
        let mut a = Browser::new("A", "a");
        a.is_default = true;
        let b = Browser::new("B", "b");
        settings.default_browser_guid = b.guid;
        settings.browsers = vec![a, b.clone()];

        settings.normalize_default();

        assert_eq!(settings.default_browser_guid, b.guid);
        assert!(!settings.browsers[0].is_default);
        assert!(settings.browsers[1].is_default);
    }

    #[test]
    fn test_normalize_default_promotes_first_flagged() {
        let mut settings = Settings::default();
        let mut a = Browser::new("A", "a");
        a.is_default = true;
        let mut b = Browser::new("B", "b");
        b.is_default = true;
        settings.browsers = vec![a.clone(), b];

        settings.normalize_default();

        assert_eq!(settings.default_browser_guid, a.guid);
        assert_eq!(settings.browsers.iter().filter(|b| b.is_default).count(), 1);
    }

    #[test]
    fn test_validate_reports_dangling() {
        let mut settings = Settings::default();
        let browser = Browser::new("X", "x");
        let ghost = Uuid::new_v4();
        settings.browsers.push(browser.clone());
        settings.protocols.push(Protocol::new("http", "http://", browser.guid));
        settings.file_types.push(FileType::new("PDF", ".pdf", ghost));
        settings.auto_urls.push(AutoUrl::new("example.com", Uuid::nil(), -1));

        let dangling = settings.validate();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].kind, "file-type");
        assert_eq!(dangling[0].browser_guid, ghost);
    }

    #[test]
    fn test_settings_serializes_guids_as_uuid_strings() {
        let mut settings = Settings::default();
        let browser = Browser::new("X", "x");
        settings.browsers.push(browser.clone());
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(
            json["browsers"][0]["guid"],
            serde_json::json!(browser.guid.to_string())
        );
        assert!(json.get("autoUrls").is_some());
        assert!(json["autoUrls"].is_array());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Whatever the prior flags, choosing a default leaves exactly one
        /// browser flagged.
        #[test]
        fn prop_set_default_leaves_single_default(
            flags in proptest::collection::vec(any::<bool>(), 1..8),
            pick in any::<proptest::sample::Index>(),
        ) {
            let mut settings = Settings::default();
            for (i, flag) in flags.iter().enumerate() {
                let mut b = Browser::new(format!("B{}", i), "x");
                b.is_default = *flag;
                settings.browsers.push(b);
            }
            let chosen = settings.browsers[pick.index(flags.len())].guid;

            prop_assert!(settings.set_default_browser(chosen));

            let defaults: Vec<_> = settings.browsers.iter().filter(|b| b.is_default).collect();
            prop_assert_eq!(defaults.len(), 1);
            prop_assert_eq!(defaults[0].guid, chosen);
            prop_assert_eq!(settings.default_browser_guid, chosen);
        }
    }
}
