//! Browser Chooser 2 XML settings reader and converter.
//!
//! Reading happens in two steps: the XML is parsed into a
//! [`LegacyDocument`] holding raw field text, then [`convert`] coerces those
//! fields into the current [`Settings`] shape. Unknown elements are
//! ignored; unparsable or missing values take current defaults.

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use uuid::Uuid;

use crate::error::ParseError;
use crate::models::{
    AutoUrl, Browser, FileType, Protocol, Settings, SETTINGS_FILE_VERSION,
};

const ROOT_ELEMENT: &str = "Settings";

// ============================================================================
// Element tree
// ============================================================================

/// Minimal element tree built from the quick_xml event stream.
#[derive(Debug, Clone, Default)]
struct XmlNode {
    name: String,
    text: String,
    nil: bool,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn open(e: &BytesStart, position: usize) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let mut nil = false;
        for attr in e.attributes() {
            let attr = attr.map_err(|err| ParseError::Xml {
                position,
                message: format!("attribute error: {}", err),
            })?;
            if attr.key.local_name().as_ref() == b"nil" {
                nil = attr.value.as_ref().eq_ignore_ascii_case(b"true");
            }
        }
        Ok(Self {
            name,
            nil,
            ..Default::default()
        })
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of a direct child; absent for nil, empty or missing elements.
    fn text_of(&self, name: &str) -> Option<String> {
        let node = self.child(name)?;
        let text = node.text.trim();
        if node.nil || text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    /// Children of `<wrapper>` named `item`, e.g. `<Browsers><Browser>`.
    fn items<'a>(&'a self, wrapper: &str, item: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.child(wrapper)
            .into_iter()
            .flat_map(move |w| w.children.iter().filter(move |c| c.name == item))
    }
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    }
}

fn parse_tree(xml: &str) -> Result<XmlNode, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    let mut buf = Vec::new();

    loop {
        let position = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(XmlNode::open(e, position)?),
            Ok(Event::Empty(ref e)) => {
                let node = XmlNode::open(e, position)?;
                attach(&mut stack, &mut root, node);
            }
            Ok(Event::Text(ref e)) => {
                if let Some(top) = stack.last_mut() {
                    let text = e.unescape().map_err(|err| ParseError::Xml {
                        position,
                        message: err.to_string(),
                    })?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Xml {
            position: reader.buffer_position(),
            message: format!("unexpected end of document inside <{}>", open.name),
        });
    }

    match root {
        Some(node) if node.name == ROOT_ELEMENT => Ok(node),
        _ => Err(ParseError::MissingRoot(ROOT_ELEMENT)),
    }
}

// ============================================================================
// Legacy document (raw field text)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyBrowser {
    pub name: Option<String>,
    pub target: Option<String>,
    pub arguments: Option<String>,
    pub guid: Option<String>,
    pub hotkey: Option<String>,
    pub pos_x: Option<String>,
    pub pos_y: Option<String>,
    /// Decimal in the legacy schema
    pub scale: Option<String>,
    pub icon_index: Option<String>,
    pub category: Option<String>,
    pub visible: Option<String>,
    pub is_default: Option<String>,
    pub custom_image_path: Option<String>,
}

/// Protocol or file-type rule. `matcher` is the header or the extension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyRule {
    pub name: Option<String>,
    pub matcher: Option<String>,
    pub guid: Option<String>,
    pub category: Option<String>,
    pub active: Option<String>,
    pub supporting_browsers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyAutoUrl {
    pub url: Option<String>,
    pub guid: Option<String>,
    pub delay: Option<String>,
    pub category: Option<String>,
    pub supporting_browsers: Vec<String>,
}

/// A Browser Chooser 2 settings document, fields still as raw text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyDocument {
    pub browsers: Vec<LegacyBrowser>,
    pub protocols: Vec<LegacyRule>,
    pub file_types: Vec<LegacyRule>,
    pub auto_urls: Vec<LegacyAutoUrl>,
    pub default_browser: Option<String>,
    pub default_delay: Option<String>,
    pub default_message: Option<String>,
    pub options_shortcut: Option<String>,
    pub show_url: Option<String>,
    pub reveal_url: Option<String>,
    pub portable_mode: Option<String>,
    pub automatic_updates: Option<String>,
    pub check_default: Option<String>,
    pub user_agent: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub scale_browser: Option<String>,
}

fn supporting_browsers(node: &XmlNode) -> Vec<String> {
    node.child("SupportingBrowsers")
        .map(|list| {
            list.children
                .iter()
                .map(|g| g.text.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl LegacyDocument {
    fn from_tree(root: &XmlNode) -> Self {
        let browsers = root
            .items("Browsers", "Browser")
            .map(|b| LegacyBrowser {
                name: b.text_of("Name"),
                target: b.text_of("Target"),
                arguments: b.text_of("Arguments"),
                guid: b.text_of("Guid"),
                hotkey: b.text_of("Hotkey"),
                pos_x: b.text_of("PosX"),
                pos_y: b.text_of("PosY"),
                scale: b.text_of("Scale"),
                icon_index: b.text_of("IconIndex"),
                category: b.text_of("Category"),
                visible: b.text_of("Visible"),
                is_default: b.text_of("IsDefault"),
                custom_image_path: b.text_of("CustomImagePath"),
            })
            .collect();

        let protocols = root
            .items("Protocols", "Protocol")
            .map(|p| LegacyRule {
                name: p.text_of("Name"),
                matcher: p.text_of("Header"),
                guid: p.text_of("Guid"),
                category: p.text_of("Category"),
                active: p.text_of("Active"),
                supporting_browsers: supporting_browsers(p),
            })
            .collect();

        let file_types = root
            .items("FileTypes", "FileType")
            .map(|f| LegacyRule {
                name: f.text_of("Name"),
                // Browser Chooser 2 spelled it "Extention".
                matcher: f.text_of("Extention").or_else(|| f.text_of("Extension")),
                guid: f.text_of("Guid"),
                category: f.text_of("Category"),
                active: f.text_of("Active"),
                supporting_browsers: supporting_browsers(f),
            })
            .collect();

        let auto_urls = root
            .items("AutoURLs", "AutoURL")
            .map(|a| LegacyAutoUrl {
                url: a.text_of("URL"),
                guid: a.text_of("Guid"),
                delay: a.text_of("Delay"),
                category: a.text_of("Category"),
                supporting_browsers: supporting_browsers(a),
            })
            .collect();

        Self {
            browsers,
            protocols,
            file_types,
            auto_urls,
            default_browser: root.text_of("DefaultBrowser"),
            default_delay: root.text_of("DefaultDelay"),
            default_message: root.text_of("DefaultMessage"),
            options_shortcut: root.text_of("OptionsShortcut"),
            show_url: root.text_of("ShowURL"),
            reveal_url: root.text_of("RevealURL"),
            portable_mode: root.text_of("PortableMode"),
            automatic_updates: root.text_of("AutomaticUpdates"),
            check_default: root.text_of("CheckDefaultOnLaunch"),
            user_agent: root.text_of("UserAgent"),
            width: root.text_of("Width"),
            height: root.text_of("Height"),
            scale_browser: root.text_of("ScaleBrowser"),
        }
    }
}

/// Parses a legacy document from XML text.
pub fn parse_str(xml: &str) -> Result<LegacyDocument, ParseError> {
    let root = parse_tree(xml)?;
    Ok(LegacyDocument::from_tree(&root))
}

/// Reads and parses a legacy document from disk.
pub fn parse_file(path: &Path) -> Result<LegacyDocument, ParseError> {
    let content = fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&content)
}

/// Whether `content` looks like a legacy XML document rather than JSON.
pub fn looks_like_legacy(content: &str) -> bool {
    content.trim_start_matches('\u{feff}').trim_start().starts_with('<')
}

// ============================================================================
// Schema conversion
// ============================================================================

fn parse_bool(value: Option<&String>, default: bool) -> bool {
    match value.map(|v| v.to_ascii_lowercase()) {
        Some(v) if v == "true" || v == "1" => true,
        Some(v) if v == "false" || v == "0" => false,
        Some(v) => {
            log::debug!("Unrecognised legacy boolean '{}', using {}", v, default);
            default
        }
        None => default,
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Legacy decimals may use either separator.
fn parse_decimal(value: Option<&String>, default: f64) -> f64 {
    value
        .and_then(|v| v.replace(',', ".").parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn parse_position(value: Option<&String>) -> u32 {
    let raw: i64 = parse_number(value, 0);
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}

fn parse_guid(value: Option<&String>) -> Option<Uuid> {
    value.and_then(|v| Uuid::parse_str(v.trim_matches(['{', '}'])).ok())
}

/// Identity for a converted entity; legacy rows without one get a new Guid.
fn identity(value: Option<&String>, what: &str) -> Uuid {
    parse_guid(value).unwrap_or_else(|| {
        log::info!("Legacy {} has no usable Guid, minting one", what);
        Uuid::new_v4()
    })
}

/// Collapses a legacy browser list onto one reference: the first entry
/// that parses as a Guid. Additional entries are dropped.
fn first_supporting_browser(list: &[String], what: &str) -> Uuid {
    let mut parsed = list.iter().filter_map(|g| parse_guid(Some(g)));
    let first = parsed.next().unwrap_or_default();
    let dropped = parsed.count();
    if dropped > 0 {
        log::info!(
            "Legacy {} listed {} extra supporting browsers; keeping the first",
            what,
            dropped
        );
    }
    first
}

fn convert_browser(legacy: &LegacyBrowser) -> Browser {
    let defaults = Browser::default();
    Browser {
        name: legacy.name.clone().unwrap_or_default(),
        target: legacy.target.clone().unwrap_or_default(),
        arguments: legacy.arguments.clone().unwrap_or_default(),
        guid: identity(legacy.guid.as_ref(), "browser"),
        hotkey: legacy
            .hotkey
            .as_deref()
            .and_then(|h| h.chars().next())
            .filter(char::is_ascii_digit),
        pos_x: parse_position(legacy.pos_x.as_ref()),
        pos_y: parse_position(legacy.pos_y.as_ref()),
        scale: parse_decimal(legacy.scale.as_ref(), defaults.scale),
        icon_index: parse_number(legacy.icon_index.as_ref(), defaults.icon_index),
        category: legacy.category.clone().unwrap_or_default(),
        visible: parse_bool(legacy.visible.as_ref(), defaults.visible),
        is_default: parse_bool(legacy.is_default.as_ref(), false),
        custom_image_path: legacy.custom_image_path.clone(),
    }
}

fn convert_protocol(legacy: &LegacyRule) -> Protocol {
    Protocol {
        name: legacy.name.clone().unwrap_or_default(),
        header: legacy.matcher.clone().unwrap_or_default(),
        guid: identity(legacy.guid.as_ref(), "protocol"),
        browser_guid: first_supporting_browser(&legacy.supporting_browsers, "protocol"),
        category: legacy.category.clone().unwrap_or_default(),
        active: parse_bool(legacy.active.as_ref(), true),
    }
}

fn convert_file_type(legacy: &LegacyRule) -> FileType {
    let extension = legacy.matcher.clone().unwrap_or_default();
    let extension = if extension.is_empty() || extension.starts_with('.') {
        extension
    } else {
        format!(".{}", extension)
    };
    FileType {
        name: legacy.name.clone().unwrap_or_default(),
        extension,
        guid: identity(legacy.guid.as_ref(), "file type"),
        browser_guid: first_supporting_browser(&legacy.supporting_browsers, "file type"),
        category: legacy.category.clone().unwrap_or_default(),
        active: parse_bool(legacy.active.as_ref(), true),
    }
}

fn convert_auto_url(legacy: &LegacyAutoUrl) -> AutoUrl {
    AutoUrl {
        url_pattern: legacy.url.clone().unwrap_or_default(),
        guid: identity(legacy.guid.as_ref(), "auto URL"),
        browser_guid: first_supporting_browser(&legacy.supporting_browsers, "auto URL"),
        delay_time: parse_number(legacy.delay.as_ref(), AutoUrl::default().delay_time),
        category: legacy.category.clone().unwrap_or_default(),
    }
}

/// Converts a legacy document to the current schema.
///
/// Missing fields take [`Settings::default`] values and the result is
/// stamped with the current file version.
pub fn convert(doc: &LegacyDocument) -> Settings {
    let defaults = Settings::default();
    let mut settings = Settings {
        browsers: doc.browsers.iter().map(convert_browser).collect(),
        protocols: doc.protocols.iter().map(convert_protocol).collect(),
        file_types: doc.file_types.iter().map(convert_file_type).collect(),
        auto_urls: doc.auto_urls.iter().map(convert_auto_url).collect(),
        default_browser_guid: parse_guid(doc.default_browser.as_ref()).unwrap_or_default(),
        default_delay: parse_number(doc.default_delay.as_ref(), defaults.default_delay),
        default_message: doc
            .default_message
            .clone()
            .unwrap_or(defaults.default_message),
        options_shortcut: doc
            .options_shortcut
            .as_deref()
            .and_then(|s| s.chars().next())
            .unwrap_or(defaults.options_shortcut),
        grid_width: parse_number(doc.width.as_ref(), defaults.grid_width),
        grid_height: parse_number(doc.height.as_ref(), defaults.grid_height),
        icon_scale: parse_decimal(doc.scale_browser.as_ref(), defaults.icon_scale),
        show_url: parse_bool(doc.show_url.as_ref(), defaults.show_url),
        reveal_short_urls: parse_bool(doc.reveal_url.as_ref(), defaults.reveal_short_urls),
        portable_mode: parse_bool(doc.portable_mode.as_ref(), defaults.portable_mode),
        check_default_on_launch: parse_bool(
            doc.check_default.as_ref(),
            defaults.check_default_on_launch,
        ),
        automatic_updates: parse_bool(doc.automatic_updates.as_ref(), defaults.automatic_updates),
        user_agent: doc.user_agent.clone().unwrap_or(defaults.user_agent),
        file_version: SETTINGS_FILE_VERSION,
    };
    settings.normalize_default();

    for dangling in settings.validate() {
        log::warn!(
            "Legacy {} {} points at unknown browser {}",
            dangling.kind,
            dangling.owner,
            dangling.browser_guid
        );
    }
    settings
}
