//! Decides which browser opens an input string.
//!
//! Tiers are evaluated in a fixed order and the first one that yields a
//! browser wins: URL patterns (stored order), protocols, file types, then
//! the default browser. Resolution never fails; an input nothing claims
//! comes back as [`MatchReason::NoMatch`] with no browser.

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AutoUrl, Browser, Settings};

/// Token in a browser's argument template replaced by the input.
pub const URL_PLACEHOLDER: &str = "{url}";

/// Prefix marking a URL pattern as a regular expression.
pub const REGEX_PATTERN_PREFIX: &str = "regex:";

/// Which tier produced the decision.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MatchReason {
    UrlPattern,
    Protocol,
    FileType,
    Default,
    Hotkey,
    NoMatch,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::UrlPattern => "url-pattern",
            MatchReason::Protocol => "protocol",
            MatchReason::FileType => "file-type",
            MatchReason::Default => "default",
            MatchReason::Hotkey => "hotkey",
            MatchReason::NoMatch => "no-match",
        }
    }
}

/// Caller-supplied modifier state at launch time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// User asked for the chooser even if a rule matched (e.g. Shift held).
    pub show_chooser: bool,
}

/// Output of the resolution engine.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDecision {
    pub browser: Option<Browser>,
    pub arguments: String,
    pub delay_seconds: u32,
    pub reason: MatchReason,
    /// Guid of the rule that matched, if a rule did
    pub matched_rule: Option<Uuid>,
    /// `false` means the caller should present the manual chooser
    pub auto_launch: bool,
}

impl LaunchDecision {
    fn no_match(settings: &Settings) -> Self {
        Self {
            browser: None,
            arguments: String::new(),
            delay_seconds: settings.default_delay,
            reason: MatchReason::NoMatch,
            matched_rule: None,
            auto_launch: false,
        }
    }

    fn matched(
        browser: &Browser,
        input: &str,
        delay_seconds: u32,
        reason: MatchReason,
        matched_rule: Option<Uuid>,
    ) -> Self {
        Self {
            browser: Some(browser.clone()),
            arguments: effective_arguments(&browser.arguments, input),
            delay_seconds,
            reason,
            matched_rule,
            auto_launch: true,
        }
    }
}

/// Expands a browser's argument template for `input`.
///
/// Without a placeholder the input is appended as a trailing quoted
/// argument, which is how Browser Chooser 2 templates behaved.
pub fn effective_arguments(template: &str, input: &str) -> String {
    if template.contains(URL_PLACEHOLDER) {
        return template.replace(URL_PLACEHOLDER, input);
    }
    let template = template.trim_end();
    if template.is_empty() {
        format!("\"{}\"", input)
    } else {
        format!("{} \"{}\"", template, input)
    }
}

/// A URL pattern compiled for matching.
#[derive(Debug)]
enum PatternMatcher {
    Substring(String),
    Expression(Regex),
    Never,
}

impl PatternMatcher {
    fn compile(pattern: &str) -> Self {
        if let Some(expression) = pattern.strip_prefix(REGEX_PATTERN_PREFIX) {
            return match Regex::new(expression) {
                Ok(re) => PatternMatcher::Expression(re),
                Err(e) => {
                    log::warn!("Ignoring invalid URL pattern '{}': {}", pattern, e);
                    PatternMatcher::Never
                }
            };
        }
        if pattern.is_empty() {
            return PatternMatcher::Never;
        }
        if pattern.contains(['*', '?']) {
            return match Regex::new(&wildcard_to_regex(pattern)) {
                Ok(re) => PatternMatcher::Expression(re),
                Err(e) => {
                    log::warn!("Ignoring invalid wildcard '{}': {}", pattern, e);
                    PatternMatcher::Never
                }
            };
        }
        PatternMatcher::Substring(pattern.to_lowercase())
    }

    fn is_match(&self, input: &str, input_lower: &str) -> bool {
        match self {
            PatternMatcher::Substring(needle) => input_lower.contains(needle.as_str()),
            PatternMatcher::Expression(re) => re.is_match(input),
            PatternMatcher::Never => false,
        }
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::from("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

/// Splits `scheme://` off an input, if it has one.
pub fn scheme_of(input: &str) -> Option<&str> {
    let (scheme, _) = input.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// Lower-cased extension of the file an input points at, without the dot.
///
/// URLs contribute only their path; query and fragment are ignored. Input
/// without a scheme counts as a file only when it has a path separator, so a
/// bare host like `example.com` has no extension.
pub fn extension_of(input: &str) -> Option<String> {
    let path = match scheme_of(input) {
        Some(scheme) => {
            let rest = &input[scheme.len() + 3..];
            let rest = rest.split(['?', '#']).next().unwrap_or_default();
            let (_, path) = rest.split_once('/')?;
            path
        }
        None if input.contains(['/', '\\']) => input,
        None => return None,
    };
    let segment = path.rsplit(['/', '\\']).next()?;
    let dot = segment.rfind('.')?;
    if dot == 0 || dot + 1 == segment.len() {
        return None;
    }
    Some(segment[dot + 1..].to_lowercase())
}

/// Normalises a configured extension to its bare lower-case form.
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches(['*', '.']).to_lowercase()
}

/// A header ending in `:` or `://` is a literal prefix; a bare header such
/// as `http` names the scheme and must be followed directly by `:`.
fn protocol_matches(header: &str, input_lower: &str) -> bool {
    let header = header.trim().to_lowercase();
    if header.is_empty() {
        return false;
    }
    if header.ends_with(':') || header.ends_with("://") {
        return input_lower.starts_with(&header);
    }
    input_lower
        .strip_prefix(&header)
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Resolution engine bound to one settings snapshot.
///
/// Compiles URL patterns once so a caller resolving many inputs against the
/// same settings does not recompile them.
pub struct Resolver<'a> {
    settings: &'a Settings,
    patterns: Vec<(&'a AutoUrl, PatternMatcher)>,
}

impl<'a> Resolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        let patterns = settings
            .auto_urls
            .iter()
            .map(|rule| (rule, PatternMatcher::compile(&rule.url_pattern)))
            .collect();
        Self { settings, patterns }
    }

    /// Resolves `input` to a launch decision.
    pub fn resolve(&self, input: &str, modifiers: Modifiers) -> LaunchDecision {
        let input = input.trim();
        let mut decision = self
            .match_url_pattern(input)
            .or_else(|| self.match_protocol(input))
            .or_else(|| self.match_file_type(input))
            .or_else(|| self.match_default(input))
            .unwrap_or_else(|| LaunchDecision::no_match(self.settings));

        if modifiers.show_chooser {
            decision.auto_launch = false;
        }
        log::debug!(
            "Resolved '{}' via {} to {:?}",
            input,
            decision.reason.as_str(),
            decision.browser.as_ref().map(|b| b.name.as_str())
        );
        decision
    }

    fn match_url_pattern(&self, input: &str) -> Option<LaunchDecision> {
        let input_lower = input.to_lowercase();
        let (rule, _) = self
            .patterns
            .iter()
            .find(|(_, matcher)| matcher.is_match(input, &input_lower))?;

        // A nil or dangling target means "the default browser, with this delay".
        let browser = self
            .settings
            .find_browser(rule.browser_guid)
            .or_else(|| self.settings.default_browser())?;
        Some(LaunchDecision::matched(
            browser,
            input,
            rule.effective_delay(self.settings.default_delay),
            MatchReason::UrlPattern,
            Some(rule.guid),
        ))
    }

    fn match_protocol(&self, input: &str) -> Option<LaunchDecision> {
        let input_lower = input.to_lowercase();
        self.settings
            .protocols
            .iter()
            .filter(|p| p.active && protocol_matches(&p.header, &input_lower))
            .find_map(|p| {
                let browser = self.settings.find_browser(p.browser_guid)?;
                Some(LaunchDecision::matched(
                    browser,
                    input,
                    self.settings.default_delay,
                    MatchReason::Protocol,
                    Some(p.guid),
                ))
            })
    }

    fn match_file_type(&self, input: &str) -> Option<LaunchDecision> {
        let extension = extension_of(input)?;
        self.settings
            .file_types
            .iter()
            .filter(|f| f.active && normalize_extension(&f.extension) == extension)
            .find_map(|f| {
                let browser = self.settings.find_browser(f.browser_guid)?;
                Some(LaunchDecision::matched(
                    browser,
                    input,
                    self.settings.default_delay,
                    MatchReason::FileType,
                    Some(f.guid),
                ))
            })
    }

    fn match_default(&self, input: &str) -> Option<LaunchDecision> {
        let browser = self.settings.default_browser()?;
        Some(LaunchDecision::matched(
            browser,
            input,
            self.settings.default_delay,
            MatchReason::Default,
            None,
        ))
    }

    /// Hotkey override: picks the browser bound to `key` directly, skipping
    /// every tier. `None` when no browser carries that hotkey.
    pub fn resolve_hotkey(&self, input: &str, key: char) -> Option<LaunchDecision> {
        let browser = self.settings.browser_by_hotkey(key)?;
        Some(LaunchDecision::matched(
            browser,
            input.trim(),
            0,
            MatchReason::Hotkey,
            None,
        ))
    }
}

/// One-shot resolution of `input` against `settings`.
pub fn resolve(input: &str, settings: &Settings, modifiers: Modifiers) -> LaunchDecision {
    Resolver::new(settings).resolve(input, modifiers)
}
