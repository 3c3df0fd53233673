//! Folding a foreign settings document into the current one.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{merge_settings_with_defaults, JsonGateway, PersistenceGateway, SettingsManager};
use crate::error::{ImportError, LoadError};
use crate::filesystem::AppPaths;
use crate::legacy;
use crate::models::{Entity, Settings};

/// Which parts of a source document to take, and how.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicy {
    pub browsers: bool,
    pub protocols: bool,
    pub file_types: bool,
    pub auto_urls: bool,
    /// Copy scalar preferences (delay, message, flags, ...)
    pub general: bool,
    /// Replace each enabled collection wholesale instead of appending new Guids
    pub overwrite_existing: bool,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            browsers: true,
            protocols: true,
            file_types: true,
            auto_urls: true,
            general: false,
            overwrite_existing: false,
        }
    }
}

impl MergePolicy {
    /// Every collection plus general settings.
    pub fn everything(overwrite_existing: bool) -> Self {
        Self {
            general: true,
            overwrite_existing,
            ..Default::default()
        }
    }
}

/// What a merge changed.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub browsers: usize,
    pub protocols: usize,
    pub file_types: usize,
    pub auto_urls: usize,
    pub general: bool,
}

/// Appends source entities whose Guid the target lacks, or replaces the
/// collection when `overwrite` is set. Returns how many entities were taken.
fn merge_collection<T: Entity>(target: &mut Vec<T>, source: &[T], overwrite: bool) -> usize {
    if overwrite {
        *target = source.to_vec();
        return target.len();
    }

    let mut seen: HashSet<Uuid> = target.iter().map(Entity::guid).collect();
    let mut added = 0;
    for entity in source {
        let mut entity = entity.clone();
        entity.ensure_guid();
        if seen.insert(entity.guid()) {
            target.push(entity);
            added += 1;
        } else {
            log::debug!("Skipping already present {}", entity.guid());
        }
    }
    added
}

fn copy_general(target: &mut Settings, source: &Settings) {
    target.default_browser_guid = source.default_browser_guid;
    target.default_delay = source.default_delay;
    target.default_message = source.default_message.clone();
    target.options_shortcut = source.options_shortcut;
    target.grid_width = source.grid_width;
    target.grid_height = source.grid_height;
    target.icon_scale = source.icon_scale;
    target.show_url = source.show_url;
    target.reveal_short_urls = source.reveal_short_urls;
    target.portable_mode = source.portable_mode;
    target.check_default_on_launch = source.check_default_on_launch;
    target.automatic_updates = source.automatic_updates;
    target.user_agent = source.user_agent.clone();
}

/// Merges `source` into `target` under `policy`.
///
/// Appended browsers never steal the default flag from the target; the
/// single-default invariant is restored before returning. Overwritten
/// browsers are taken exactly as the source has them, default included.
pub fn merge(target: &mut Settings, source: &Settings, policy: MergePolicy) -> MergeReport {
    let overwrite = policy.overwrite_existing;
    let mut report = MergeReport::default();

    if policy.browsers {
        let had_default = target.default_browser().is_some();
        let before = if overwrite { 0 } else { target.browsers.len() };
        report.browsers = merge_collection(&mut target.browsers, &source.browsers, overwrite);
        if had_default && !overwrite {
            for browser in &mut target.browsers[before..] {
                browser.is_default = false;
            }
        }
    }
    if policy.protocols {
        report.protocols = merge_collection(&mut target.protocols, &source.protocols, overwrite);
    }
    if policy.file_types {
        report.file_types = merge_collection(&mut target.file_types, &source.file_types, overwrite);
    }
    if policy.auto_urls {
        report.auto_urls = merge_collection(&mut target.auto_urls, &source.auto_urls, overwrite);
    }
    if policy.general {
        copy_general(target, source);
        report.general = true;
    }

    if policy.browsers && overwrite {
        // The replaced list is kept verbatim; the default follows it.
        target.default_browser_guid = source
            .default_browser()
            .or_else(|| source.browsers.iter().find(|b| b.is_default))
            .map(|b| b.guid)
            .unwrap_or_default();
    } else {
        target.normalize_default();
    }
    for dangling in target.validate() {
        log::warn!(
            "Imported {} {} points at unknown browser {}",
            dangling.kind,
            dangling.owner,
            dangling.browser_guid
        );
    }
    report
}

/// Reads an import source, detecting legacy XML versus current JSON.
pub fn read_source(path: &Path) -> Result<Settings, ImportError> {
    if !path.is_file() {
        return Err(ImportError::MissingSource(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if legacy::looks_like_legacy(&content) {
        log::info!("Importing legacy document {}", path.display());
        let doc = legacy::parse_str(&content)?;
        return Ok(legacy::convert(&doc));
    }

    merge_settings_with_defaults(&content).map_err(|e| {
        let e = match e {
            LoadError::Malformed { source, .. } => LoadError::Malformed {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        };
        ImportError::Current(e)
    })
}

/// Imports `path` into `target`.
///
/// All-or-nothing: on any error `target` is left exactly as it was.
pub fn import_file(
    path: &Path,
    target: &mut Settings,
    policy: MergePolicy,
) -> Result<MergeReport, ImportError> {
    let source = read_source(path)?;
    let report = merge(target, &source, policy);
    log::info!("Imported {}: {:?}", path.display(), report);
    Ok(report)
}

/// Imports into the manager's snapshot and persists the result.
///
/// The current settings file is backed up first. The in-memory snapshot is
/// replaced only after the merged settings were written successfully.
pub fn import_and_save(
    manager: &SettingsManager,
    paths: &AppPaths,
    source: &Path,
    policy: MergePolicy,
) -> Result<MergeReport, ImportError> {
    let mut merged = manager.get();
    let report = import_file(source, &mut merged, policy)?;

    paths.backup_settings().map_err(ImportError::Backup)?;
    JsonGateway
        .save(&merged, manager.settings_path())
        .map_err(ImportError::Save)?;
    manager.replace(merged);
    Ok(report)
}
