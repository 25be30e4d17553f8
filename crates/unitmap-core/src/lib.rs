//! Core domain model for business-unit reconciliation: applications, business units,
//! the name-to-BU resolver and the per-application outcome rows.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CRATE_NAME: &str = "unitmap-core";

/// Display name used for applications whose profile carries no name.
pub const NO_NAME: &str = "<no-name>";

/// Four letters followed by a hyphen; the letters are the BU name.
pub const DEFAULT_NAME_PATTERN: &str = r"^([A-Za-z]{4})-";

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Application record as returned by the platform listing/detail endpoints.
///
/// The profile is kept as an untyped JSON object so that fields this crate does not know
/// about survive a fetch-modify-update cycle untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub profile: Option<Map<String, Value>>,
}

impl Application {
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref().filter(|g| !g.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
    }

    pub fn display_name(&self) -> &str {
        self.name().unwrap_or(NO_NAME)
    }

    /// GUID of the business unit currently referenced by the profile, if any.
    pub fn current_business_unit(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .and_then(|p| p.get("business_unit"))
            .and_then(|bu| bu.get("guid"))
            .and_then(Value::as_str)
    }

    /// Copy of the profile with only the business unit reference replaced.
    pub fn profile_with_business_unit(&self, bu_guid: &str) -> Map<String, Value> {
        let mut profile = self.profile.clone().unwrap_or_default();
        profile.insert(
            "business_unit".to_string(),
            serde_json::json!({ "guid": bu_guid }),
        );
        profile
    }
}

/// Name -> GUID lookup of the platform's business units, at most one entry per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusinessUnitMap {
    entries: HashMap<String, String>,
}

impl BusinessUnitMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Records `name -> guid`, replacing any previous GUID for the same name.
    pub fn insert(&mut self, name: impl Into<String>, guid: impl Into<String>) -> Option<String> {
        self.entries.insert(name.into(), guid.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, G: Into<String>> FromIterator<(N, G)> for BusinessUnitMap {
    fn from_iter<I: IntoIterator<Item = (N, G)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, guid) in iter {
            map.insert(name, guid);
        }
        map
    }
}

/// Last non-empty path segment of a `_links.self.href` value.
pub fn guid_from_self_link(href: &str) -> Option<String> {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid name pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("page size must be greater than zero")]
    ZeroPageSize,
    #[error("max attempts must be greater than zero")]
    ZeroAttempts,
}

/// Naming convention that maps an application name to its business unit name.
///
/// The first capture group is the BU name; a pattern without groups uses the whole match.
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, SettingsError> {
        let regex = Regex::new(pattern).map_err(|source| SettingsError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn resolve(&self, app_name: &str) -> Option<String> {
        let captures = self.regex.captures(app_name)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().to_string())
            .filter(|name| !name.is_empty())
    }
}

impl Default for NamePattern {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_PATTERN).expect("default name pattern compiles")
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Resolves a BU name with the default four-letter convention.
pub fn resolve_bu_name(app_name: &str) -> Option<String> {
    NamePattern::default().resolve(app_name)
}

/// Tunables recognised by the reconciler; defaults match the platform conventions.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    pub page_size: usize,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub backoff_unit: Duration,
    pub name_pattern: NamePattern,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            name_pattern: NamePattern::default(),
        }
    }
}

impl ReconcileSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.page_size == 0 {
            return Err(SettingsError::ZeroPageSize);
        }
        if self.max_attempts == 0 {
            return Err(SettingsError::ZeroAttempts);
        }
        Ok(())
    }
}

/// What happened to the business unit an application resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuAction {
    Existing,
    Create,
    CreateDryrun,
}

impl BuAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Existing => "existing",
            Self::Create => "create",
            Self::CreateDryrun => "create_dryrun",
        }
    }
}

impl fmt::Display for BuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one application in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppAction {
    Assign,
    AssignDryrun,
    AlreadyInBu,
    SkipNoGuid,
    SkipNameFormat,
}

impl AppAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::AssignDryrun => "assign_dryrun",
            Self::AlreadyInBu => "already_in_bu",
            Self::SkipNoGuid => "skip_no_guid",
            Self::SkipNameFormat => "skip_name_format",
        }
    }
}

impl fmt::Display for AppAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record per processed application. Field order is the report column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRow {
    pub app_name: String,
    pub app_guid: Option<String>,
    pub bu_name: Option<String>,
    pub current_bu_guid: Option<String>,
    pub target_bu_guid: Option<String>,
    pub bu_action: Option<BuAction>,
    pub app_action: AppAction,
}

impl OutcomeRow {
    pub const COLUMNS: [&'static str; 7] = [
        "app_name",
        "app_guid",
        "bu_name",
        "current_bu_guid",
        "target_bu_guid",
        "bu_action",
        "app_action",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolver_matches_four_letter_prefix() {
        assert_eq!(resolve_bu_name("ABCD-app1").as_deref(), Some("ABCD"));
        assert_eq!(resolve_bu_name("abcd-x").as_deref(), Some("abcd"));
        assert_eq!(resolve_bu_name("WxYz-"), Some("WxYz".to_string()));
    }

    #[test]
    fn resolver_rejects_other_shapes() {
        for name in ["AB-app1", "-leading", "ABCDE-app", "ABCD_app", "ABCD", "1BCD-x", "", " ABCD-x"] {
            assert_eq!(resolve_bu_name(name), None, "{name} should not resolve");
        }
    }

    #[test]
    fn custom_pattern_without_groups_uses_whole_match() {
        let pattern = NamePattern::new(r"^[A-Z]{2}").unwrap();
        assert_eq!(pattern.resolve("QAservice").as_deref(), Some("QA"));
        assert!(NamePattern::new("([").is_err());
    }

    #[test]
    fn guid_is_last_non_empty_link_segment() {
        assert_eq!(
            guid_from_self_link("https://api.example.com/api/authn/v2/business_units/abc-123/").as_deref(),
            Some("abc-123")
        );
        assert_eq!(guid_from_self_link("/units/xyz").as_deref(), Some("xyz"));
        assert_eq!(guid_from_self_link(""), None);
        assert_eq!(guid_from_self_link("///"), None);
    }

    #[test]
    fn profile_copy_only_replaces_business_unit() {
        let app: Application = serde_json::from_value(json!({
            "guid": "g1",
            "profile": {
                "name": "ABCD-app",
                "business_criticality": "HIGH",
                "tags": "a,b",
                "business_unit": { "guid": "old" }
            }
        }))
        .unwrap();

        let updated = app.profile_with_business_unit("new");
        assert_eq!(updated["business_unit"], json!({ "guid": "new" }));
        assert_eq!(updated["business_criticality"], json!("HIGH"));
        assert_eq!(updated["tags"], json!("a,b"));
        assert_eq!(app.current_business_unit(), Some("old"));
    }

    #[test]
    fn application_accessors_tolerate_missing_fields() {
        let app: Application = serde_json::from_value(json!({ "guid": null, "profile": null })).unwrap();
        assert_eq!(app.guid(), None);
        assert_eq!(app.display_name(), NO_NAME);
        assert_eq!(app.current_business_unit(), None);
        assert_eq!(
            app.profile_with_business_unit("bu")["business_unit"],
            json!({ "guid": "bu" })
        );

        let empty_guid = Application {
            guid: Some(String::new()),
            profile: None,
        };
        assert_eq!(empty_guid.guid(), None);
    }

    #[test]
    fn default_settings_validate() {
        let settings = ReconcileSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.max_attempts, 3);

        let bad = ReconcileSettings {
            page_size: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(SettingsError::ZeroPageSize)));
    }

    #[test]
    fn action_labels_match_report_vocabulary() {
        assert_eq!(BuAction::CreateDryrun.to_string(), "create_dryrun");
        assert_eq!(AppAction::AlreadyInBu.to_string(), "already_in_bu");
    }
}
