//! Reconciliation run orchestration: configuration, directories, engine and report.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, Instrument};
use unitmap_adapters::{
    ApplicationDirectory, BusinessUnitDirectory, PlatformApi, PlatformApplications, PlatformBusinessUnits,
    DEFAULT_API_BASE,
};
use unitmap_core::{NamePattern, ReconcileSettings, SettingsError};
use unitmap_storage::{AuditReport, HttpClient, HttpClientConfig, HmacSigner, DEFAULT_REPORT_PATH};
use uuid::Uuid;

pub mod engine;

pub use engine::{ReconcileOutcome, ReconcileTally, Reconciler};

pub const CRATE_NAME: &str = "unitmap-sync";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base: String,
    pub settings: ReconcileSettings,
    pub report_path: PathBuf,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            settings: ReconcileSettings::default(),
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("unitmap/{}", env!("CARGO_PKG_VERSION"))
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from an arbitrary variable source; unset or blank values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = ReconcileSettings::default();

        let name_pattern = match get("UNITMAP_NAME_PATTERN") {
            Some(pattern) => NamePattern::new(&pattern)?,
            None => defaults.name_pattern.clone(),
        };
        let settings = ReconcileSettings {
            page_size: parse_var(&get, "UNITMAP_PAGE_SIZE", defaults.page_size)?,
            max_attempts: parse_var(&get, "UNITMAP_MAX_ATTEMPTS", defaults.max_attempts)?,
            request_timeout: Duration::from_secs(parse_var(
                &get,
                "UNITMAP_HTTP_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            backoff_unit: Duration::from_secs(parse_var(
                &get,
                "UNITMAP_BACKOFF_SECS",
                defaults.backoff_unit.as_secs(),
            )?),
            name_pattern,
        };
        settings.validate()?;

        Ok(Self {
            api_base: get("UNITMAP_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            settings,
            report_path: get("UNITMAP_REPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH)),
            user_agent: get("UNITMAP_USER_AGENT").unwrap_or_else(default_user_agent),
        })
    }
}

fn parse_var<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        Some(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
            var,
            reason: err.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub tally: ReconcileTally,
    pub report_path: Option<String>,
}

pub struct SyncPipeline {
    reconciler: Reconciler,
    report: AuditReport,
}

impl SyncPipeline {
    /// Wires the platform directories behind a signed HTTP client.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let signer = HmacSigner::from_discovered_credentials().context("loading API credentials")?;
        let http = HttpClient::new(HttpClientConfig {
            user_agent: Some(config.user_agent.clone()),
            ..HttpClientConfig::from_settings(&config.settings)
        })?
        .with_signer(Arc::new(signer));

        let api = PlatformApi::new(Arc::new(http), config.api_base.clone())
            .with_page_size(config.settings.page_size);
        Ok(Self::with_directories(
            config,
            Arc::new(PlatformBusinessUnits::new(api.clone())),
            Arc::new(PlatformApplications::new(api)),
        ))
    }

    pub fn with_directories(
        config: SyncConfig,
        business_units: Arc<dyn BusinessUnitDirectory>,
        applications: Arc<dyn ApplicationDirectory>,
    ) -> Self {
        let reconciler = Reconciler::new(business_units, applications)
            .with_name_pattern(config.settings.name_pattern.clone());
        Self {
            reconciler,
            report: AuditReport::new(config.report_path),
        }
    }

    pub async fn run_once(&self, dry_run: bool) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, dry_run);

        let outcome = self
            .reconciler
            .run(dry_run)
            .instrument(span.clone())
            .await
            .context("reconciling applications with business units")?;

        let _guard = span.enter();
        let tally = outcome.tally;
        info!(
            applications = tally.applications,
            assigned = tally.assigned,
            already_in_bu = tally.already_in_bu,
            created_business_units = tally.created_business_units,
            skipped_no_guid = tally.skipped_no_guid,
            skipped_name_format = tally.skipped_name_format,
            "reconciliation finished"
        );

        let report_path = if dry_run {
            let written = self.report.write(&outcome.rows).context("writing dry-run report")?;
            (written > 0).then(|| self.report.path().display().to_string())
        } else {
            None
        };

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run,
            tally,
            report_path,
        })
    }
}

pub async fn run_once_from_env(dry_run: bool) -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env().context("reading configuration")?;
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_once(dry_run).await
}
