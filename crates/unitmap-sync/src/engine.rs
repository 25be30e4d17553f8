//! Per-application reconciliation against the business unit directory.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use unitmap_adapters::{ApplicationDirectory, BusinessUnitDirectory, DirectoryError};
use unitmap_core::{AppAction, Application, BuAction, BusinessUnitMap, NamePattern, OutcomeRow};

/// Counts of terminal states over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileTally {
    pub applications: usize,
    pub assigned: usize,
    pub already_in_bu: usize,
    pub created_business_units: usize,
    pub skipped_no_guid: usize,
    pub skipped_name_format: usize,
}

impl ReconcileTally {
    fn record(&mut self, row: &OutcomeRow) {
        self.applications += 1;
        if matches!(row.bu_action, Some(BuAction::Create | BuAction::CreateDryrun)) {
            self.created_business_units += 1;
        }
        match row.app_action {
            AppAction::Assign | AppAction::AssignDryrun => self.assigned += 1,
            AppAction::AlreadyInBu => self.already_in_bu += 1,
            AppAction::SkipNoGuid => self.skipped_no_guid += 1,
            AppAction::SkipNameFormat => self.skipped_name_format += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Audit rows in listing order; only filled when simulating.
    pub rows: Vec<OutcomeRow>,
    pub tally: ReconcileTally,
    /// BU mapping as it stood at the end of the run, including BUs created during it.
    pub business_units: BusinessUnitMap,
}

pub struct Reconciler {
    business_units: Arc<dyn BusinessUnitDirectory>,
    applications: Arc<dyn ApplicationDirectory>,
    name_pattern: NamePattern,
}

impl Reconciler {
    pub fn new(
        business_units: Arc<dyn BusinessUnitDirectory>,
        applications: Arc<dyn ApplicationDirectory>,
    ) -> Self {
        Self {
            business_units,
            applications,
            name_pattern: NamePattern::default(),
        }
    }

    pub fn with_name_pattern(mut self, name_pattern: NamePattern) -> Self {
        self.name_pattern = name_pattern;
        self
    }

    /// Processes every listed application in order. The first directory error aborts the run.
    pub async fn run(&self, simulate: bool) -> Result<ReconcileOutcome, DirectoryError> {
        info!("loading business units");
        let mut bu_map = self.business_units.fetch_all().await?;
        info!(count = bu_map.len(), "loaded business units");

        info!("loading applications");
        let apps = self.applications.fetch_all().await?;
        info!(count = apps.len(), "found applications");

        let mut outcome = ReconcileOutcome::default();
        for app in &apps {
            let row = self.reconcile_one(app, &mut bu_map, simulate).await?;
            outcome.tally.record(&row);
            if simulate {
                outcome.rows.push(row);
            }
        }
        outcome.business_units = bu_map;
        Ok(outcome)
    }

    async fn reconcile_one(
        &self,
        app: &Application,
        bu_map: &mut BusinessUnitMap,
        simulate: bool,
    ) -> Result<OutcomeRow, DirectoryError> {
        let app_name = app.display_name().to_string();
        let mut row = OutcomeRow {
            app_name: app_name.clone(),
            app_guid: app.guid().map(str::to_string),
            bu_name: None,
            current_bu_guid: None,
            target_bu_guid: None,
            bu_action: None,
            app_action: AppAction::SkipNoGuid,
        };

        let Some(app_guid) = app.guid() else {
            info!(app_name = %app_name, "skipping application without GUID");
            return Ok(row);
        };

        let Some(bu_name) = self.name_pattern.resolve(&app_name) else {
            info!(app_name = %app_name, "skipping application with unsupported name format");
            row.app_action = AppAction::SkipNameFormat;
            return Ok(row);
        };
        row.bu_name = Some(bu_name.clone());

        let (bu_guid, bu_action) = match bu_map.get(&bu_name).map(str::to_string) {
            Some(guid) => (guid, BuAction::Existing),
            None => {
                let guid = self.business_units.create(&bu_name, simulate).await?;
                bu_map.insert(bu_name.clone(), guid.clone());
                let action = if simulate {
                    BuAction::CreateDryrun
                } else {
                    BuAction::Create
                };
                (guid, action)
            }
        };
        row.bu_action = Some(bu_action);

        let full = self.applications.fetch_details(app_guid).await?;
        let current = full.current_business_unit().map(str::to_string);
        row.current_bu_guid = current.clone();
        row.target_bu_guid = Some(bu_guid.clone());

        row.app_action = if current.as_deref() == Some(bu_guid.as_str()) {
            info!(app_name = %app_name, bu_name = %bu_name, "application already in business unit");
            AppAction::AlreadyInBu
        } else {
            self.applications
                .assign_business_unit(app_guid, &full, &bu_guid, simulate)
                .await?;
            if simulate {
                AppAction::AssignDryrun
            } else {
                AppAction::Assign
            }
        };
        Ok(row)
    }
}
