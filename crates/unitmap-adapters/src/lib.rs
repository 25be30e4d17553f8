//! Business unit and application directories: contracts plus platform API implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info};
use unitmap_core::{guid_from_self_link, Application, BusinessUnitMap, DEFAULT_PAGE_SIZE};
use unitmap_storage::{HttpClient, HttpResponse, RequestOptions, TransportError};

pub const CRATE_NAME: &str = "unitmap-adapters";

pub const DEFAULT_API_BASE: &str = "https://api.veracode.com";
pub const APPLICATIONS_PATH: &str = "appsec/v1/applications";
pub const BUSINESS_UNITS_PATH: &str = "api/authn/v2/business_units";

/// Suffix of the synthetic GUID handed out for BUs that a dry run would create.
pub const DRY_RUN_SUFFIX: &str = "_DRYRUN";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("reading {resource} failed with status {status}: {body}")]
    Read {
        resource: String,
        status: u16,
        body: String,
    },
    #[error("writing {resource} failed with status {status}: {body}")]
    Write {
        resource: String,
        status: u16,
        body: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("decoding {resource}: {source}")]
    Decode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait BusinessUnitDirectory: Send + Sync {
    /// Every BU the platform knows, keyed by name.
    async fn fetch_all(&self) -> Result<BusinessUnitMap, DirectoryError>;

    /// Creates `name` and returns its GUID. With `simulate` no call is made and a
    /// synthetic GUID is returned instead.
    async fn create(&self, name: &str, simulate: bool) -> Result<String, DirectoryError>;
}

#[async_trait]
pub trait ApplicationDirectory: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Application>, DirectoryError>;

    /// Full record for one application; the listing omits the BU assignment.
    async fn fetch_details(&self, guid: &str) -> Result<Application, DirectoryError>;

    /// Sends `app`'s profile back with only the BU reference replaced.
    async fn assign_business_unit(
        &self,
        guid: &str,
        app: &Application,
        bu_guid: &str,
        simulate: bool,
    ) -> Result<(), DirectoryError>;
}

/// Synthetic GUID recorded for a BU that was only created on paper.
pub fn simulated_bu_guid(name: &str) -> String {
    format!("{name}{DRY_RUN_SUFFIX}")
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Link {
    #[serde(default)]
    href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Links {
    #[serde(rename = "self", default)]
    self_link: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
struct BusinessUnitRecord {
    #[serde(default)]
    bu_name: Option<String>,
    #[serde(rename = "_links", default)]
    links: Links,
}

impl BusinessUnitRecord {
    fn guid(&self) -> Option<String> {
        self.links
            .self_link
            .as_ref()
            .and_then(|link| guid_from_self_link(&link.href))
    }
}

#[derive(Debug, Default, Deserialize)]
struct BusinessUnitEmbedded {
    #[serde(default)]
    business_units: Vec<BusinessUnitRecord>,
}

/// BU listings arrive either as a top-level array or under `_embedded`.
#[derive(Debug, Default, Deserialize)]
struct BusinessUnitPage {
    #[serde(default)]
    business_units: Option<Vec<BusinessUnitRecord>>,
    #[serde(rename = "_embedded", default)]
    embedded: Option<BusinessUnitEmbedded>,
}

impl BusinessUnitPage {
    fn into_records(self) -> Vec<BusinessUnitRecord> {
        match self.business_units {
            Some(records) if !records.is_empty() => records,
            _ => self.embedded.map(|e| e.business_units).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationEmbedded {
    #[serde(default)]
    applications: Vec<Application>,
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationPage {
    #[serde(rename = "_embedded", default)]
    embedded: Option<ApplicationEmbedded>,
}

/// Shared plumbing for the platform-backed directories.
#[derive(Debug, Clone)]
pub struct PlatformApi {
    http: Arc<HttpClient>,
    base_url: String,
    page_size: usize,
}

impl PlatformApi {
    pub fn new(http: Arc<HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Walks `page = 0, 1, ...` until a page yields no items.
    async fn fetch_pages<P, T>(
        &self,
        path: &str,
        resource: &str,
        items: impl Fn(P) -> Vec<T>,
    ) -> Result<Vec<T>, DirectoryError>
    where
        P: DeserializeOwned,
    {
        let url = self.url(path);
        let mut all = Vec::new();
        let mut page = 0usize;
        loop {
            let resp = self
                .http
                .get(
                    &url,
                    RequestOptions::new()
                        .query("page", page)
                        .query("size", self.page_size),
                )
                .await?;
            let chunk = items(decode(ensure_read(resp, resource)?, resource)?);
            debug!(resource, page, items = chunk.len(), "fetched listing page");
            if chunk.is_empty() {
                break;
            }
            all.extend(chunk);
            page += 1;
        }
        Ok(all)
    }
}

fn ensure_read(resp: HttpResponse, resource: &str) -> Result<HttpResponse, DirectoryError> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(DirectoryError::Read {
            resource: resource.to_string(),
            status: resp.status.as_u16(),
            body: resp.text(),
        })
    }
}

fn ensure_write(resp: HttpResponse, resource: &str) -> Result<HttpResponse, DirectoryError> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(DirectoryError::Write {
            resource: resource.to_string(),
            status: resp.status.as_u16(),
            body: resp.text(),
        })
    }
}

fn decode<T: DeserializeOwned>(resp: HttpResponse, resource: &str) -> Result<T, DirectoryError> {
    resp.json().map_err(|source| DirectoryError::Decode {
        resource: resource.to_string(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct PlatformBusinessUnits {
    api: PlatformApi,
}

impl PlatformBusinessUnits {
    pub fn new(api: PlatformApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl BusinessUnitDirectory for PlatformBusinessUnits {
    async fn fetch_all(&self) -> Result<BusinessUnitMap, DirectoryError> {
        let records = self
            .api
            .fetch_pages(BUSINESS_UNITS_PATH, "business units", BusinessUnitPage::into_records)
            .await?;
        let map = records
            .into_iter()
            .filter_map(|record| {
                let guid = record.guid()?;
                let name = record.bu_name.filter(|n| !n.is_empty())?;
                Some((name, guid))
            })
            .collect::<BusinessUnitMap>();
        Ok(map)
    }

    async fn create(&self, name: &str, simulate: bool) -> Result<String, DirectoryError> {
        if simulate {
            info!(bu_name = name, "dry-run: would create business unit");
            return Ok(simulated_bu_guid(name));
        }

        let resource = format!("business unit '{name}'");
        let resp = self
            .api
            .http
            .post(
                &self.api.url(BUSINESS_UNITS_PATH),
                RequestOptions::new().json(json!({ "bu_name": name })),
            )
            .await?;
        let record: BusinessUnitRecord = decode(ensure_write(resp, &resource)?, &resource)?;
        let guid = record.guid().unwrap_or_default();
        info!(bu_name = name, bu_guid = %guid, "created business unit");
        Ok(guid)
    }
}

#[derive(Debug, Clone)]
pub struct PlatformApplications {
    api: PlatformApi,
}

impl PlatformApplications {
    pub fn new(api: PlatformApi) -> Self {
        Self { api }
    }

    fn application_url(&self, guid: &str) -> String {
        format!("{}/{}", self.api.url(APPLICATIONS_PATH), guid)
    }
}

#[async_trait]
impl ApplicationDirectory for PlatformApplications {
    async fn fetch_all(&self) -> Result<Vec<Application>, DirectoryError> {
        self.api
            .fetch_pages(APPLICATIONS_PATH, "applications", |page: ApplicationPage| {
                page.embedded.map(|e| e.applications).unwrap_or_default()
            })
            .await
    }

    async fn fetch_details(&self, guid: &str) -> Result<Application, DirectoryError> {
        let resource = format!("application {guid}");
        let resp = self
            .api
            .http
            .get(&self.application_url(guid), RequestOptions::new())
            .await?;
        decode(ensure_read(resp, &resource)?, &resource)
    }

    async fn assign_business_unit(
        &self,
        guid: &str,
        app: &Application,
        bu_guid: &str,
        simulate: bool,
    ) -> Result<(), DirectoryError> {
        let app_name = app.display_name();
        if simulate {
            info!(app_name, app_guid = guid, bu_guid, "dry-run: would assign application to business unit");
            return Ok(());
        }

        let payload = json!({ "profile": JsonValue::Object(app.profile_with_business_unit(bu_guid)) });
        let resource = format!("application {guid}");
        let resp = self
            .api
            .http
            .put(&self.application_url(guid), RequestOptions::new().json(payload))
            .await?;
        ensure_write(resp, &resource)?;
        info!(app_name, app_guid = guid, bu_guid, "assigned application to business unit");
        Ok(())
    }
}
