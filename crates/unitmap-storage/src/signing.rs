//! Per-request HMAC signing for the platform API.
//!
//! Credentials are resolved once (environment first, then the `~/.veracode/credentials` file)
//! and never leave this module; callers only see the finished `Authorization` value.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use config::{Config, File, FileFormat};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::Sha256;
use thiserror::Error;
use url::Url;

pub const AUTH_SCHEME: &str = "VERACODE-HMAC-SHA-256";
pub const KEY_ID_ENV: &str = "VERACODE_API_KEY_ID";
pub const KEY_SECRET_ENV: &str = "VERACODE_API_KEY_SECRET";
pub const PROFILE_ENV: &str = "VERACODE_API_PROFILE";

const REQUEST_VERSION: &[u8] = b"vcode_request_version_1";
const NONCE_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Produces the `Authorization` header value for one outgoing request.
pub trait RequestSigner: Send + Sync + fmt::Debug {
    fn authorization(&self, method: &Method, url: &Url) -> anyhow::Result<String>;
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("no API credentials found in VERACODE_API_KEY_ID/VERACODE_API_KEY_SECRET or {}", .searched.display())]
    Missing { searched: PathBuf },
    #[error("reading credentials file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("credentials profile `{profile}` in {} is incomplete", .path.display())]
    Incomplete { path: PathBuf, profile: String },
}

#[derive(Clone)]
pub struct ApiCredentials {
    key_id: String,
    key_secret: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

impl ApiCredentials {
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: strip_region_prefix(&key_id.into()),
            key_secret: strip_region_prefix(&key_secret.into()),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn from_env() -> Option<Self> {
        let key_id = std::env::var(KEY_ID_ENV).ok().filter(|v| !v.trim().is_empty())?;
        let key_secret = std::env::var(KEY_SECRET_ENV).ok().filter(|v| !v.trim().is_empty())?;
        Some(Self::new(key_id.trim(), key_secret.trim()))
    }

    pub fn default_credentials_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".veracode").join("credentials"))
    }

    /// Reads one `[profile]` section of an INI-style credentials file.
    /// Returns `Ok(None)` when the file does not exist or has no such profile.
    pub fn from_credentials_file(path: &Path, profile: &str) -> Result<Option<Self>, CredentialsError> {
        if !path.exists() {
            return Ok(None);
        }
        let file = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()
            .map_err(|source| CredentialsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let field = |key: &str| file.get_string(&format!("{profile}.{key}")).ok();
        match (field("veracode_api_key_id"), field("veracode_api_key_secret")) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Ok(Some(Self::new(id.trim(), secret.trim())))
            }
            (None, None) => Ok(None),
            _ => Err(CredentialsError::Incomplete {
                path: path.to_path_buf(),
                profile: profile.to_string(),
            }),
        }
    }

    /// Environment variables win over the credentials file.
    pub fn discover() -> Result<Self, CredentialsError> {
        if let Some(credentials) = Self::from_env() {
            return Ok(credentials);
        }
        let path = Self::default_credentials_path().unwrap_or_else(|| PathBuf::from(".veracode/credentials"));
        let profile = std::env::var(PROFILE_ENV).unwrap_or_else(|_| "default".to_string());
        Self::from_credentials_file(&path, &profile)?.ok_or(CredentialsError::Missing { searched: path })
    }
}

// Region-scoped keys look like `vera01ei-<key>`; only the key part is signed.
fn strip_region_prefix(value: &str) -> String {
    if !value.starts_with("vera") {
        return value.to_string();
    }
    match value.split_once('-') {
        Some((_, key)) if !key.is_empty() => key.to_string(),
        _ => value.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct HmacSigner {
    credentials: ApiCredentials,
}

impl HmacSigner {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    pub fn from_discovered_credentials() -> Result<Self, CredentialsError> {
        ApiCredentials::discover().map(Self::new)
    }

    /// Deterministic signature for a given timestamp and nonce.
    pub fn sign_at(
        &self,
        method: &Method,
        url: &Url,
        timestamp_ms: i64,
        nonce: &[u8],
    ) -> anyhow::Result<String> {
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("url {url} has no host"))?
            .to_ascii_lowercase();
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let signing_data = format!(
            "id={}&host={}&url={}&method={}",
            self.credentials.key_id,
            host,
            path,
            method.as_str().to_ascii_uppercase()
        );

        let secret = hex::decode(&self.credentials.key_secret)
            .map_err(|err| anyhow::anyhow!("API key secret is not valid hex: {err}"))?;
        let key_nonce = hmac_sha256(&secret, nonce)?;
        let key_date = hmac_sha256(&key_nonce, timestamp_ms.to_string().as_bytes())?;
        let signature_key = hmac_sha256(&key_date, REQUEST_VERSION)?;
        let signature = hmac_sha256(&signature_key, signing_data.as_bytes())?;

        Ok(format!(
            "{AUTH_SCHEME} id={},ts={},nonce={},sig={}",
            self.credentials.key_id,
            timestamp_ms,
            hex::encode(nonce),
            hex::encode(signature)
        ))
    }
}

impl RequestSigner for HmacSigner {
    fn authorization(&self, method: &Method, url: &Url) -> anyhow::Result<String> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        self.sign_at(method, url, Utc::now().timestamp_millis(), &nonce)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| anyhow::anyhow!("invalid HMAC key: {err}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
