//! Exchange credentials and their recovery chain
//!
//! Credentials live in the trading config, but are also copied into a dedicated
//! backup file and embedded in every state snapshot. When the config comes up
//! without a usable key/secret pair, [`CredentialRecovery`] polls an ordered
//! list of [`CredentialProvider`]s and stops at the first complete pair.


use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// API key/secret pair
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiCredentials {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
}

impl ApiCredentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    /// Both key and secret are present
    pub fn is_complete(&self) -> bool {
        !self.key.is_empty() && !self.secret.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty() && self.secret.is_empty()
    }

    /// Key with everything but the last four characters hidden
    pub fn masked_key(&self) -> String {
        let n = self.key.chars().count();
        if n <= 4 {
            return "*".repeat(n);
        }
        let tail: String = self.key.chars().skip(n - 4).collect();
        format!("****{}", tail)
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key", &self.masked_key())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Dedicated credential backup file record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBackup {
    pub api_key: String,
    pub api_secret: String,
    pub timestamp: DateTime<Utc>,
    /// Config file the keys came from
    pub source: String,
}

/// Write the dedicated backup file. Failures are logged.
pub async fn write_backup(path: &Path, creds: &ApiCredentials, source: &Path) -> bool {
    let backup = CredentialBackup {
        api_key: creds.key.clone(),
        api_secret: creds.secret.clone(),
        timestamp: Utc::now(),
        source: source.display().to_string(),
    };

    let result: Result<()> = async {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let content = serde_json::to_string_pretty(&backup)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            info!("API keys backed up to {}", path.display());
            true
        }
        Err(e) => {
            error!("Error backing up API keys: {}", e);
            false
        }
    }
}

/// A source of previously saved credentials
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Human-readable source, used in logs
    fn name(&self) -> String;

    /// Read credentials. `Ok(None)` when the source does not exist or holds
    /// no complete pair.
    async fn fetch(&self) -> Result<Option<ApiCredentials>>;
}

/// Flat `{"api_key": .., "api_secret": ..}` file
#[derive(Deserialize)]
struct KeyFile {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    api_secret: String,
}

/// Only the credential block of a state snapshot
#[derive(Deserialize)]
struct SnapshotKeys {
    #[serde(default)]
    api_keys: ApiCredentials,
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn complete(creds: ApiCredentials) -> Option<ApiCredentials> {
    creds.is_complete().then_some(creds)
}

/// Reads a flat key file: the dedicated backup or a well-known location
pub struct KeyFileProvider {
    path: PathBuf,
}

impl KeyFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialProvider for KeyFileProvider {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<Option<ApiCredentials>> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        let file: KeyFile = serde_json::from_str(&content)?;
        Ok(complete(ApiCredentials::new(file.api_key, file.api_secret)))
    }
}

/// Reads the `api_keys` block embedded in the last state snapshot
pub struct SnapshotProvider {
    path: PathBuf,
}

impl SnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialProvider for SnapshotProvider {
    fn name(&self) -> String {
        format!("state snapshot {}", self.path.display())
    }

    async fn fetch(&self) -> Result<Option<ApiCredentials>> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        let snapshot: SnapshotKeys = serde_json::from_str(&content)?;
        Ok(complete(snapshot.api_keys))
    }
}

/// Recovered credentials and where they came from
#[derive(Debug, Clone)]
pub struct Recovered {
    pub credentials: ApiCredentials,
    pub source: String,
}

/// Ordered credential fallback chain
pub struct CredentialRecovery {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialRecovery {
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Backup file, then state snapshot, then each fallback path in order
    pub fn standard(backup_file: &Path, state_file: &Path, fallback_paths: &[PathBuf]) -> Self {
        let mut providers: Vec<Box<dyn CredentialProvider>> = vec![
            Box::new(KeyFileProvider::new(backup_file)),
            Box::new(SnapshotProvider::new(state_file)),
        ];
        for path in fallback_paths {
            providers.push(Box::new(KeyFileProvider::new(path.clone())));
        }
        Self::new(providers)
    }

    /// Poll providers in priority order; lower-priority sources are not
    /// touched once one yields a complete pair.
    pub async fn recover(&self) -> Option<Recovered> {
        info!("API keys missing or empty, attempting recovery...");

        for provider in &self.providers {
            match provider.fetch().await {
                Ok(Some(credentials)) => {
                    info!("Recovered API keys from {}", provider.name());
                    return Some(Recovered {
                        credentials,
                        source: provider.name(),
                    });
                }
                Ok(None) => debug!("No API keys in {}", provider.name()),
                Err(e) => error!("Error recovering API keys from {}: {}", provider.name(), e),
            }
        }

        warn!("Could not recover API keys from any backup location");
        None
    }
}
