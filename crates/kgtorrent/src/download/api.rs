//! Kaggle REST API strategy.
//!
//! `kernels/pull` returns the notebook source without cell outputs.
//! Credentials come from `KAGGLE_USERNAME`/`KAGGLE_KEY` or, failing that,
//! `~/.kaggle/kaggle.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{NotebookFetcher, NotebookId};
use crate::error::{LoadError, Result};

const KERNELS_PULL_URL: &str = "https://www.kaggle.com/api/v1/kernels/pull";

/// Kaggle account credentials.
#[derive(Clone, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl std::fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleCredentials")
            .field("username", &self.username)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl KaggleCredentials {
    /// Resolve from the environment lookup, then from `kaggle.json`.
    pub fn resolve<F>(lookup: F, config_file: Option<&Path>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(username), Some(key)) = (lookup("KAGGLE_USERNAME"), lookup("KAGGLE_KEY")) {
            return Ok(Self { username, key });
        }

        let path = config_file.ok_or_else(|| {
            LoadError::Config(
                "Kaggle credentials not found: set KAGGLE_USERNAME and KAGGLE_KEY".to_string(),
            )
        })?;
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoadError::Config(format!(
                "Kaggle credentials not found in environment or {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn default_config_file() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kaggle").join("kaggle.json"))
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    blob: PullBlob,
}

#[derive(Debug, Deserialize)]
struct PullBlob {
    source: String,
}

pub struct ApiFetcher {
    client: Client,
    credentials: KaggleCredentials,
}

impl ApiFetcher {
    pub fn new(timeout: Duration, credentials: KaggleCredentials) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, credentials })
    }

    pub fn from_environment(timeout: Duration) -> Result<Self> {
        let config_file = default_config_file();
        let credentials =
            KaggleCredentials::resolve(|k| std::env::var(k).ok(), config_file.as_deref())?;
        Self::new(timeout, credentials)
    }
}

#[async_trait]
impl NotebookFetcher for ApiFetcher {
    async fn fetch(&self, id: &NotebookId) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(KERNELS_PULL_URL)
            .basic_auth(&self.credentials.username, Some(&self.credentials.key))
            .query(&[("userName", id.owner.as_str()), ("kernelSlug", id.slug.as_str())])
            .send()
            .await?
            .error_for_status()?;
        let pulled: PullResponse = response.json().await?;
        Ok(pulled.blob.source.into_bytes())
    }

    fn name(&self) -> &str {
        "api"
    }
}
