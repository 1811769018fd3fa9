//! Plain HTTP strategy: downloads the full notebook, outputs included.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{NotebookFetcher, NotebookId};
use crate::error::Result;

const SCRIPT_CONTENT_URL: &str = "https://www.kaggle.com/kernels/scriptcontent";

pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(timeout, SCRIPT_CONTENT_URL)
    }

    pub fn with_base_url(timeout: Duration, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Download URL of a kernel version.
    pub fn url_for(&self, id: &NotebookId) -> String {
        format!("{}/{}/download", self.base_url, id.version_id)
    }
}

#[async_trait]
impl NotebookFetcher for HttpFetcher {
    async fn fetch(&self, id: &NotebookId) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.url_for(id))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        assert_eq!(
            fetcher.url_for(&NotebookId::new("alice", "eda", 1234)),
            "https://www.kaggle.com/kernels/scriptcontent/1234/download"
        );
    }
}
