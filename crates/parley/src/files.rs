use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

use crate::errors::{AgentError, AgentResult};

/// A file fetched from storage, with the name used to pick an extractor
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl DownloadedFile {
    /// Lower-cased extension including the dot, or an empty string
    pub fn extension(&self) -> String {
        match self.name.rfind('.') {
            Some(pos) if pos > 0 => self.name[pos..].to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Storage the agent reads user documents from and writes generated files to.
/// Every call is made on behalf of the end user identified by `api_key`.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn download(&self, api_key: &str, url: &str) -> AgentResult<DownloadedFile>;

    async fn upload(
        &self,
        api_key: &str,
        url: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AgentResult<()>;

    /// Path of the application's private folder in the user's bucket
    async fn appdata_home(&self, api_key: &str) -> AgentResult<String>;
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    #[serde(default)]
    appdata: Option<String>,
}

/// File API of a DIAL gateway
pub struct DialFileStorage {
    client: Client,
    host: String,
}

impl DialFileStorage {
    pub fn new<S: Into<String>>(host: S) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn check(response: Response, action: &str, url: &str) -> AgentResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::Storage(format!(
            "Failed to {} {}: {} {}",
            action, url, status, body
        )))
    }
}

fn file_name(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    urlencoding::decode(last)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| last.to_string())
}

fn storage_error(e: reqwest::Error) -> AgentError {
    AgentError::Storage(e.to_string())
}

#[async_trait]
impl FileStorage for DialFileStorage {
    async fn download(&self, api_key: &str, url: &str) -> AgentResult<DownloadedFile> {
        tracing::debug!(url, "downloading file");
        let response = self
            .client
            .get(self.api_url(url))
            .header("Api-Key", api_key)
            .send()
            .await
            .map_err(storage_error)?;
        let response = Self::check(response, "download", url).await?;
        let bytes = response.bytes().await.map_err(storage_error)?;

        Ok(DownloadedFile {
            name: file_name(url),
            bytes: bytes.to_vec(),
        })
    }

    async fn upload(
        &self,
        api_key: &str,
        url: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AgentResult<()> {
        tracing::debug!(url, size = bytes.len(), "uploading file");
        let part = Part::bytes(bytes)
            .file_name(file_name(url))
            .mime_str(content_type)
            .map_err(storage_error)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .put(self.api_url(url))
            .header("Api-Key", api_key)
            .multipart(form)
            .send()
            .await
            .map_err(storage_error)?;
        Self::check(response, "upload", url).await?;
        Ok(())
    }

    async fn appdata_home(&self, api_key: &str) -> AgentResult<String> {
        let response = self
            .client
            .get(self.api_url("bucket"))
            .header("Api-Key", api_key)
            .send()
            .await
            .map_err(storage_error)?;
        let response = Self::check(response, "resolve", "bucket").await?;
        let info: BucketInfo = response.json().await.map_err(storage_error)?;

        info.appdata
            .map(|home| home.trim_matches('/').to_string())
            .filter(|home| !home.is_empty())
            .ok_or_else(|| {
                AgentError::Storage("The bucket has no application data folder".to_string())
            })
    }
}
