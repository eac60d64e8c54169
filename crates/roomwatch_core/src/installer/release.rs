//! Upstream release index and asset download.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::InstallError;
use crate::models::ToolSpec;

const GITHUB_API: &str = "https://api.github.com";
const GITHUB_WEB: &str = "https://github.com";

/// Where release versions and archives come from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Tag of the latest published release of `repo` ("owner/name").
    async fn latest_version(&self, repo: &str) -> Result<String, InstallError>;

    /// Download the tool's release asset for `version` into `dest`.
    async fn download(&self, spec: &ToolSpec, version: &str, dest: &Path)
        -> Result<(), InstallError>;
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: Option<String>,
}

/// GitHub releases over HTTPS.
pub struct GitHubReleases {
    http: reqwest::Client,
}

impl GitHubReleases {
    pub fn new(timeout: Duration) -> Result<Self, InstallError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("roomwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(InstallError::Client)?;
        Ok(Self { http })
    }

    pub fn asset_url(spec: &ToolSpec, version: &str) -> String {
        format!(
            "{}/{}/releases/download/{}/{}",
            GITHUB_WEB, spec.github_repo, version, spec.asset_name
        )
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn latest_version(&self, repo: &str) -> Result<String, InstallError> {
        let url = format!("{}/repos/{}/releases/latest", GITHUB_API, repo);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| InstallError::version_lookup(repo, e))?;

        let release: LatestRelease = response
            .json()
            .await
            .map_err(|e| InstallError::version_lookup(repo, e))?;

        match release.tag_name {
            Some(tag) if !tag.is_empty() => {
                tracing::info!("Latest release of {}: {}", repo, tag);
                Ok(tag)
            }
            _ => Err(InstallError::version_lookup(repo, "release has no tag")),
        }
    }

    async fn download(
        &self,
        spec: &ToolSpec,
        version: &str,
        dest: &Path,
    ) -> Result<(), InstallError> {
        let url = Self::asset_url(spec, version);
        tracing::info!("Downloading {} {} from {}", spec.display_name, version, url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| InstallError::download(&url, e))?;

        if !response.status().is_success() {
            return Err(InstallError::download(
                &url,
                format!("HTTP {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| InstallError::download(&url, e))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!("Downloaded {} bytes to {}", downloaded, dest.display());
        Ok(())
    }
}
