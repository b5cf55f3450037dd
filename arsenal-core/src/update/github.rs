//! GitHub upstream version lookups
//!
//! Latest release tag with a latest-commit fallback for repositories that do
//! not cut releases. Transient network failures are retried once with backoff.

use backon::Retryable;
use serde::Deserialize;
use tracing::debug;

use crate::retry::{build_backoff, is_transient_error, RetryConfig};
use crate::{Error, Result};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("arsenal/", env!("CARGO_PKG_VERSION"));

/// A downloadable release asset
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
}

/// Client for the GitHub releases/commits API
pub struct GitHubChecker {
    client: reqwest::Client,
    token: Option<String>,
    retry: RetryConfig,
}

impl GitHubChecker {
    /// Create a checker, reading an optional token from `GITHUB_TOKEN`
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            token: std::env::var("GITHUB_TOKEN").ok(),
            retry: RetryConfig::default(),
        }
    }

    /// Latest upstream version for `owner/name`: the release tag, or the short
    /// commit hash when the repository has no releases. Normalized (no `v`).
    pub async fn latest_version(&self, repo: &str) -> Result<String> {
        let repo = repo.to_string();
        (|| async { self.fetch_latest_version(&repo).await })
            .retry(build_backoff(&self.retry))
            .when(|err: &Error| is_transient_error(&err.to_string()))
            .await
    }

    /// Latest release tag and assets, for the release-binary strategy
    pub async fn latest_release(&self, repo: &str) -> Result<(String, Vec<ReleaseAsset>)> {
        let repo = repo.to_string();
        (|| async {
            let release = self.fetch_release(&repo).await?;
            Ok((normalize(&release.tag_name), release.assets))
        })
        .retry(build_backoff(&self.retry))
        .when(|err: &Error| is_transient_error(&err.to_string()))
        .await
    }

    /// Download a release asset into memory
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let url = url.to_string();
        (|| async {
            let response = self
                .client
                .get(&url)
                .header("User-Agent", USER_AGENT)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(Error::Network(format!(
                    "download of {url} failed with status {}",
                    response.status()
                )));
            }
            Ok(response.bytes().await?.to_vec())
        })
        .retry(build_backoff(&self.retry))
        .when(|err: &Error| is_transient_error(&err.to_string()))
        .await
    }

    async fn fetch_latest_version(&self, repo: &str) -> Result<String> {
        match self.fetch_release(repo).await {
            Ok(release) => Ok(normalize(&release.tag_name)),
            // No releases published: fall back to the newest commit
            Err(Error::NotFound(_)) => self.fetch_latest_commit(repo).await,
            Err(err) => Err(err),
        }
    }

    async fn fetch_release(&self, repo: &str) -> Result<Release> {
        let url = format!("{API_BASE}/repos/{repo}/releases/latest");
        let response = self.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json::<Release>().await?),
            reqwest::StatusCode::NOT_FOUND => Err(Error::NotFound(format!("{repo} releases"))),
            status => Err(Error::Network(format!(
                "GitHub API returned {status} for {repo}"
            ))),
        }
    }

    async fn fetch_latest_commit(&self, repo: &str) -> Result<String> {
        let url = format!("{API_BASE}/repos/{repo}/commits?per_page=1");
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "GitHub API returned {} for {repo} commits",
                response.status()
            )));
        }
        let commits: Vec<Commit> = response.json().await?;
        let commit = commits
            .first()
            .ok_or_else(|| Error::Network(format!("{repo} has no commits")))?;
        debug!(repo, sha = %commit.sha, "resolved upstream to latest commit");
        Ok(commit.sha.chars().take(7).collect())
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(ref token) = self.token {
            builder = builder.header("Authorization", format!("token {token}"));
        }
        builder
    }
}

impl Default for GitHubChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip a leading `v` so tags compare against probed versions
fn normalize(tag: &str) -> String {
    tag.trim().trim_start_matches('v').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_v_prefix() {
        assert_eq!(normalize("v3.1.0"), "3.1.0");
        assert_eq!(normalize("3.1.0"), "3.1.0");
        assert_eq!(normalize(" v2.1.0-dev "), "2.1.0-dev");
    }
}
