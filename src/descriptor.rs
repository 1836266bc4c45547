use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const RAW_CONTENT_BASE: &str = "https://raw.githubusercontent.com";

/// Optional `repository.yaml` published at the root of a tracked
/// repository. Every key is optional and unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryDescriptor {
    pub id: Option<String>,
    pub runtimes: Option<Vec<String>>,
    pub services: Option<Vec<String>>,
    pub event_id: Option<String>,
    pub event_organizer: Option<String>,
}

pub fn descriptor_url(base: &str, organization: &str, repository: &str) -> String {
    format!("{}/{}/{}/master/repository.yaml", base, organization, repository)
}

pub fn parse_descriptor(yaml: &str) -> Result<RepositoryDescriptor> {
    serde_yaml::from_str(yaml).context("parsing repository.yaml")
}

/// Fetches the repository descriptor, degrading to `None` on any failure.
/// The descriptor is strictly optional; an unreachable or unparseable file
/// is logged and otherwise ignored.
pub async fn fetch_descriptor(
    client: &Client,
    base: &str,
    organization: &str,
    repository: &str,
) -> Option<RepositoryDescriptor> {
    let url = descriptor_url(base, organization, repository);
    match try_fetch(client, &url).await {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            debug!("No usable repository descriptor at {}: {:#}", url, e);
            None
        }
    }
}

async fn try_fetch(client: &Client, url: &str) -> Result<RepositoryDescriptor> {
    debug!("Fetching repository descriptor from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .context("descriptor request failed")?;

    if !response.status().is_success() {
        anyhow::bail!("descriptor fetch returned {}", response.status());
    }

    let body = response.text().await.context("reading descriptor body")?;
    parse_descriptor(&body)
}
