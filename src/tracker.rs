//! Best-effort usage reporter.
//!
//! # DELIVERY INVARIANT
//! `track()` must **NEVER** surface an error to the host application.
//! Every failure mode (missing platform metadata, unreachable network,
//! non-2xx response, unparseable descriptor) is logged and swallowed.
//! One call, one POST, no retries.

use anyhow::{Context, Result};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CloudEnv;
use crate::descriptor::{fetch_descriptor, RAW_CONTENT_BASE};
use crate::payload::TrackingEvent;

/// Fixed collection endpoint for tracking events.
pub const TRACKER_ENDPOINT: &str = "https://metrics-tracker.mybluemix.net:443/api/v1/track";

const DEFAULT_ORGANIZATION: &str = "IBM";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reporter for a single repository. Construct once, call [`track`] once
/// per event; the deployment environment is injected explicitly.
///
/// [`track`]: Tracker::track
pub struct Tracker {
    env: CloudEnv,
    repository: String,
    organization: String,
    code_version: Option<String>,
    endpoint: String,
    descriptor_base: String,
    client: Client,
}

impl Tracker {
    pub fn new(env: CloudEnv, repository: impl Into<String>) -> Self {
        Self {
            env,
            repository: repository.into(),
            organization: DEFAULT_ORGANIZATION.to_string(),
            code_version: None,
            endpoint: TRACKER_ENDPOINT.to_string(),
            descriptor_base: RAW_CONTENT_BASE.to_string(),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Convenience constructor reading VCAP_APPLICATION / VCAP_SERVICES
    /// from the process environment.
    pub fn from_process_env(repository: impl Into<String>) -> Self {
        Self::new(CloudEnv::from_process_env(), repository)
    }

    /// GitHub organization the repository descriptor is fetched from.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    pub fn with_code_version(mut self, code_version: impl Into<String>) -> Self {
        self.code_version = Some(code_version.into());
        self
    }

    /// Overrides the collection endpoint. Test seam.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Overrides the raw-content host the descriptor is fetched from. Test seam.
    pub fn with_descriptor_base(mut self, base: impl Into<String>) -> Self {
        self.descriptor_base = base.into();
        self
    }

    /// Builds the payload and posts it, fire-and-forget. Logs the outcome
    /// either way and returns nothing.
    pub async fn track(&self) {
        let event = self.build_payload().await;
        if self.env.app.is_none() {
            debug!("No deployment metadata found; sending minimal event (running locally?)");
        }
        match self.send(&event).await {
            Ok(()) => debug!("Tracking event delivered"),
            Err(e) => warn!("Failed to send tracking data: {:#}", e),
        }
    }

    /// Assembles the event: awaits the (optional) descriptor fetch, then
    /// merges deployment metadata. Construction itself cannot fail.
    pub async fn build_payload(&self) -> TrackingEvent {
        let descriptor = fetch_descriptor(
            &self.client,
            &self.descriptor_base,
            &self.organization,
            &self.repository,
        )
        .await;
        TrackingEvent::build(&self.env, self.code_version.clone(), descriptor)
    }

    async fn send(&self, event: &TrackingEvent) -> Result<()> {
        debug!("Posting tracking event to {}", self.endpoint);
        // Header set first: reqwest's json() only adds Content-Type when absent.
        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .json(event)
            .send()
            .await
            .context("tracking request failed")?;

        let status = response.status();
        info!("Tracking service response code: {}", status);
        if status == StatusCode::OK || status == StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            info!("Tracking service response: {}", body);
            Ok(())
        } else {
            anyhow::bail!("tracking service returned {}", status)
        }
    }
}
