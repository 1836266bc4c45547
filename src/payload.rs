use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{CloudEnv, ServiceBinding};
use crate::descriptor::RepositoryDescriptor;

/// Runtime identifier reported with every event.
pub const RUNTIME: &str = "swift";

// Fixed GMT pattern, independent of the host timezone.
const DATE_SENT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// One usage-telemetry event. Built once per `track()` call and never
/// cached; unset optional members are omitted from the JSON entirely.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingEvent {
    pub date_sent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_version: Option<String>,
    pub runtime: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_uris: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_vcap_services: Option<BTreeMap<String, ServiceSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<DescriptorConfig>,
}

/// Per-label summary of bound services: how many instances carry the
/// label, and the distinct plan names seen across them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub count: u64,
    pub plans: Vec<String>,
}

/// The `config` section of the event, mapped from the repository descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_runtimes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_services: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_organizer: Option<String>,
}

impl From<RepositoryDescriptor> for DescriptorConfig {
    fn from(descriptor: RepositoryDescriptor) -> Self {
        DescriptorConfig {
            repository_id: descriptor.id,
            target_runtimes: descriptor.runtimes,
            target_services: descriptor.services,
            event_id: descriptor.event_id,
            event_organizer: descriptor.event_organizer,
        }
    }
}

pub fn format_date_sent(when: DateTime<Utc>) -> String {
    when.format(DATE_SENT_FORMAT).to_string()
}

/// Groups bindings by service label. A plan string may itself carry a
/// comma-separated list ("Lite, Standard"); each part counts as one plan.
pub fn summarize_services(bindings: &[ServiceBinding]) -> BTreeMap<String, ServiceSummary> {
    let mut summary: BTreeMap<String, ServiceSummary> = BTreeMap::new();
    for binding in bindings {
        let entry = summary
            .entry(binding.label.clone())
            .or_insert_with(|| ServiceSummary {
                count: 0,
                plans: Vec::new(),
            });
        entry.count += 1;
        for plan in binding.plan.split(", ") {
            if !plan.is_empty() && !entry.plans.iter().any(|p| p == plan) {
                entry.plans.push(plan.to_string());
            }
        }
    }
    summary
}

impl TrackingEvent {
    /// Assembles the event from whatever sources are present. Never fails:
    /// an empty environment still yields `{date_sent, runtime}`.
    pub fn build(
        env: &CloudEnv,
        code_version: Option<String>,
        descriptor: Option<RepositoryDescriptor>,
    ) -> Self {
        let app = env.app.as_ref();

        // Bound services are only meaningful alongside application identity.
        let bound_vcap_services = match app {
            Some(_) if !env.services.is_empty() => Some(summarize_services(&env.services)),
            _ => None,
        };

        TrackingEvent {
            date_sent: format_date_sent(Utc::now()),
            code_version,
            runtime: RUNTIME,
            application_name: app.map(|a| a.name.clone()),
            space_id: app.map(|a| a.space_id.clone()),
            application_id: app.map(|a| a.id.clone()),
            application_version: app.map(|a| a.version.clone()),
            application_uris: app.map(|a| a.uris.clone()),
            instance_index: app.map(|a| a.instance_index),
            bound_vcap_services,
            config: descriptor.map(DescriptorConfig::from),
        }
    }
}
