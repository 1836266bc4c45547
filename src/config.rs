use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

// Cloud Foundry publishes application identity and bound services through
// the VCAP_APPLICATION / VCAP_SERVICES environment variables.
const VCAP_APPLICATION: &str = "VCAP_APPLICATION";
const VCAP_SERVICES: &str = "VCAP_SERVICES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed VCAP_APPLICATION: {0}")]
    Application(#[source] serde_json::Error),
    #[error("malformed VCAP_SERVICES: {0}")]
    Services(#[source] serde_json::Error),
}

/// Identity and instance info of the running application, as reported
/// by the deployment platform. Parsed all-or-nothing: a record missing
/// any of these fields is treated as no metadata at all.
#[derive(Debug, Clone, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub space_id: String,
    #[serde(rename = "application_id")]
    pub id: String,
    #[serde(rename = "application_version")]
    pub version: String,
    #[serde(rename = "application_uris")]
    pub uris: Vec<String>,
    pub instance_index: i64,
}

impl AppInfo {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::Application)
    }
}

/// One bound service instance: its service label and plan tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub label: String,
    pub plan: String,
}

// VCAP_SERVICES groups instances under their service label; each entry
// repeats the label and may omit the plan (user-provided services).
#[derive(Debug, Deserialize)]
struct RawServiceInstance {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    plan: Option<String>,
}

pub fn services_from_json(raw: &str) -> Result<Vec<ServiceBinding>, ConfigError> {
    let grouped: BTreeMap<String, Vec<RawServiceInstance>> =
        serde_json::from_str(raw).map_err(ConfigError::Services)?;

    let mut bindings = Vec::new();
    for (key, instances) in grouped {
        for instance in instances {
            bindings.push(ServiceBinding {
                label: instance.label.unwrap_or_else(|| key.clone()),
                plan: instance.plan.unwrap_or_default(),
            });
        }
    }
    Ok(bindings)
}

/// Snapshot of the deployment-platform environment, passed explicitly
/// into the tracker. Absent or malformed data degrades to "not present"
/// rather than an error.
#[derive(Debug, Clone, Default)]
pub struct CloudEnv {
    pub app: Option<AppInfo>,
    pub services: Vec<ServiceBinding>,
}

impl CloudEnv {
    /// Reads VCAP_APPLICATION / VCAP_SERVICES from the process environment.
    pub fn from_process_env() -> Self {
        let app = std::env::var(VCAP_APPLICATION).ok();
        let services = std::env::var(VCAP_SERVICES).ok();
        Self::from_json(app.as_deref(), services.as_deref())
    }

    /// Builds the snapshot from caller-supplied JSON strings.
    pub fn from_json(app_json: Option<&str>, services_json: Option<&str>) -> Self {
        let app = app_json.and_then(|raw| match AppInfo::from_json(raw) {
            Ok(app) => Some(app),
            Err(e) => {
                debug!("Ignoring deployment metadata: {}", e);
                None
            }
        });

        let services = services_json
            .map(|raw| match services_from_json(raw) {
                Ok(services) => services,
                Err(e) => {
                    debug!("Ignoring bound services: {}", e);
                    Vec::new()
                }
            })
            .unwrap_or_default();

        Self { app, services }
    }
}
