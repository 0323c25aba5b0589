//! Typed views of the rows kept in the configuration database.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Subsystem a Config row belongs to (the `COMPONENT` column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Component {
    BrokerApi,
    ManagementApi,
    CloudController,
    BrokerCredentials,
    ApiVersion,
    RoutesRegister,
}

impl Component {
    pub const ALL: [Component; 6] = [
        Component::BrokerApi,
        Component::ManagementApi,
        Component::CloudController,
        Component::BrokerCredentials,
        Component::ApiVersion,
        Component::RoutesRegister,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::BrokerApi => "BROKER_API",
            Component::ManagementApi => "MANAGEMENT_API",
            Component::CloudController => "CLOUD_CONTROLLER",
            Component::BrokerCredentials => "BROKER_CREDENTIALS",
            Component::ApiVersion => "API_VERSION",
            Component::RoutesRegister => "ROUTES_REGISTER",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Component::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::InvalidRequest {
                message: format!("Unknown config component: {}", s),
            })
    }
}

/// One row of the Config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Option<String>,
    pub component: Option<String>,
}

impl ConfigEntry {
    pub fn new(key: &str, value: impl Into<String>, component: Component) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value.into()),
            component: Some(component.as_str().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerApi {
    pub external_url: String,
    pub listen: String,
    pub require_tls: bool,
    pub server_cert_file: String,
    pub server_key_file: String,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudController {
    pub api: String,
    pub skip_tls_validation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagementApi {
    pub listen: String,
    pub dev_mode: bool,
    pub broker_name: String,
    pub uaa_client: String,
    pub uaa_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<serde_json::Value>,
    pub cloud_controller: CloudController,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutesRegister {
    pub broker_api_host: String,
    pub management_api_host: String,
    pub nats_members: Vec<String>,
}

/// Broker settings assembled from the Config table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfiguration {
    pub api_version: String,
    pub broker_api: BrokerApi,
    pub management_api: ManagementApi,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes_register: Option<RoutesRegister>,
    /// Driver instances by guid. Kept in their own tables, not in Config rows.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, Instance>,
}

/// UAA token validation settings stored under MANAGEMENT_API/AUTHENTICATION.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UaaAuth {
    pub adminscope: String,
    pub public_key: String,
}

#[derive(Deserialize)]
struct UaaEnvelope {
    uaa: UaaAuth,
}

// Older writers misspelled the NATS member key; accept both on read.
const NATS_MEMBER_KEYS: [&str; 2] = ["NATS_MEMBER", "NATS_MEMEBER"];

impl BrokerConfiguration {
    pub fn from_entries(entries: &[ConfigEntry]) -> Result<Self> {
        let mut config = BrokerConfiguration::default();
        let mut routes: Option<RoutesRegister> = None;

        for entry in entries {
            let component = match entry.component.as_deref().map(Component::from_str) {
                Some(Ok(c)) => c,
                _ => {
                    debug!(
                        "Ignoring config key {} with component {:?}",
                        entry.key, entry.component
                    );
                    continue;
                }
            };
            let value = entry.value.clone().unwrap_or_default();

            match (component, entry.key.as_str()) {
                (Component::ApiVersion, "API") => config.api_version = value,
                (Component::BrokerApi, "EXTERNAL_URL") => config.broker_api.external_url = value,
                (Component::BrokerApi, "LISTEN") => config.broker_api.listen = value,
                (Component::BrokerApi, "REQUIRE_TLS") => {
                    config.broker_api.require_tls = parse_flag(&entry.key, &value)?
                }
                (Component::BrokerApi, "SERVER_CERT_FILE") => {
                    config.broker_api.server_cert_file = value
                }
                (Component::BrokerApi, "SERVER_KEY_FILE") => config.broker_api.server_key_file = value,
                (Component::BrokerCredentials, "USERNAME") => {
                    config.broker_api.credentials.username = value
                }
                (Component::BrokerCredentials, "PASSWORD") => {
                    config.broker_api.credentials.password = value
                }
                (Component::ManagementApi, "LISTEN") => config.management_api.listen = value,
                (Component::ManagementApi, "DEV_MODE") => {
                    config.management_api.dev_mode = parse_flag(&entry.key, &value)?
                }
                (Component::ManagementApi, "BROKER_NAME") => config.management_api.broker_name = value,
                (Component::ManagementApi, "UAA_CLIENT") => config.management_api.uaa_client = value,
                (Component::ManagementApi, "UAA_SECRET") => config.management_api.uaa_secret = value,
                (Component::ManagementApi, "AUTHENTICATION") => {
                    if !value.is_empty() {
                        config.management_api.authentication = Some(serde_json::from_str(&value)?);
                    }
                }
                (Component::CloudController, "API") => config.management_api.cloud_controller.api = value,
                (Component::CloudController, "SKIP_TLS_VALIDATION") => {
                    config.management_api.cloud_controller.skip_tls_validation =
                        parse_flag(&entry.key, &value)?
                }
                (Component::RoutesRegister, "BROKER_API_HOST") => {
                    routes.get_or_insert_with(RoutesRegister::default).broker_api_host = value
                }
                (Component::RoutesRegister, "MANAGEMENT_API_HOST") => {
                    routes.get_or_insert_with(RoutesRegister::default).management_api_host = value
                }
                (Component::RoutesRegister, key) if NATS_MEMBER_KEYS.contains(&key) => routes
                    .get_or_insert_with(RoutesRegister::default)
                    .nats_members
                    .push(value),
                (component, key) => {
                    debug!("Ignoring unknown config key {}/{}", component, key);
                }
            }
        }

        config.routes_register = routes;
        Ok(config)
    }

    /// Flatten back into Config rows, one per setting.
    pub fn to_entries(&self) -> Vec<ConfigEntry> {
        let broker = &self.broker_api;
        let mgmt = &self.management_api;

        let mut entries = vec![
            ConfigEntry::new("API", &self.api_version, Component::ApiVersion),
            ConfigEntry::new("EXTERNAL_URL", &broker.external_url, Component::BrokerApi),
            ConfigEntry::new("LISTEN", &broker.listen, Component::BrokerApi),
            ConfigEntry::new("REQUIRE_TLS", broker.require_tls.to_string(), Component::BrokerApi),
            ConfigEntry::new("SERVER_CERT_FILE", &broker.server_cert_file, Component::BrokerApi),
            ConfigEntry::new("SERVER_KEY_FILE", &broker.server_key_file, Component::BrokerApi),
            ConfigEntry::new("USERNAME", &broker.credentials.username, Component::BrokerCredentials),
            ConfigEntry::new("PASSWORD", &broker.credentials.password, Component::BrokerCredentials),
            ConfigEntry::new("BROKER_NAME", &mgmt.broker_name, Component::ManagementApi),
            ConfigEntry::new("DEV_MODE", mgmt.dev_mode.to_string(), Component::ManagementApi),
            ConfigEntry::new("LISTEN", &mgmt.listen, Component::ManagementApi),
            ConfigEntry::new("UAA_CLIENT", &mgmt.uaa_client, Component::ManagementApi),
            ConfigEntry::new("UAA_SECRET", &mgmt.uaa_secret, Component::ManagementApi),
            ConfigEntry::new("API", &mgmt.cloud_controller.api, Component::CloudController),
            ConfigEntry::new(
                "SKIP_TLS_VALIDATION",
                mgmt.cloud_controller.skip_tls_validation.to_string(),
                Component::CloudController,
            ),
        ];

        if let Some(routes) = &self.routes_register {
            entries.push(ConfigEntry::new(
                "BROKER_API_HOST",
                &routes.broker_api_host,
                Component::RoutesRegister,
            ));
            entries.push(ConfigEntry::new(
                "MANAGEMENT_API_HOST",
                &routes.management_api_host,
                Component::RoutesRegister,
            ));
            for member in &routes.nats_members {
                entries.push(ConfigEntry::new(
                    NATS_MEMBER_KEYS[0],
                    member,
                    Component::RoutesRegister,
                ));
            }
        }

        if let Some(auth) = &mgmt.authentication {
            entries.push(ConfigEntry::new(
                "AUTHENTICATION",
                auth.to_string(),
                Component::ManagementApi,
            ));
        }

        entries
    }

    pub fn uaa_auth(&self) -> Result<UaaAuth> {
        let auth = self
            .management_api
            .authentication
            .as_ref()
            .ok_or_else(|| StoreError::not_found("Config", "MANAGEMENT_API/AUTHENTICATION"))?;

        parse_uaa_auth(auth)
    }
}

pub fn parse_uaa_auth(auth: &serde_json::Value) -> Result<UaaAuth> {
    let envelope: UaaEnvelope = serde_json::from_value(auth.clone())?;
    Ok(envelope.uaa)
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "t" => Ok(true),
        "false" | "0" | "f" | "" => Ok(false),
        other => Err(StoreError::Serialization(format!(
            "{} is not a boolean: {}",
            key, other
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub free: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A plan offered on a driver instance, with its instance-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dial {
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardClient {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogService {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    pub plan_updateable: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_client: Option<DashboardClient>,
}

/// A target endpoint the broker forwards requests to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub target_url: String,
    pub authentication_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    pub skip_ssl: bool,
    #[serde(default)]
    pub dials: BTreeMap<String, Dial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<CatalogService>,
}

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// NULL and empty blobs decode to `None`.
pub(crate) fn decode_json<T: DeserializeOwned>(blob: Option<Vec<u8>>) -> Result<Option<T>> {
    match blob {
        Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
        _ => Ok(None),
    }
}
