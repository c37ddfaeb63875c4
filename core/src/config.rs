use crate::chat::FailedSendPolicy;
use crate::transport::DEFAULT_TIMEOUT;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8001";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub backend_url: Url,
    pub request_timeout: Duration,
    pub storage_dir: PathBuf,
    pub failed_send_policy: FailedSendPolicy,
}

#[derive(thiserror::Error, Debug)]
pub enum ClientConfigError {
    #[error("client configuration invalid: {0}")]
    Invalid(String),
}

impl ClientConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => format!("MAL0 is misconfigured: {detail}. Update mal0.yaml."),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    pub backend_url: Option<String>,
    pub timeout_secs: Option<String>,
    pub storage_dir: Option<String>,
}

impl SettingsOverrides {
    pub fn from_environment() -> Self {
        Self {
            backend_url: std::env::var("MAL0_BACKEND_URL").ok(),
            timeout_secs: std::env::var("MAL0_TIMEOUT_SECS").ok(),
            storage_dir: std::env::var("MAL0_STORAGE_DIR").ok(),
        }
    }
}

impl ClientSettings {
    /// `.env`, then `mal0.yaml`, then `MAL0_*` environment variables.
    pub fn load() -> Result<Self, ClientConfigError> {
        dotenvy::dotenv().ok();
        let section = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ClientConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                parse_config(&contents)?
            }
            None => ClientSection::default(),
        };
        resolve_settings(section, SettingsOverrides::from_environment())
    }

    pub fn with_backend(backend_url: Url) -> Self {
        Self {
            backend_url,
            request_timeout: DEFAULT_TIMEOUT,
            storage_dir: default_storage_dir(),
            failed_send_policy: FailedSendPolicy::default(),
        }
    }
}

fn parse_config(contents: &str) -> Result<ClientSection, ClientConfigError> {
    let config: Mal0Config = serde_yaml::from_str(contents)
        .map_err(|err| ClientConfigError::Invalid(format!("invalid mal0.yaml: {err}")))?;
    Ok(config.client.unwrap_or_default())
}

fn resolve_settings(
    section: ClientSection,
    overrides: SettingsOverrides,
) -> Result<ClientSettings, ClientConfigError> {
    let raw_url = overrides
        .backend_url
        .or(section.backend_url)
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
    let backend_url = Url::parse(raw_url.trim())
        .map_err(|err| ClientConfigError::Invalid(format!("backend url `{raw_url}`: {err}")))?;
    if !matches!(backend_url.scheme(), "http" | "https") {
        return Err(ClientConfigError::Invalid(format!(
            "backend url `{raw_url}` must use http or https"
        )));
    }

    let timeout_secs = match overrides.timeout_secs {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|err| ClientConfigError::Invalid(format!("timeout `{raw}`: {err}")))?,
        None => section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT.as_secs()),
    };
    if timeout_secs == 0 {
        return Err(ClientConfigError::Invalid(
            "timeout must be at least one second".to_string(),
        ));
    }

    let storage_dir = overrides
        .storage_dir
        .map(PathBuf::from)
        .or(section.storage_dir)
        .unwrap_or_else(default_storage_dir);

    Ok(ClientSettings {
        backend_url,
        request_timeout: Duration::from_secs(timeout_secs),
        storage_dir,
        failed_send_policy: section.failed_send_policy.unwrap_or_default(),
    })
}

pub fn default_storage_dir() -> PathBuf {
    match BaseDirs::new() {
        Some(base) => base.data_dir().join("mal0"),
        None => PathBuf::from(".mal0"),
    }
}

fn locate_config_file() -> Option<PathBuf> {
    mal0_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn mal0_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("mal0");
        paths.push(config_dir.join("mal0.yaml"));
        paths.push(config_dir.join("mal0.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".mal0").join("mal0.yaml"));
        paths.push(home_dir.join(".mal0").join("mal0.yml"));
    } else {
        paths.push(PathBuf::from("mal0.yaml"));
        paths.push(PathBuf::from("mal0.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct Mal0Config {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    backend_url: Option<String>,
    timeout_secs: Option<u64>,
    storage_dir: Option<PathBuf>,
    failed_send_policy: Option<FailedSendPolicy>,
}
