// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Tenure.
//
// Tenure is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Tenure is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Tenure. If not, see <https://www.gnu.org/licenses/>.

//! Config loader with environment variable substitution and precedence.
//!
//! ## Purpose
//! Loads [`ElectionSettings`] (agent connection, service registration and
//! the locks to hold) from a YAML file with:
//! - Environment variable substitution (`${VAR}` or `${VAR:-default}`)
//! - Environment variable precedence over file values
//! - Validation at load time
//!
//! ## Environment Overrides
//! - `TENURE_AGENT_ADDRESS` → `agent.address`
//! - `TENURE_AGENT_TOKEN` → `agent.token`
//! - `TENURE_SERVICE_ID` → `service.id`
//! - `TENURE_SERVICE_NAME` → `service.name`
//!
//! ## Example
//! ```yaml
//! agent:
//!   address: ${CONSUL_HTTP_ADDR:-127.0.0.1:8500}
//!   token: ${CONSUL_HTTP_TOKEN:-}
//! service:
//!   name: awslogidx
//!   tags: [worker]
//! locks:
//!   - key: service/awslogidx/cleanup
//!     lock_delay_secs: 30
//! ```

use crate::ServiceConfig;
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tenure_agent::HttpAgentConfig;
use thiserror::Error;

#[path = "config_loader_yaml.rs"]
mod config_loader_yaml;

use config_loader_yaml::ElectionYaml;

const ENV_PATTERN: &str = r"\$\{([^}:]+)(?::-([^}]*))?\}";

/// Config loader errors
#[derive(Debug, Error)]
pub enum ConfigLoaderError {
    /// File I/O error
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },
    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// Environment variable substitution error
    #[error("Environment variable substitution failed: {0}")]
    EnvSubstitutionError(String),
    /// Settings failed validation
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// A lock the embedding process should hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub lock_delay: Duration,
}

/// Everything needed to run a service and its locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionSettings {
    pub agent: HttpAgentConfig,
    pub service: ServiceConfig,
    pub locks: Vec<LockSpec>,
}

/// Loads [`ElectionSettings`] from YAML.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Variables consulted instead of the process environment (for tests)
    vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Loader reading the process environment.
    pub fn new() -> Self {
        Self { vars: None }
    }

    /// Loader that resolves variables from `vars` only.
    pub fn with_vars(vars: HashMap<String, String>) -> Self {
        Self { vars: Some(vars) }
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        }
    }

    /// Load settings from a YAML file with variables substituted.
    ///
    /// ## Errors
    /// - `ConfigLoaderError::IoError` if the file cannot be read
    /// - `ConfigLoaderError::EnvSubstitutionError` if a required variable is unset
    /// - `ConfigLoaderError::YamlError` if YAML parsing fails
    /// - `ConfigLoaderError::ValidationError` if the settings are inconsistent
    pub async fn load(&self, path: &str) -> Result<ElectionSettings, ConfigLoaderError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigLoaderError::IoError {
                path: path.to_string(),
                source: e,
            })?;
        self.parse(&content)
    }

    /// Load settings, then apply `TENURE_*` overrides.
    pub async fn load_with_env_precedence(
        &self,
        path: &str,
    ) -> Result<ElectionSettings, ConfigLoaderError> {
        let mut settings = self.load(path).await?;
        self.apply_env_overrides(&mut settings);
        validate(&settings)?;
        Ok(settings)
    }

    /// Parse settings from YAML text.
    pub fn parse(&self, content: &str) -> Result<ElectionSettings, ConfigLoaderError> {
        let substituted = self.substitute_env_vars(content)?;
        let yaml: ElectionYaml = serde_yaml::from_str(&substituted)?;
        let settings = convert_yaml(yaml);
        validate(&settings)?;
        Ok(settings)
    }

    /// Substitute `${VAR}` (required) and `${VAR:-default}` references.
    fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigLoaderError> {
        let re = Regex::new(ENV_PATTERN)
            .map_err(|e| ConfigLoaderError::EnvSubstitutionError(e.to_string()))?;

        let mut result = String::with_capacity(content.len());
        let mut last = 0;
        for cap in re.captures_iter(content) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let name = name.as_str().trim();
            let value = match (self.var(name), cap.get(2)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => {
                    return Err(ConfigLoaderError::EnvSubstitutionError(format!(
                        "Environment variable '{}' is not set and no default provided",
                        name
                    )))
                }
            };
            result.push_str(&content[last..whole.start()]);
            result.push_str(&value);
            last = whole.end();
        }
        result.push_str(&content[last..]);
        Ok(result)
    }

    /// Environment variables override file values.
    fn apply_env_overrides(&self, settings: &mut ElectionSettings) {
        if let Some(address) = self.var("TENURE_AGENT_ADDRESS") {
            settings.agent.address = HttpAgentConfig::new(address).address;
        }
        if let Some(token) = self.var("TENURE_AGENT_TOKEN") {
            settings.agent.token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(id) = self.var("TENURE_SERVICE_ID") {
            settings.service.id = Some(id);
        }
        if let Some(name) = self.var("TENURE_SERVICE_NAME") {
            settings.service.name = name;
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn convert_yaml(yaml: ElectionYaml) -> ElectionSettings {
    let agent = HttpAgentConfig {
        token: non_empty(yaml.agent.token),
        datacenter: non_empty(yaml.agent.datacenter),
        ..HttpAgentConfig::new(yaml.agent.address)
    }
    .with_request_timeout(Duration::from_secs(yaml.agent.request_timeout_secs))
    .with_wait_time(Duration::from_secs(yaml.agent.wait_time_secs));

    let s = yaml.service;
    let service = ServiceConfig {
        name: s.name,
        id: non_empty(s.id),
        tags: s.tags,
        port: s.port,
        check_ttl: Duration::from_secs(s.check_ttl_secs),
        heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs),
        retry_interval: Duration::from_secs(s.retry_interval_secs),
        lock_delay: Duration::from_secs(s.lock_delay_secs),
        release_timeout: Duration::from_secs(s.release_timeout_secs),
        deregister_timeout: Duration::from_secs(s.deregister_timeout_secs),
        session_behavior: s.session_behavior,
        ..ServiceConfig::default()
    };

    let locks = yaml
        .locks
        .into_iter()
        .map(|lock| LockSpec {
            key: lock.key,
            value: lock.value.map(String::into_bytes),
            lock_delay: lock
                .lock_delay_secs
                .map_or(service.lock_delay, Duration::from_secs),
        })
        .collect();

    ElectionSettings {
        agent,
        service,
        locks,
    }
}

fn validate(settings: &ElectionSettings) -> Result<(), ConfigLoaderError> {
    settings
        .service
        .validate()
        .map_err(|e| ConfigLoaderError::ValidationError(e.to_string()))?;
    let mut seen = std::collections::HashSet::new();
    for lock in &settings.locks {
        if lock.key.trim().is_empty() {
            return Err(ConfigLoaderError::ValidationError(
                "lock key must not be empty".to_string(),
            ));
        }
        if !seen.insert(lock.key.as_str()) {
            return Err(ConfigLoaderError::ValidationError(format!(
                "lock key '{}' listed more than once",
                lock.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenure_agent::SessionBehavior;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_env_vars_simple() {
        let loader = ConfigLoader::with_vars(vars(&[("TEST_VAR", "test-value")]));
        let result = loader.substitute_env_vars("value: ${TEST_VAR}").unwrap();
        assert_eq!(result, "value: test-value");
    }

    #[test]
    fn test_substitute_env_vars_with_default() {
        let loader = ConfigLoader::with_vars(HashMap::new());
        let result = loader
            .substitute_env_vars("a: ${MISSING_VAR:-default-value}\nb: '${EMPTY:-}'")
            .unwrap();
        assert_eq!(result, "a: default-value\nb: ''");
    }

    #[test]
    fn test_substitute_env_vars_missing_required() {
        let loader = ConfigLoader::with_vars(HashMap::new());
        let result = loader.substitute_env_vars("value: ${REQUIRED_VAR}");
        assert!(matches!(
            result,
            Err(ConfigLoaderError::EnvSubstitutionError(_))
        ));
    }

    #[test]
    fn test_parse_defaults() {
        let loader = ConfigLoader::with_vars(HashMap::new());
        let settings = loader.parse("service:\n  name: awslogidx\n").unwrap();
        assert_eq!(settings.agent.address, "http://127.0.0.1:8500");
        assert_eq!(settings.service, ServiceConfig::new("awslogidx"));
        assert!(settings.locks.is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let loader = ConfigLoader::with_vars(vars(&[("CONSUL_HTTP_ADDR", "10.1.2.3:8500")]));
        let yaml = r#"
agent:
  address: ${CONSUL_HTTP_ADDR}
  token: ${CONSUL_HTTP_TOKEN:-}
  datacenter: dc2
  wait_time_secs: 60
service:
  name: restapi
  id: restapi-2
  tags: [api, v2]
  port: 8080
  lock_delay_secs: 15
  session_behavior: delete
locks:
  - key: service/restapi/cleanup
  - key: service/restapi/reindex
    value: node-a
    lock_delay_secs: 45
"#;
        let settings = loader.parse(yaml).unwrap();
        assert_eq!(settings.agent.address, "http://10.1.2.3:8500");
        assert_eq!(settings.agent.token, None);
        assert_eq!(settings.agent.datacenter.as_deref(), Some("dc2"));
        assert_eq!(settings.agent.wait_time, Duration::from_secs(60));
        assert_eq!(settings.service.service_id(), "restapi-2");
        assert_eq!(settings.service.port, Some(8080));
        assert_eq!(settings.service.session_behavior, SessionBehavior::Delete);
        assert_eq!(settings.locks.len(), 2);
        assert_eq!(settings.locks[0].lock_delay, Duration::from_secs(15));
        assert_eq!(settings.locks[0].value, None);
        assert_eq!(settings.locks[1].lock_delay, Duration::from_secs(45));
        assert_eq!(settings.locks[1].value, Some(b"node-a".to_vec()));
    }

    #[test]
    fn test_validation_errors() {
        let loader = ConfigLoader::with_vars(HashMap::new());
        let result = loader.parse("service:\n  name: web\n  heartbeat_interval_secs: 90\n");
        assert!(matches!(result, Err(ConfigLoaderError::ValidationError(_))));

        let result = loader.parse("service:\n  name: web\nlocks:\n  - key: a\n  - key: a\n");
        assert!(matches!(result, Err(ConfigLoaderError::ValidationError(_))));

        let result = loader.parse("service:\n  name: web\n  colour: blue\n");
        assert!(matches!(result, Err(ConfigLoaderError::YamlError(_))));

        let result = loader.parse("service:\n  name: web\n  session_behavior: keep\n");
        assert!(matches!(result, Err(ConfigLoaderError::YamlError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let loader = ConfigLoader::with_vars(vars(&[
            ("TENURE_AGENT_ADDRESS", "consul.internal:8500"),
            ("TENURE_AGENT_TOKEN", "s3cr3t"),
            ("TENURE_SERVICE_ID", "awslogidx-7"),
        ]));
        let mut settings = loader.parse("service:\n  name: awslogidx\n").unwrap();
        loader.apply_env_overrides(&mut settings);
        assert_eq!(settings.agent.address, "http://consul.internal:8500");
        assert_eq!(settings.agent.token.as_deref(), Some("s3cr3t"));
        assert_eq!(settings.service.service_id(), "awslogidx-7");
        assert_eq!(settings.service.name, "awslogidx");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let loader = ConfigLoader::new();
        let result = loader.load("/nonexistent/tenure.yaml").await;
        assert!(matches!(result, Err(ConfigLoaderError::IoError { .. })));
    }
}
