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

//! Service and lock timing configuration.

use crate::{ServiceError, ServiceResult};
use std::time::Duration;
use tenure_agent::{service_check_id, SessionBehavior, AGENT_HEALTH_CHECK};

/// Sleep between `is_registered` probes in `Service::wait_for_registration`.
pub const REGISTRATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep between `locked` probes in `Lock::wait`.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration of a [`Service`](crate::Service) and the defaults for its locks.
///
/// ## Defaults
/// - check TTL 60s, heartbeat every 5s
/// - retry interval 5s after agent failures
/// - lock delay 30s
/// - 1s for a lock to acknowledge release, 5s for the service to deregister
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Logical service name (required)
    pub name: String,
    /// Registration id; defaults to `name`
    pub id: Option<String>,
    pub tags: Vec<String>,
    pub port: Option<u16>,
    /// The registration's check turns critical unless refreshed within this
    pub check_ttl: Duration,
    pub heartbeat_interval: Duration,
    /// Sleep after a failed agent call before retrying
    pub retry_interval: Duration,
    /// Default lock delay for locks created by this service
    pub lock_delay: Duration,
    pub release_timeout: Duration,
    pub deregister_timeout: Duration,
    /// The agent's own node health check, bound into every lock session
    pub agent_check_id: String,
    /// Fate of held keys when a lock session is invalidated
    pub session_behavior: SessionBehavior,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            id: None,
            tags: Vec::new(),
            port: None,
            check_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(5),
            lock_delay: Duration::from_secs(30),
            release_timeout: Duration::from_secs(1),
            deregister_timeout: Duration::from_secs(5),
            agent_check_id: AGENT_HEALTH_CHECK.to_string(),
            session_behavior: SessionBehavior::Release,
        }
    }
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_check_ttl(mut self, ttl: Duration) -> Self {
        self.check_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_lock_delay(mut self, lock_delay: Duration) -> Self {
        self.lock_delay = lock_delay;
        self
    }

    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    pub fn with_deregister_timeout(mut self, timeout: Duration) -> Self {
        self.deregister_timeout = timeout;
        self
    }

    pub fn with_session_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.session_behavior = behavior;
        self
    }

    /// Effective registration id.
    pub fn service_id(&self) -> &str {
        self.id.as_deref().filter(|id| !id.is_empty()).unwrap_or(&self.name)
    }

    /// TTL check id the agent derives from the registration id.
    pub fn check_id(&self) -> String {
        service_check_id(self.service_id())
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::InvalidConfig(
                "service name must not be empty".to_string(),
            ));
        }
        if self.check_ttl.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "check TTL must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.check_ttl {
            return Err(ServiceError::InvalidConfig(format!(
                "heartbeat interval {:?} must be non-zero and shorter than the check TTL {:?}",
                self.heartbeat_interval, self.check_ttl
            )));
        }
        if self.retry_interval.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "retry interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::new("awslogidx");
        assert_eq!(config.service_id(), "awslogidx");
        assert_eq!(config.check_id(), "service:awslogidx");
        assert_eq!(config.check_ttl, Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.lock_delay, Duration::from_secs(30));
        assert_eq!(config.agent_check_id, "serfHealth");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_id() {
        let config = ServiceConfig::new("restapi").with_id("restapi-2");
        assert_eq!(config.service_id(), "restapi-2");
        assert_eq!(config.check_id(), "service:restapi-2");

        let empty = ServiceConfig::new("restapi").with_id("");
        assert_eq!(empty.service_id(), "restapi");
    }

    #[test]
    fn test_validation() {
        assert!(ServiceConfig::new("").validate().is_err());
        assert!(ServiceConfig::new("web")
            .with_heartbeat_interval(Duration::from_secs(60))
            .validate()
            .is_err());
        assert!(ServiceConfig::new("web")
            .with_retry_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
