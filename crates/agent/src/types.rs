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

//! Request and response types exchanged with the coordination agent.

use serde::Deserialize;
use std::time::Duration;

/// Check id of the agent's own node health check. Sessions bound to it are
/// invalidated when the agent itself is considered unhealthy.
pub const AGENT_HEALTH_CHECK: &str = "serfHealth";

/// Id of the implicit TTL check the agent creates for a registered service.
pub fn service_check_id(service_id: &str) -> String {
    format!("service:{service_id}")
}

/// Service registration with an implicit TTL check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub port: Option<u16>,
    /// The check turns critical unless refreshed within this interval.
    pub check_ttl: Duration,
}

impl ServiceRegistration {
    pub fn check_id(&self) -> String {
        service_check_id(&self.id)
    }
}

/// What happens to keys held by a session when it is invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Keys are released (session cleared) and stay in the store.
    #[default]
    Release,
    /// Keys are deleted.
    Delete,
}

impl SessionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionBehavior::Release => "release",
            SessionBehavior::Delete => "delete",
        }
    }
}

/// Parameters for creating a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub name: Option<String>,
    /// Window after invalidation during which the session's keys cannot be
    /// acquired by any session.
    pub lock_delay: Duration,
    /// Health checks the session is bound to.
    pub checks: Vec<String>,
    pub behavior: SessionBehavior,
}

impl SessionRequest {
    /// Session bound only to the agent's own health check.
    pub fn new(lock_delay: Duration) -> Self {
        Self {
            name: None,
            lock_delay,
            checks: vec![AGENT_HEALTH_CHECK.to_string()],
            behavior: SessionBehavior::Release,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_checks(mut self, checks: Vec<String>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// A key-value record as returned by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    /// Session currently holding the key, if any.
    pub session: Option<String>,
    pub flags: u64,
    pub create_index: u64,
    pub modify_index: u64,
    pub lock_index: u64,
}

impl KvPair {
    /// The holding session, treating an empty session string as no holder.
    pub fn holder(&self) -> Option<&str> {
        self.session.as_deref().filter(|s| !s.is_empty())
    }
}

/// Options for a key read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// `0` returns immediately; otherwise the read blocks until the record
    /// changes past this index or the wait horizon elapses.
    pub wait_index: u64,
    /// Upper bound on blocking; `None` uses the agent's default.
    pub wait_time: Option<Duration>,
}

impl QueryOptions {
    pub fn blocking(wait_index: u64) -> Self {
        Self {
            wait_index,
            wait_time: None,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }
}

/// Metadata accompanying a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryMeta {
    /// Cursor to pass as `wait_index` on the next blocking read.
    pub last_index: u64,
}

/// Health state of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
        }
    }
}
