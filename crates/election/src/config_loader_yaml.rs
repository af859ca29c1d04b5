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

//! YAML representation of the election settings file.
//!
//! Durations are whole seconds (`*_secs`) and converted to `Duration` when
//! the file is turned into settings.

use serde::Deserialize;
use tenure_agent::SessionBehavior;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionYaml {
    #[serde(default)]
    pub agent: AgentYaml,
    pub service: ServiceYaml,
    #[serde(default)]
    pub locks: Vec<LockYaml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentYaml {
    #[serde(default = "default_agent_address")]
    pub address: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,
}

impl Default for AgentYaml {
    fn default() -> Self {
        Self {
            address: default_agent_address(),
            token: None,
            datacenter: None,
            request_timeout_secs: default_request_timeout(),
            wait_time_secs: default_wait_time(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceYaml {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_check_ttl")]
    pub check_ttl_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_lock_delay")]
    pub lock_delay_secs: u64,
    #[serde(default = "default_release_timeout")]
    pub release_timeout_secs: u64,
    #[serde(default = "default_deregister_timeout")]
    pub deregister_timeout_secs: u64,
    /// `release` or `delete`
    #[serde(default)]
    pub session_behavior: SessionBehavior,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockYaml {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    /// Falls back to the service's lock delay
    #[serde(default)]
    pub lock_delay_secs: Option<u64>,
}

fn default_agent_address() -> String {
    tenure_agent::http::DEFAULT_AGENT_ADDRESS.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_wait_time() -> u64 {
    300
}

fn default_check_ttl() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_retry_interval() -> u64 {
    5
}

fn default_lock_delay() -> u64 {
    30
}

fn default_release_timeout() -> u64 {
    1
}

fn default_deregister_timeout() -> u64 {
    5
}
