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

//! Consul HTTP API client.
//!
//! ## Purpose
//! Maps [`AgentClient`] onto the agent's HTTP endpoints:
//!
//! | Operation            | Request                                      |
//! |----------------------|----------------------------------------------|
//! | `register_service`   | `PUT /v1/agent/service/register`             |
//! | `deregister_service` | `PUT /v1/agent/service/deregister/{id}`      |
//! | `pass_check`         | `PUT /v1/agent/check/pass/{check}?note=`     |
//! | `create_session`     | `PUT /v1/session/create`                     |
//! | `destroy_session`    | `PUT /v1/session/destroy/{id}`               |
//! | `acquire_key`        | `PUT /v1/kv/{key}?acquire={session}`         |
//! | `release_key`        | `PUT /v1/kv/{key}?release={session}`         |
//! | `get_key`            | `GET /v1/kv/{key}?index=&wait=`              |
//! | `agent_self`         | `GET /v1/agent/self`                         |
//!
//! ## Design
//! - Blocking reads carry the cursor in `X-Consul-Index`; the request
//!   timeout is stretched by the wait horizon plus the agent's jitter
//!   (`wait / 16`) so that a healthy long poll never trips it.
//! - Key paths are split on `/` and pushed as URL segments so each segment
//!   is percent-encoded independently.

use crate::{
    AgentClient, AgentError, AgentResult, KvPair, QueryMeta, QueryOptions, ServiceRegistration,
    SessionRequest,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default agent address when none is configured.
pub const DEFAULT_AGENT_ADDRESS: &str = "http://127.0.0.1:8500";

const TOKEN_HEADER: &str = "X-Consul-Token";
const INDEX_HEADER: &str = "X-Consul-Index";

/// Connection settings for [`HttpAgentClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAgentConfig {
    /// Base address of the local agent, e.g. `http://127.0.0.1:8500`.
    pub address: String,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
    /// Datacenter for session and KV calls; `None` uses the agent's own.
    pub datacenter: Option<String>,
    /// Timeout for non-blocking requests.
    pub request_timeout: Duration,
    /// Wait horizon requested for blocking reads.
    pub wait_time: Duration,
}

impl Default for HttpAgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_AGENT_ADDRESS.to_string(),
            token: None,
            datacenter: None,
            request_timeout: Duration::from_secs(10),
            wait_time: Duration::from_secs(300),
        }
    }
}

impl HttpAgentConfig {
    /// Config for the given address. A bare `host:port` gets an `http://` scheme.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: normalize_address(address.into()),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }
}

fn normalize_address(address: String) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Format a duration the way the agent parses it (`"60s"`, `"1500ms"`).
pub(crate) fn agent_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterBody {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    check: RegisterCheck,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(rename = "TTL")]
    ttl: String,
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    lock_delay: String,
    checks: &'a [String],
    behavior: &'static str,
}

#[derive(Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    flags: u64,
    #[serde(default)]
    create_index: u64,
    #[serde(default)]
    modify_index: u64,
    #[serde(default)]
    lock_index: u64,
}

impl KvEntry {
    fn into_pair(self) -> AgentResult<KvPair> {
        let value = match self.value {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| AgentError::Serialization(format!("value of {}: {}", self.key, e)))?,
            None => Vec::new(),
        };
        Ok(KvPair {
            key: self.key,
            value,
            session: self.session,
            flags: self.flags,
            create_index: self.create_index,
            modify_index: self.modify_index,
            lock_index: self.lock_index,
        })
    }
}

/// [`AgentClient`] over the agent's HTTP API.
#[derive(Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    base: Url,
    config: HttpAgentConfig,
}

impl HttpAgentClient {
    /// Build a client. Fails if the address does not parse as a URL.
    pub fn new(config: HttpAgentConfig) -> AgentResult<Self> {
        let address = normalize_address(config.address.clone());
        let base = Url::parse(&address)
            .map_err(|e| AgentError::Config(format!("invalid agent address {address}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(AgentError::Config(format!(
                "agent address {address} cannot carry a path"
            )));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self { http, base, config })
    }

    pub fn config(&self) -> &HttpAgentConfig {
        &self.config
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> AgentResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| AgentError::Config(format!("agent address {} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn kv_endpoint(&self, key: &str) -> AgentResult<Url> {
        self.endpoint(["v1", "kv"].into_iter().chain(key.split('/')))
    }

    fn request(&self, method: Method, url: Url, timeout: Duration) -> RequestBuilder {
        let builder = self.http.request(method, url).timeout(timeout);
        match &self.config.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    /// Request against a datacenter-scoped endpoint (sessions, KV).
    fn scoped_request(&self, method: Method, url: Url, timeout: Duration) -> RequestBuilder {
        let builder = self.request(method, url, timeout);
        match &self.config.datacenter {
            Some(dc) => builder.query(&[("dc", dc.as_str())]),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> AgentResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::from_response(status.as_u16(), &body))
    }

    async fn send_bool(&self, builder: RequestBuilder) -> AgentResult<bool> {
        let body = self.send(builder).await?.text().await?;
        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(AgentError::Serialization(format!(
                "expected true/false from agent, got {other:?}"
            ))),
        }
    }
}

fn index_of(response: &Response) -> u64 {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn register_service(&self, registration: &ServiceRegistration) -> AgentResult<()> {
        let body = RegisterBody {
            id: registration.id.clone(),
            name: registration.name.clone(),
            tags: registration.tags.clone(),
            port: registration.port,
            check: RegisterCheck {
                check_id: registration.check_id(),
                ttl: agent_duration(registration.check_ttl),
                status: "passing",
            },
        };
        let url = self.endpoint(["v1", "agent", "service", "register"])?;
        self.send(
            self.request(Method::PUT, url, self.config.request_timeout)
                .json(&body),
        )
        .await?;
        debug!(service_id = %registration.id, "service registered with agent");
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> AgentResult<()> {
        let url = self.endpoint(["v1", "agent", "service", "deregister", service_id])?;
        match self
            .send(self.request(Method::PUT, url, self.config.request_timeout))
            .await
        {
            Ok(_) | Err(AgentError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn pass_check(&self, check_id: &str, note: &str) -> AgentResult<()> {
        let url = self.endpoint(["v1", "agent", "check", "pass", check_id])?;
        let builder = self
            .request(Method::PUT, url, self.config.request_timeout)
            .query(&[("note", note)]);
        match self.send(builder).await {
            Ok(_) => Ok(()),
            Err(AgentError::Api { status: 404, message }) => Err(AgentError::NoSuchCheck(message)),
            Err(e) => Err(e),
        }
    }

    async fn create_session(&self, request: &SessionRequest) -> AgentResult<String> {
        let body = SessionBody {
            name: request.name.as_deref(),
            lock_delay: agent_duration(request.lock_delay),
            checks: &request.checks,
            behavior: request.behavior.as_str(),
        };
        let url = self.endpoint(["v1", "session", "create"])?;
        let created: SessionCreated = self
            .send(
                self.scoped_request(Method::PUT, url, self.config.request_timeout)
                    .json(&body),
            )
            .await?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn destroy_session(&self, session_id: &str) -> AgentResult<()> {
        let url = self.endpoint(["v1", "session", "destroy", session_id])?;
        self.send(self.scoped_request(Method::PUT, url, self.config.request_timeout))
            .await?;
        Ok(())
    }

    async fn acquire_key(&self, key: &str, value: &[u8], session_id: &str) -> AgentResult<bool> {
        let url = self.kv_endpoint(key)?;
        let builder = self
            .scoped_request(Method::PUT, url, self.config.request_timeout)
            .query(&[("acquire", session_id)])
            .body(value.to_vec());
        self.send_bool(builder).await
    }

    async fn release_key(&self, key: &str, session_id: &str) -> AgentResult<bool> {
        let url = self.kv_endpoint(key)?;
        let builder = self
            .scoped_request(Method::PUT, url, self.config.request_timeout)
            .query(&[("release", session_id)]);
        self.send_bool(builder).await
    }

    async fn get_key(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> AgentResult<(Option<KvPair>, QueryMeta)> {
        let url = self.kv_endpoint(key)?;
        let builder = if options.wait_index > 0 {
            let wait = options.wait_time.unwrap_or(self.config.wait_time);
            let timeout = self.config.request_timeout + wait + wait / 16;
            self.scoped_request(Method::GET, url, timeout).query(&[
                ("index", options.wait_index.to_string()),
                ("wait", agent_duration(wait)),
            ])
        } else {
            self.scoped_request(Method::GET, url, self.config.request_timeout)
        };

        let response = builder.send().await?;
        let meta = QueryMeta {
            last_index: index_of(&response),
        };
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok((None, meta));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::from_response(status.as_u16(), &body));
        }

        let entries: Vec<KvEntry> = response.json().await?;
        let pair = entries
            .into_iter()
            .find(|entry| entry.key == key)
            .map(KvEntry::into_pair)
            .transpose()?;
        Ok((pair, meta))
    }

    async fn agent_self(&self) -> AgentResult<String> {
        let url = self.endpoint(["v1", "agent", "self"])?;
        let info: serde_json::Value = self
            .send(self.request(Method::GET, url, self.config.request_timeout))
            .await?
            .json()
            .await?;
        info.pointer("/Config/NodeName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AgentError::Serialization("agent self missing Config.NodeName".to_string()))
    }
}
