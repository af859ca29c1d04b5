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

//! Agent client trait consumed by the election primitives.

use crate::{AgentResult, KvPair, QueryMeta, QueryOptions, ServiceRegistration, SessionRequest};
use async_trait::async_trait;

/// Operations the election primitives need from the coordination agent.
///
/// ## Design
/// - **Request/response**: every call is a single round trip; no call retries
///   internally. Retry policy belongs to the caller's loop.
/// - **Verbatim errors**: failures are classified into [`AgentError`] kinds
///   but never swallowed.
/// - **Shared**: one client is shared by a service loop and all of its lock
///   loops, so implementations must be safe for concurrent use.
///
/// [`AgentError`]: crate::AgentError
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Register a service and its implicit TTL check `"service:" + id`.
    ///
    /// ## Returns
    /// - `Err(AgentError::Conflict)`: a registration with this id exists
    /// - `Err(AgentError::Transport)`: agent unreachable
    async fn register_service(&self, registration: &ServiceRegistration) -> AgentResult<()>;

    /// Remove a service and its check. Succeeds when the service is absent.
    async fn deregister_service(&self, service_id: &str) -> AgentResult<()>;

    /// Mark a TTL check passing until now + TTL.
    ///
    /// ## Returns
    /// - `Err(AgentError::NoSuchCheck)`: the check is gone; re-register
    async fn pass_check(&self, check_id: &str, note: &str) -> AgentResult<()>;

    /// Create a session bound to the given checks. Returns the session id.
    async fn create_session(&self, request: &SessionRequest) -> AgentResult<String>;

    /// Destroy a session, releasing its keys. Succeeds when the session is absent.
    async fn destroy_session(&self, session_id: &str) -> AgentResult<()>;

    /// Compare-and-set the key's holder to `session_id`.
    ///
    /// ## Returns
    /// - `Ok(true)`: the session now holds the key (or already did)
    /// - `Ok(false)`: another session holds it, or its lock-delay is active
    /// - `Err(AgentError::InvalidSession)`: the session is unknown
    async fn acquire_key(&self, key: &str, value: &[u8], session_id: &str) -> AgentResult<bool>;

    /// Clear the key's holder if it is `session_id`. The session stays alive.
    async fn release_key(&self, key: &str, session_id: &str) -> AgentResult<bool>;

    /// Read a key, blocking when `options.wait_index` is non-zero.
    async fn get_key(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> AgentResult<(Option<KvPair>, QueryMeta)>;

    /// Node name of the agent. Doubles as a connectivity probe.
    async fn agent_self(&self) -> AgentResult<String>;
}
