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

//! # Tenure Agent Client
//!
//! ## Purpose
//! Thin client for the local coordination agent (a Consul-style process) that
//! the election primitives in `tenure-election` are built on. It serializes
//! service registration, TTL check refreshes, session lifecycle and the
//! key-value compare-and-set-by-session operations onto the agent's API and
//! surfaces every failure verbatim as an [`AgentError`].
//!
//! ## Backend Support
//!
//! - **HTTP**: Consul HTTP API over `reqwest` (feature: `http-backend`)
//! - **InMemory**: process-local model of the agent with TTL expiry, sessions,
//!   lock-delay and blocking reads (feature: `memory-backend`). Used by tests
//!   and local development; supports fault injection.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use tenure_agent::{AgentClient, QueryOptions, SessionRequest};
//! use tenure_agent::memory::MemoryCluster;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = MemoryCluster::new();
//! let agent = cluster.agent("node-1");
//!
//! let session = agent
//!     .create_session(&SessionRequest::new(Duration::from_secs(30)))
//!     .await?;
//! let acquired = agent.acquire_key("service/worker/leader", b"node-1", &session).await?;
//! assert!(acquired);
//!
//! let (pair, meta) = agent.get_key("service/worker/leader", &QueryOptions::default()).await?;
//! assert_eq!(pair.and_then(|p| p.session), Some(session));
//! assert!(meta.last_index > 0);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod types;

#[cfg(feature = "http-backend")]
pub mod http;

#[cfg(feature = "memory-backend")]
pub mod memory;

pub use client::AgentClient;
pub use error::{AgentError, AgentResult};
pub use types::{
    service_check_id, CheckStatus, KvPair, QueryMeta, QueryOptions, ServiceRegistration,
    SessionBehavior, SessionRequest, AGENT_HEALTH_CHECK,
};

#[cfg(feature = "http-backend")]
pub use http::{HttpAgentClient, HttpAgentConfig};
