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

//! Tenure: service registration and leader election over a Consul-style
//! coordination agent.
//!
//! Background workers in a fleet use Tenure to run singleton activity: each
//! process registers a [`Service`] with its local agent and asks it for a
//! [`Lock`] per job. At most one process holds a given lock at a time;
//! ownership moves when the holder releases, crashes or loses its agent,
//! fenced by the agent's lock delay and the service check's TTL.
//!
//! Crates:
//! - [`agent`]: agent client trait, Consul HTTP client and in-memory agent
//! - [`election`]: services, locks, stop protocol and settings loader

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub use tenure_agent as agent;
pub use tenure_election as election;

pub use tenure_agent::{AgentClient, AgentError, HttpAgentClient, HttpAgentConfig};
pub use tenure_election::{
    singleton_lock, ConfigLoader, LocalLock, Lock, LockApi, Service, ServiceConfig, ServiceError,
};
