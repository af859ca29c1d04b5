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

//! # Tenure Election
//!
//! ## Purpose
//! Service registration and per-key leader election on top of a Consul-style
//! coordination agent. A [`Service`] registers the process and keeps its TTL
//! check passing; each [`Lock`] created through it elects at most one holder
//! of a named key across the fleet, fenced by the agent's lock delay and the
//! service check's TTL.
//!
//! ## Components
//! - [`Service`]: registration identity, heartbeat supervisor, lock registry
//! - [`Lock`]: per-key session, acquisition and ownership watching
//! - [`shutdown`]: stop requests with bounded acknowledgement
//! - [`LockApi`], [`LocalLock`], [`singleton_lock`]: the narrow interface
//!   worker code consumes, with a process-local fallback
//! - [`ConfigLoader`]: YAML settings with environment substitution
//!
//! ## Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tenure_agent::memory::MemoryCluster;
//! use tenure_election::{Service, ServiceConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = MemoryCluster::new();
//! let service = Service::register(Arc::new(cluster.agent("node-1")), ServiceConfig::new("awslogidx"))?;
//! service.wait_for_registration(Duration::from_secs(10)).await;
//!
//! let lock = service.new_lock("service/awslogidx/cleanup", None, Duration::from_secs(30));
//! if lock.wait().await {
//!     // singleton work while lock.locked()
//! }
//! service.deregister().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod local;
pub mod lock;
pub mod service;
pub mod shutdown;

pub use api::{singleton_lock, LockApi};
pub use config::ServiceConfig;
pub use config_loader::{ConfigLoader, ConfigLoaderError, ElectionSettings, LockSpec};
pub use error::{ServiceError, ServiceResult};
pub use local::LocalLock;
pub use lock::Lock;
pub use service::Service;
pub use shutdown::{stop_channel, StopHandle, StopListener, StopOutcome, StopRequest};
