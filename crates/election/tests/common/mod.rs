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

//! Shared fixtures for election integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tenure_agent::memory::{MemoryAgent, MemoryCluster};
use tenure_election::{Lock, Service, ServiceConfig};
use tokio::time::{sleep, Instant};

pub const KEY: &str = "svc/x/leader";
pub const LOCK_DELAY: Duration = Duration::from_secs(30);

/// One simulated process: its local agent and its registered service.
pub struct Process {
    pub agent: MemoryAgent,
    pub service: Service,
}

impl Process {
    pub fn new_lock(&self) -> Lock {
        self.service.new_lock(KEY, None, LOCK_DELAY)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Register service `name` on `node` and wait for it to take effect.
pub async fn start_process(cluster: &MemoryCluster, node: &str, name: &str) -> Process {
    init_tracing();
    let agent = cluster.agent(node);
    let service = Service::register(Arc::new(agent.clone()), ServiceConfig::new(name)).unwrap();
    assert!(service.wait_for_registration(Duration::from_secs(10)).await);
    Process { agent, service }
}

/// Poll every 100ms until `condition` holds; returns the time it took.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> Option<Duration> {
    let started = Instant::now();
    while started.elapsed() <= limit {
        if condition() {
            return Some(started.elapsed());
        }
        sleep(Duration::from_millis(100)).await;
    }
    None
}

/// Index of the single lock currently held; panics if more than one is.
pub fn holder_index(locks: &[Lock]) -> Option<usize> {
    let held: Vec<usize> = locks
        .iter()
        .enumerate()
        .filter(|(_, lock)| lock.locked())
        .map(|(i, _)| i)
        .collect();
    assert!(held.len() <= 1, "more than one holder: {held:?}");
    held.first().copied()
}
