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

//! Lifecycle, idempotence and safety properties of services and locks.
//!
//! ## Test Coverage
//! - `deregister` and `release` are idempotent and bounded
//! - Duplicate `new_lock` on one key: first recorded, second untracked
//! - Locks created after deregistration are inert
//! - `wait` returns false once a lock is released
//! - Dropping every service handle shuts the service down
//! - Heartbeat liveness and no self-preemption across many read horizons
//! - Single holder and lock delay across repeated handovers
//! - Configuration errors and the process-local lock fallback
//! - Deregister empties the lock map even when the service loop is stuck
//! - Delete session behavior removes the key on release

mod common;

use common::{holder_index, start_process, wait_until, KEY, LOCK_DELAY};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tenure_agent::memory::{MemoryAgent, MemoryCluster};
use tenure_agent::{
    AgentClient, AgentResult, CheckStatus, KvPair, QueryMeta, QueryOptions, ServiceRegistration,
    SessionBehavior, SessionRequest,
};
use tenure_election::{singleton_lock, Service, ServiceConfig, ServiceError};
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn test_deregister_twice_is_deregister_once() {
    let cluster = MemoryCluster::new();
    let process = start_process(&cluster, "node-a", "worker").await;
    let lock = process.new_lock();
    assert!(lock.wait().await);

    process.service.deregister().await;
    let started = Instant::now();
    process.service.deregister().await;
    assert_eq!(started.elapsed(), Duration::ZERO);

    assert!(!process.service.is_registered());
    assert!(!cluster.service_registered("node-a", "worker"));
    assert_eq!(process.service.lock_count(), 0);
    assert!(lock.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_release_twice_is_release_once() {
    let cluster = MemoryCluster::new();
    let process = start_process(&cluster, "node-a", "worker").await;
    let lock = process.new_lock();
    assert!(lock.wait().await);
    assert_eq!(process.service.lock_keys(), vec![KEY.to_string()]);
    let session = lock.session().unwrap();

    let started = Instant::now();
    lock.release().await;
    assert!(started.elapsed() <= Duration::from_secs(1));
    lock.release().await;

    assert!(!lock.locked());
    assert!(lock.is_stopped());
    assert_eq!(lock.session(), None);
    assert!(!cluster.session_exists(&session));
    assert_eq!(process.service.lock_count(), 0);
    assert!(process.service.is_registered());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_lock_first_is_recorded() {
    let cluster = MemoryCluster::new();
    let process = start_process(&cluster, "node-a", "worker").await;
    let first = process.new_lock();
    assert!(first.wait().await);
    let second = process.new_lock();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(process.service.lock_count(), 1);
    let recorded = process.service.lock(KEY).unwrap();
    assert_eq!(recorded.session(), first.session());
    assert_ne!(second.session(), first.session());
    assert!(first.locked());
    assert!(!second.locked());

    process.service.deregister().await;
    assert!(first.is_stopped());
    assert!(!second.is_stopped());

    second.release().await;
    assert!(second.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_lock_after_deregister_is_inert() {
    let cluster = MemoryCluster::new();
    let process = start_process(&cluster, "node-a", "worker").await;
    process.service.deregister().await;

    let lock = process.new_lock();
    assert!(lock.is_stopped());
    assert!(!lock.wait().await);
    assert_eq!(process.service.lock_count(), 0);
    assert!(cluster.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_false_after_release() {
    let cluster = MemoryCluster::new();
    let a = start_process(&cluster, "node-a", "worker").await;
    let b = start_process(&cluster, "node-b", "worker").await;
    let held = a.new_lock();
    assert!(held.wait().await);

    let contender = b.new_lock();
    let waiter = {
        let contender = contender.clone();
        tokio::spawn(async move { contender.wait().await })
    };
    sleep(Duration::from_secs(5)).await;
    assert!(!waiter.is_finished());

    contender.release().await;
    assert!(!waiter.await.unwrap());
    assert!(held.locked());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_service_deregisters() {
    let cluster = MemoryCluster::new();
    let process = start_process(&cluster, "node-a", "worker").await;
    let lock = process.new_lock();
    assert!(lock.wait().await);

    drop(process.service);
    sleep(Duration::from_secs(1)).await;
    assert!(!cluster.service_registered("node-a", "worker"));
    assert!(lock.is_stopped());
    assert!(!lock.locked());
    assert_eq!(cluster.holder(KEY), None);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_keeps_check_and_lock_alive() {
    let cluster = MemoryCluster::with_max_wait(Duration::from_secs(60));
    let process = start_process(&cluster, "node-a", "worker").await;
    let lock = process.new_lock();
    assert!(lock.wait().await);
    let session = lock.session().unwrap();

    // Twenty minutes span many blocking-read horizons and check TTLs.
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(1200) {
        assert_eq!(
            cluster.check_status("node-a", "service:worker"),
            Some(CheckStatus::Passing)
        );
        assert!(lock.locked(), "holder dropped its own lock");
        sleep(Duration::from_secs(7)).await;
    }
    assert_eq!(lock.session(), Some(session.clone()));
    assert_eq!(cluster.holder(KEY), Some(session));
}

#[tokio::test(start_paused = true)]
async fn test_single_holder_and_lock_delay_across_handovers() {
    let cluster = MemoryCluster::new();
    let processes = vec![
        start_process(&cluster, "node-a", "worker").await,
        start_process(&cluster, "node-b", "worker").await,
        start_process(&cluster, "node-c", "worker").await,
    ];
    let mut locks: Vec<_> = processes.iter().map(|p| p.new_lock()).collect();
    sleep(Duration::from_secs(2)).await;

    for _ in 0..4 {
        let holder = holder_index(&locks).expect("someone should hold the key");
        locks[holder].release().await;
        let lost_at = Instant::now();
        locks[holder] = processes[holder].new_lock();

        // Sample until a new holder appears, checking there is never more
        // than one and that nobody holds inside the lock delay.
        let mut next = None;
        while lost_at.elapsed() < Duration::from_secs(120) {
            if let Some(index) = holder_index(&locks) {
                next = Some(index);
                break;
            }
            sleep(Duration::from_millis(250)).await;
        }
        assert!(next.is_some(), "no new holder after handover");
        assert!(lost_at.elapsed() >= LOCK_DELAY);
    }
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let cluster = MemoryCluster::new();
    let result = Service::register(Arc::new(cluster.agent("node-a")), ServiceConfig::new(""));
    assert!(matches!(result, Err(ServiceError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn test_singleton_lock_with_and_without_service() {
    let local = singleton_lock(None, "service/restapi/cleanup");
    assert!(local.locked());
    assert!(local.wait().await);
    local.release().await;
    assert!(!local.locked());

    let cluster = MemoryCluster::new();
    let process = start_process(&cluster, "node-a", "restapi").await;
    let distributed = singleton_lock(Some(&process.service), "service/restapi/cleanup");
    assert!(distributed.wait().await);
    assert_eq!(process.service.lock_keys(), vec!["service/restapi/cleanup".to_string()]);
    distributed.release().await;
    assert!(!distributed.locked());
    assert_eq!(process.service.lock_count(), 0);

    let elapsed = wait_until(Duration::from_secs(1), || cluster.holder("service/restapi/cleanup").is_none()).await;
    assert!(elapsed.is_some());
}

/// Agent whose check refreshes after the first take `delay` to answer.
struct SlowHeartbeatAgent {
    inner: MemoryAgent,
    delay: Duration,
    refreshes: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl AgentClient for SlowHeartbeatAgent {
    async fn register_service(&self, registration: &ServiceRegistration) -> AgentResult<()> {
        self.inner.register_service(registration).await
    }

    async fn deregister_service(&self, service_id: &str) -> AgentResult<()> {
        self.inner.deregister_service(service_id).await
    }

    async fn pass_check(&self, check_id: &str, note: &str) -> AgentResult<()> {
        if self.refreshes.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
            sleep(self.delay).await;
        }
        self.inner.pass_check(check_id, note).await
    }

    async fn create_session(&self, request: &SessionRequest) -> AgentResult<String> {
        self.inner.create_session(request).await
    }

    async fn destroy_session(&self, session_id: &str) -> AgentResult<()> {
        self.inner.destroy_session(session_id).await
    }

    async fn acquire_key(&self, key: &str, value: &[u8], session_id: &str) -> AgentResult<bool> {
        self.inner.acquire_key(key, value, session_id).await
    }

    async fn release_key(&self, key: &str, session_id: &str) -> AgentResult<bool> {
        self.inner.release_key(key, session_id).await
    }

    async fn get_key(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> AgentResult<(Option<KvPair>, QueryMeta)> {
        self.inner.get_key(key, options).await
    }

    async fn agent_self(&self) -> AgentResult<String> {
        self.inner.agent_self().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_deregister_stops_locks_when_service_loop_is_stuck() {
    let cluster = MemoryCluster::new();
    let agent = Arc::new(SlowHeartbeatAgent {
        inner: cluster.agent("node-a"),
        delay: Duration::from_secs(60),
        refreshes: std::sync::atomic::AtomicUsize::new(0),
    });
    let service = Service::register(agent, ServiceConfig::new("worker")).unwrap();
    assert!(service.wait_for_registration(Duration::from_secs(10)).await);
    let lock = service.new_lock(KEY, None, LOCK_DELAY);
    assert!(lock.wait().await);
    let session = lock.session().unwrap();

    // The first heartbeat is now hanging inside the agent call.
    sleep(Duration::from_secs(6)).await;
    let started = Instant::now();
    service.deregister().await;
    assert!(started.elapsed() <= Duration::from_secs(7));

    assert_eq!(service.lock_count(), 0);
    assert!(lock.is_stopped());
    assert!(!lock.locked());
    assert!(!cluster.session_exists(&session));
    assert_eq!(cluster.holder(KEY), None);

    // Once the stuck call returns the service loop finishes deregistering.
    let done = wait_until(Duration::from_secs(90), || {
        !cluster.service_registered("node-a", "worker")
    })
    .await;
    assert!(done.is_some());
    assert!(!service.is_registered());
}

#[tokio::test(start_paused = true)]
async fn test_delete_behavior_removes_key_on_release() {
    common::init_tracing();
    let cluster = MemoryCluster::new();
    let config = ServiceConfig::new("worker").with_session_behavior(SessionBehavior::Delete);
    let service = Service::register(Arc::new(cluster.agent("node-a")), config).unwrap();
    assert!(service.wait_for_registration(Duration::from_secs(10)).await);

    let lock = service.new_lock_with_defaults(KEY);
    assert!(lock.wait().await);
    assert!(cluster.key(KEY).is_some());

    lock.release().await;
    assert_eq!(cluster.key(KEY), None);
    service.deregister().await;
}
