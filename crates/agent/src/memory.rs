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

//! In-process model of the coordination agent.
//!
//! ## Purpose
//! A [`MemoryCluster`] holds the shared state a real cluster of agents would
//! replicate: services and TTL checks per node, sessions, the KV store and a
//! global modification index. Each [`MemoryAgent`] is one process's view of
//! its local agent and implements [`AgentClient`].
//!
//! ## Design
//! - **Lazy reaping**: TTL checks are expired at the start of every
//!   operation, using `tokio::time::Instant` so paused test clocks drive
//!   expiry. Blocking readers also reap once per second while they wait.
//! - **Session invalidation**: a session whose bound check is critical or
//!   missing is destroyed; its keys are released (or deleted) and enter a
//!   lock-delay window during which no session may acquire them.
//! - **Blocking reads**: readers park on a `watch` channel carrying the
//!   global index and return once the record moves past the requested index
//!   or the wait horizon elapses.
//! - **Fault injection**: an agent handle can be partitioned (every call
//!   fails with [`AgentError::Transport`]) or made to reject the next
//!   acquisitions with [`AgentError::InvalidSession`].
//!
//! ## Limitations
//! - The agent's own node health check (`serfHealth`) is always passing.
//! - No ACLs, datacenters or session TTLs.

use crate::{
    AgentClient, AgentError, AgentResult, CheckStatus, KvPair, QueryMeta, QueryOptions,
    ServiceRegistration, SessionBehavior, SessionRequest, AGENT_HEALTH_CHECK,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use ulid::Ulid;

/// Default cap on how long a blocking read parks.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

const REAP_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct TtlCheck {
    ttl: Duration,
    status: CheckStatus,
    expires_at: Instant,
    output: String,
}

#[derive(Debug, Default)]
struct NodeState {
    services: HashMap<String, ServiceRegistration>,
    checks: HashMap<String, TtlCheck>,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    node: String,
    checks: Vec<String>,
    lock_delay: Duration,
    behavior: SessionBehavior,
}

#[derive(Debug)]
struct ClusterState {
    index: u64,
    nodes: HashMap<String, NodeState>,
    sessions: HashMap<String, SessionEntry>,
    kv: BTreeMap<String, KvPair>,
    lock_delays: HashMap<String, Instant>,
}

impl ClusterState {
    fn new() -> Self {
        Self {
            index: 1,
            nodes: HashMap::new(),
            sessions: HashMap::new(),
            kv: BTreeMap::new(),
            lock_delays: HashMap::new(),
        }
    }

    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn check(&self, node: &str, check_id: &str) -> Option<&TtlCheck> {
        self.nodes.get(node).and_then(|n| n.checks.get(check_id))
    }

    fn session_healthy(&self, session: &SessionEntry) -> bool {
        session.checks.iter().all(|check_id| {
            check_id == AGENT_HEALTH_CHECK
                || matches!(
                    self.check(&session.node, check_id),
                    Some(check) if check.status != CheckStatus::Critical
                )
        })
    }

    fn expire_checks(&mut self, now: Instant) {
        for (node, state) in self.nodes.iter_mut() {
            for (check_id, check) in state.checks.iter_mut() {
                if check.status != CheckStatus::Critical && check.expires_at <= now {
                    debug!(node = %node, check_id = %check_id, "TTL check expired");
                    check.status = CheckStatus::Critical;
                    check.output = "TTL expired".to_string();
                }
            }
        }
        self.invalidate_unhealthy_sessions(now);
    }

    fn invalidate_unhealthy_sessions(&mut self, now: Instant) {
        let doomed: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| !self.session_healthy(session))
            .map(|(id, _)| id.clone())
            .collect();
        for id in doomed {
            debug!(session = %id, "session invalidated by unhealthy check");
            self.invalidate_session(&id, now);
        }
    }

    /// Remove a session, releasing its keys into their lock-delay window.
    fn invalidate_session(&mut self, id: &str, now: Instant) -> bool {
        let Some(session) = self.sessions.remove(id) else {
            return false;
        };
        let held: Vec<String> = self
            .kv
            .iter()
            .filter(|(_, pair)| pair.holder() == Some(id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in held {
            let index = self.bump();
            if !session.lock_delay.is_zero() {
                self.lock_delays.insert(key.clone(), now + session.lock_delay);
            }
            match session.behavior {
                SessionBehavior::Release => {
                    if let Some(pair) = self.kv.get_mut(&key) {
                        pair.session = None;
                        pair.modify_index = index;
                    }
                }
                SessionBehavior::Delete => {
                    self.kv.remove(&key);
                }
            }
        }
        true
    }

    /// The key's record and the index a reader should report for it.
    fn read(&self, key: &str) -> (Option<KvPair>, u64) {
        match self.kv.get(key) {
            Some(pair) => (Some(pair.clone()), pair.modify_index),
            None => (None, self.index),
        }
    }
}

struct ClusterInner {
    state: Mutex<ClusterState>,
    index_tx: watch::Sender<u64>,
    max_wait: Duration,
}

impl ClusterInner {
    /// Run `f` against the reaped state, publishing the index if it moved.
    fn with_state<R>(&self, f: impl FnOnce(&mut ClusterState, Instant) -> R) -> R {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.index;
        state.expire_checks(now);
        let result = f(&mut state, now);
        if state.index != before {
            self.index_tx.send_replace(state.index);
        }
        result
    }
}

/// Shared state of an in-memory coordination cluster.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_max_wait(DEFAULT_MAX_WAIT)
    }

    /// Cluster whose blocking reads park for at most `max_wait`.
    pub fn with_max_wait(max_wait: Duration) -> Self {
        let state = ClusterState::new();
        let (index_tx, _) = watch::channel(state.index);
        Self {
            inner: Arc::new(ClusterInner {
                state: Mutex::new(state),
                index_tx,
                max_wait,
            }),
        }
    }

    /// Handle to the local agent of `node`.
    pub fn agent(&self, node: impl Into<String>) -> MemoryAgent {
        MemoryAgent {
            cluster: self.clone(),
            node: node.into(),
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    /// Current record for `key`.
    pub fn key(&self, key: &str) -> Option<KvPair> {
        self.inner.with_state(|state, _| state.kv.get(key).cloned())
    }

    /// Session currently holding `key`.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.key(key)
            .and_then(|pair| pair.holder().map(str::to_string))
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.inner
            .with_state(|state, _| state.sessions.contains_key(session_id))
    }

    /// Ids of all live sessions.
    pub fn sessions(&self) -> Vec<String> {
        self.inner
            .with_state(|state, _| state.sessions.keys().cloned().collect())
    }

    pub fn service_registered(&self, node: &str, service_id: &str) -> bool {
        self.inner.with_state(|state, _| {
            state
                .nodes
                .get(node)
                .is_some_and(|n| n.services.contains_key(service_id))
        })
    }

    pub fn check_status(&self, node: &str, check_id: &str) -> Option<CheckStatus> {
        self.inner
            .with_state(|state, _| state.check(node, check_id).map(|c| c.status))
    }

    /// Output of the last check update (the note passed with it, or the
    /// expiry reason).
    pub fn check_output(&self, node: &str, check_id: &str) -> Option<String> {
        self.inner
            .with_state(|state, _| state.check(node, check_id).map(|c| c.output.clone()))
    }

    /// Global modification index.
    pub fn index(&self) -> u64 {
        self.inner.with_state(|state, _| state.index)
    }
}

#[derive(Debug, Default)]
struct Faults {
    partitioned: bool,
    partitioned_until: Option<Instant>,
    failing_acquires: u32,
}

/// One process's local agent within a [`MemoryCluster`].
#[derive(Clone)]
pub struct MemoryAgent {
    cluster: MemoryCluster,
    node: String,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryAgent {
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    /// Fail every call with a transport error for `duration`.
    pub fn partition_for(&self, duration: Duration) {
        self.faults().partitioned_until = Some(Instant::now() + duration);
    }

    /// Fail every call with a transport error until [`heal`](Self::heal).
    pub fn partition(&self) {
        self.faults().partitioned = true;
    }

    pub fn heal(&self) {
        let mut faults = self.faults();
        faults.partitioned = false;
        faults.partitioned_until = None;
    }

    /// Invalidate the session of each of the next `count` acquisitions and
    /// reject them with `InvalidSession`.
    pub fn fail_next_acquires(&self, count: u32) {
        self.faults().failing_acquires = count;
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self) -> AgentResult<()> {
        let faults = self.faults();
        let timed = faults
            .partitioned_until
            .is_some_and(|until| Instant::now() < until);
        if faults.partitioned || timed {
            return Err(AgentError::Transport(format!(
                "agent on {} unreachable: connection refused",
                self.node
            )));
        }
        Ok(())
    }

    fn state<R>(&self, f: impl FnOnce(&mut ClusterState, Instant) -> R) -> R {
        self.cluster.inner.with_state(f)
    }
}

#[async_trait]
impl AgentClient for MemoryAgent {
    async fn register_service(&self, registration: &ServiceRegistration) -> AgentResult<()> {
        self.guard()?;
        self.state(|state, now| {
            let node = state.nodes.entry(self.node.clone()).or_default();
            if node.services.contains_key(&registration.id) {
                return Err(AgentError::Conflict(format!(
                    "service {} already registered",
                    registration.id
                )));
            }
            node.services
                .insert(registration.id.clone(), registration.clone());
            node.checks.insert(
                registration.check_id(),
                TtlCheck {
                    ttl: registration.check_ttl,
                    status: CheckStatus::Passing,
                    expires_at: now + registration.check_ttl,
                    output: String::new(),
                },
            );
            Ok(())
        })
    }

    async fn deregister_service(&self, service_id: &str) -> AgentResult<()> {
        self.guard()?;
        self.state(|state, now| {
            if let Some(node) = state.nodes.get_mut(&self.node) {
                if let Some(registration) = node.services.remove(service_id) {
                    node.checks.remove(&registration.check_id());
                }
            }
            state.invalidate_unhealthy_sessions(now);
        });
        Ok(())
    }

    async fn pass_check(&self, check_id: &str, note: &str) -> AgentResult<()> {
        self.guard()?;
        self.state(|state, now| {
            let check = state
                .nodes
                .get_mut(&self.node)
                .and_then(|n| n.checks.get_mut(check_id))
                .ok_or_else(|| AgentError::NoSuchCheck(format!("Unknown check ID {check_id:?}")))?;
            check.status = CheckStatus::Passing;
            check.expires_at = now + check.ttl;
            check.output = note.to_string();
            Ok(())
        })
    }

    async fn create_session(&self, request: &SessionRequest) -> AgentResult<String> {
        self.guard()?;
        self.state(|state, _| {
            for check_id in &request.checks {
                if check_id == AGENT_HEALTH_CHECK {
                    continue;
                }
                match state.check(&self.node, check_id) {
                    None => {
                        return Err(AgentError::Api {
                            status: 500,
                            message: format!("Missing check '{check_id}' registration"),
                        })
                    }
                    Some(check) if check.status == CheckStatus::Critical => {
                        return Err(AgentError::Api {
                            status: 500,
                            message: format!("Check '{check_id}' is in critical state"),
                        })
                    }
                    Some(_) => {}
                }
            }
            let id = Ulid::new().to_string();
            state.sessions.insert(
                id.clone(),
                SessionEntry {
                    node: self.node.clone(),
                    checks: request.checks.clone(),
                    lock_delay: request.lock_delay,
                    behavior: request.behavior,
                },
            );
            Ok(id)
        })
    }

    async fn destroy_session(&self, session_id: &str) -> AgentResult<()> {
        self.guard()?;
        self.state(|state, now| {
            state.invalidate_session(session_id, now);
        });
        Ok(())
    }

    async fn acquire_key(&self, key: &str, value: &[u8], session_id: &str) -> AgentResult<bool> {
        self.guard()?;
        let injected = {
            let mut faults = self.faults();
            let fail = faults.failing_acquires > 0;
            if fail {
                faults.failing_acquires -= 1;
            }
            fail
        };
        if injected {
            self.state(|state, now| {
                state.invalidate_session(session_id, now);
            });
            return Err(AgentError::InvalidSession(format!(
                "invalid session {session_id:?}"
            )));
        }
        self.state(|state, now| {
            if !state.sessions.contains_key(session_id) {
                return Err(AgentError::InvalidSession(format!(
                    "invalid session {session_id:?}"
                )));
            }
            if state
                .lock_delays
                .get(key)
                .is_some_and(|until| now < *until)
            {
                return Ok(false);
            }
            let holder = state
                .kv
                .get(key)
                .and_then(|pair| pair.holder().map(str::to_string));
            if holder.as_deref().is_some_and(|h| h != session_id) {
                return Ok(false);
            }
            let index = state.bump();
            let pair = state.kv.entry(key.to_string()).or_insert_with(|| KvPair {
                key: key.to_string(),
                create_index: index,
                ..Default::default()
            });
            if holder.is_none() {
                pair.lock_index += 1;
                pair.session = Some(session_id.to_string());
            }
            pair.value = value.to_vec();
            pair.modify_index = index;
            Ok(true)
        })
    }

    async fn release_key(&self, key: &str, session_id: &str) -> AgentResult<bool> {
        self.guard()?;
        self.state(|state, _| {
            if !state.sessions.contains_key(session_id) {
                return Err(AgentError::InvalidSession(format!(
                    "invalid session {session_id:?}"
                )));
            }
            let held = state
                .kv
                .get(key)
                .is_some_and(|pair| pair.holder() == Some(session_id));
            if !held {
                return Ok(false);
            }
            let index = state.bump();
            if let Some(pair) = state.kv.get_mut(key) {
                pair.session = None;
                pair.modify_index = index;
            }
            Ok(true)
        })
    }

    async fn get_key(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> AgentResult<(Option<KvPair>, QueryMeta)> {
        self.guard()?;
        let mut changes = self.cluster.inner.index_tx.subscribe();
        let (pair, index) = self.state(|state, _| state.read(key));
        if options.wait_index == 0 || index > options.wait_index {
            return Ok((pair, QueryMeta { last_index: index }));
        }

        let max_wait = self.cluster.inner.max_wait;
        let wait = options.wait_time.map_or(max_wait, |w| w.min(max_wait));
        let deadline = Instant::now() + wait;
        loop {
            let tick = deadline.min(Instant::now() + REAP_TICK);
            // Timeouts are expected; they trigger a reap on the next read.
            let _ = tokio::time::timeout_at(tick, changes.changed()).await;
            self.guard()?;
            let (pair, index) = self.state(|state, _| state.read(key));
            if index > options.wait_index || Instant::now() >= deadline {
                return Ok((pair, QueryMeta { last_index: index }));
            }
        }
    }

    async fn agent_self(&self) -> AgentResult<String> {
        self.guard()?;
        Ok(self.node.clone())
    }
}
