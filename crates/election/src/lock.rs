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

//! Per-key leader election.
//!
//! ## Purpose
//! A [`Lock`] cooperatively elects at most one process as holder of a named
//! key. Each lock runs its own background loop with its own agent session,
//! bound to the agent's health check and the owning service's TTL check, so
//! a failing service loses its locks through session invalidation.
//!
//! ## State machine
//! ```text
//! NoSession --create_session--> Acquiring --acquire_key--> Watching{leader, index}
//!     ^                             |  ^                        |
//!     +------- InvalidSession ------+  +---- Backoff(lock_delay) <-- key released
//! ```
//! `Stopped` is reachable from every state.
//!
//! ## Design
//! - `locked` is only set after a read reports this lock's own session as
//!   the holder; an acquisition response alone never sets it.
//! - A key seen without a holder is never re-acquired immediately: the loop
//!   backs off for the lock delay, mirroring the agent's own fencing window.
//! - Transport errors while watching clear `locked` until a later read
//!   confirms ownership again.
//! - The blocking read is raced against the stop channel, so release is not
//!   held up by the agent's wait horizon.

use crate::config::WAIT_POLL_INTERVAL;
use crate::service::ServiceShared;
use crate::shutdown::{stop_channel, StopHandle, StopListener, StopOutcome, StopRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tenure_agent::{AgentClient, AgentError, QueryOptions, SessionBehavior, SessionRequest};
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// State shared between a lock's handles and its loop.
#[derive(Debug)]
struct LockState {
    key: String,
    locked: AtomicBool,
    stopped: AtomicBool,
    released: AtomicBool,
    session: Mutex<Option<String>>,
}

impl LockState {
    fn new(key: String) -> Self {
        Self {
            key,
            locked: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    fn is_locked(&self) -> bool {
        !self.released.load(Ordering::SeqCst) && self.locked.load(Ordering::SeqCst)
    }

    /// Returns the previous value. Never leaves `true` behind once released.
    fn set_locked(&self, locked: bool) -> bool {
        let previous = self.locked.swap(locked, Ordering::SeqCst);
        if locked && self.released.load(Ordering::SeqCst) {
            self.locked.store(false, Ordering::SeqCst);
        }
        previous
    }

    fn session(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<String>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

/// Handle to a lock on one key.
///
/// Cloning yields another handle to the same lock. When every handle is
/// dropped the loop stops as if [`release`](Lock::release) had been called,
/// without anyone waiting for it.
#[derive(Debug, Clone)]
pub struct Lock {
    state: Arc<LockState>,
    stop: StopHandle,
    service: Weak<ServiceShared>,
    release_timeout: Duration,
}

impl Lock {
    /// Start the loop for `key` on behalf of `service`.
    pub(crate) fn start(
        service: &Arc<ServiceShared>,
        key: String,
        value: Option<Vec<u8>>,
        lock_delay: Duration,
    ) -> Self {
        let config = &service.config;
        let state = Arc::new(LockState::new(key));
        let (stop, listener) = stop_channel();
        let span = info_span!(
            parent: &service.span,
            "lock",
            key = %state.key,
            session = tracing::field::Empty
        );

        let lock_loop = LockLoop {
            state: state.clone(),
            agent: service.agent.clone(),
            stop: listener,
            value,
            lock_delay,
            checks: vec![config.agent_check_id.clone(), service.check_id.clone()],
            behavior: config.session_behavior,
            retry_interval: config.retry_interval,
            session: None,
        };
        tokio::spawn(lock_loop.run().instrument(span));

        Self {
            state,
            stop,
            service: Arc::downgrade(service),
            release_timeout: config.release_timeout,
        }
    }

    /// A lock that never runs: already stopped and never held.
    pub(crate) fn inert(key: String) -> Self {
        let state = Arc::new(LockState::new(key));
        state.stopped.store(true, Ordering::SeqCst);
        state.released.store(true, Ordering::SeqCst);
        let (stop, _) = stop_channel();
        Self {
            state,
            stop,
            service: Weak::new(),
            release_timeout: Duration::ZERO,
        }
    }

    pub fn key(&self) -> &str {
        &self.state.key
    }

    /// Whether this process currently holds the key.
    pub fn locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Session the loop currently holds, if any.
    pub fn session(&self) -> Option<String> {
        self.state.session()
    }

    /// Whether the loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Wait until the key is held. Returns `false` if the lock is released
    /// or stopped first.
    pub async fn wait(&self) -> bool {
        loop {
            if self.locked() {
                return true;
            }
            if self.state.released.load(Ordering::SeqCst) || self.is_stopped() {
                return false;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Stop the loop and remove the lock from its service. Idempotent.
    pub async fn release(&self) {
        if !self.stop_loop().await {
            return;
        }
        if let Some(service) = self.service.upgrade() {
            service.forget_lock(self);
        }
    }

    /// Stop the loop, leaving the service's map untouched. Returns `false`
    /// if the lock was already released.
    pub(crate) async fn stop_loop(&self) -> bool {
        if self.state.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.locked.store(false, Ordering::SeqCst);
        match self.stop.request(self.release_timeout).await {
            StopOutcome::TimedOut => {
                warn!(key = %self.state.key, timeout = ?self.release_timeout, "lock loop did not acknowledge release in time");
            }
            outcome => debug!(key = %self.state.key, ?outcome, "lock loop stopped"),
        }
        true
    }

    pub(crate) fn same_as(&self, other: &Lock) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoSession,
    Acquiring,
    Watching { leader: bool, index: u64 },
    Backoff,
}

type Step = Result<State, StopRequest>;

/// Next blocking-read cursor. An index that went backwards means the agent
/// restarted or the key was recreated; start over with an immediate read.
fn next_index(previous: u64, returned: u64) -> u64 {
    if returned < previous {
        0
    } else {
        returned.max(1)
    }
}

struct LockLoop {
    state: Arc<LockState>,
    agent: Arc<dyn AgentClient>,
    stop: StopListener,
    value: Option<Vec<u8>>,
    lock_delay: Duration,
    checks: Vec<String>,
    behavior: SessionBehavior,
    retry_interval: Duration,
    session: Option<String>,
}

impl LockLoop {
    async fn run(mut self) {
        debug!("lock loop started");
        let mut state = State::NoSession;
        let request = loop {
            if let Some(request) = self.stop.poll() {
                break request;
            }
            let step = match state {
                State::NoSession => self.create_session().await,
                State::Acquiring => self.acquire().await,
                State::Watching { leader, index } => self.watch(leader, index).await,
                State::Backoff => self.backoff().await,
            };
            match step {
                Ok(next) => state = next,
                Err(request) => break request,
            }
        };
        self.shutdown(request).await;
    }

    async fn pause(&mut self, duration: Duration) -> Result<(), StopRequest> {
        match self.stop.sleep(duration).await {
            Some(request) => Err(request),
            None => Ok(()),
        }
    }

    async fn create_session(&mut self) -> Step {
        let request = SessionRequest::new(self.lock_delay)
            .with_name(format!("lock {}", self.state.key))
            .with_checks(self.checks.clone())
            .with_behavior(self.behavior);
        match self.agent.create_session(&request).await {
            Ok(session) => {
                Span::current().record("session", session.as_str());
                debug!("session created");
                self.state.set_session(Some(session.clone()));
                self.session = Some(session);
                Ok(State::Acquiring)
            }
            Err(e) => {
                warn!(error = %e, "failed to create session");
                self.pause(self.retry_interval).await?;
                Ok(State::NoSession)
            }
        }
    }

    fn drop_session(&mut self) {
        self.session = None;
        self.state.set_session(None);
    }

    async fn acquire(&mut self) -> Step {
        let Some(session) = self.session.clone() else {
            return Ok(State::NoSession);
        };
        let value = self
            .value
            .clone()
            .unwrap_or_else(|| session.clone().into_bytes());
        match self.agent.acquire_key(&self.state.key, &value, &session).await {
            Ok(acquired) => {
                debug!(acquired, "acquisition attempted");
                Ok(State::Watching {
                    leader: acquired,
                    index: 0,
                })
            }
            Err(AgentError::InvalidSession(message)) => {
                warn!(%message, "session rejected by agent; creating a new one");
                self.drop_session();
                Ok(State::NoSession)
            }
            Err(e) => {
                warn!(error = %e, "failed to acquire lock");
                self.pause(self.retry_interval).await?;
                Ok(State::Acquiring)
            }
        }
    }

    async fn watch(&mut self, leader: bool, index: u64) -> Step {
        let options = QueryOptions::blocking(index);
        let read = self
            .stop
            .race(self.agent.get_key(&self.state.key, &options))
            .await?;

        let (pair, meta) = match read {
            Ok(observation) => observation,
            Err(e) => {
                warn!(error = %e, "failed to read lock key");
                if self.state.set_locked(false) {
                    warn!("lock lost: ownership unknown while agent is unreachable");
                }
                self.pause(self.retry_interval).await?;
                return Ok(State::Watching {
                    leader: false,
                    index: 0,
                });
            }
        };
        let index = next_index(index, meta.last_index);

        match pair.as_ref().and_then(|p| p.holder()) {
            None => {
                let was_locked = self.state.set_locked(false);
                if leader || was_locked {
                    info!("lock lost: key released");
                }
                Ok(State::Backoff)
            }
            Some(holder) if Some(holder) == self.session.as_deref() => {
                let was_locked = self.state.set_locked(true);
                if !leader {
                    info!("lock ownership recovered");
                } else if !was_locked {
                    info!("lock acquired");
                }
                Ok(State::Watching {
                    leader: true,
                    index,
                })
            }
            Some(holder) => {
                let was_locked = self.state.set_locked(false);
                if leader || was_locked {
                    info!(%holder, "lock lost to another session");
                }
                Ok(State::Watching {
                    leader: false,
                    index,
                })
            }
        }
    }

    async fn backoff(&mut self) -> Step {
        debug!(lock_delay = ?self.lock_delay, "backing off before acquiring");
        self.pause(self.lock_delay).await?;
        Ok(State::Acquiring)
    }

    async fn shutdown(mut self, request: StopRequest) {
        self.state.locked.store(false, Ordering::SeqCst);
        if let Some(session) = self.session.take() {
            if let Err(e) = self.agent.destroy_session(&session).await {
                warn!(error = %e, "failed to destroy session");
            }
        }
        self.state.set_session(None);
        self.state.stopped.store(true, Ordering::SeqCst);
        debug!("lock loop exited");
        request.acknowledge();
    }
}
