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

//! Service registration and lifecycle supervision.
//!
//! ## Purpose
//! A [`Service`] registers a named process instance with the local agent,
//! keeps its TTL check passing, and owns the [`Lock`]s created through it.
//! Stopping the service stops every lock it owns before deregistering.
//!
//! ## Supervisor loop
//! 1. Clear `is_registered`.
//! 2. Deregister any stale registration with the same id; retry on failure.
//! 3. Register; on failure go back to step 2 after the retry interval.
//! 4. Set `is_registered` and refresh the check once.
//! 5. Heartbeat every `heartbeat_interval`. A missing check means the agent
//!    forgot the registration: go back to step 1.
//! 6. On stop: stop all locks concurrently, clear the map, deregister
//!    (best effort), clear `is_registered`, acknowledge.
//!
//! Errors inside the loop are logged with the service span and retried;
//! callers observe registration only through [`Service::is_registered`] and
//! [`Service::wait_for_registration`].

use crate::config::{ServiceConfig, REGISTRATION_POLL_INTERVAL};
use crate::lock::Lock;
use crate::shutdown::{stop_channel, StopHandle, StopListener, StopOutcome, StopRequest};
use crate::ServiceResult;
use futures::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tenure_agent::{AgentClient, AgentError, ServiceRegistration};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// State shared between service handles, the supervisor and lock handles.
pub(crate) struct ServiceShared {
    pub(crate) config: ServiceConfig,
    pub(crate) id: String,
    pub(crate) check_id: String,
    pub(crate) agent: Arc<dyn AgentClient>,
    pub(crate) span: Span,
    locks: Mutex<HashMap<String, Lock>>,
    registered: AtomicBool,
    closing: AtomicBool,
}

impl ServiceShared {
    fn locks(&self) -> MutexGuard<'_, HashMap<String, Lock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `lock` from the map if it is the one recorded under its key.
    pub(crate) fn forget_lock(&self, lock: &Lock) {
        let mut locks = self.locks();
        if locks
            .get(lock.key())
            .is_some_and(|recorded| recorded.same_as(lock))
        {
            locks.remove(lock.key());
        }
    }

    fn registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            id: self.id.clone(),
            name: self.config.name.clone(),
            tags: self.config.tags.clone(),
            port: self.config.port,
            check_ttl: self.config.check_ttl,
        }
    }
}

/// Handle to a registered service.
///
/// Cloning yields another handle to the same service. When every handle is
/// dropped the supervisor shuts down as if [`deregister`](Service::deregister)
/// had been called.
#[derive(Clone)]
pub struct Service {
    shared: Arc<ServiceShared>,
    stop: StopHandle,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.shared.id)
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl Service {
    /// Validate `config` and start the supervisor. Returns without waiting
    /// for the registration to take effect. Must be called within a tokio
    /// runtime.
    pub fn register(agent: Arc<dyn AgentClient>, config: ServiceConfig) -> ServiceResult<Self> {
        Self::register_with_span(agent, config, &Span::current())
    }

    /// Like [`register`](Service::register), logging under a `service` span
    /// whose parent is `parent`.
    pub fn register_with_span(
        agent: Arc<dyn AgentClient>,
        config: ServiceConfig,
        parent: &Span,
    ) -> ServiceResult<Self> {
        config.validate()?;
        let id = config.service_id().to_string();
        let span = info_span!(parent: parent, "service", name = %config.name, id = %id);
        let shared = Arc::new(ServiceShared {
            check_id: config.check_id(),
            id,
            config,
            agent,
            span: span.clone(),
            locks: Mutex::new(HashMap::new()),
            registered: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        });
        let (stop, listener) = stop_channel();
        let supervisor = Supervisor {
            shared: shared.clone(),
            stop: listener,
        };
        tokio::spawn(supervisor.run().instrument(span));
        Ok(Self { shared, stop })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Id of the TTL check backing this registration (`"service:" + id`).
    pub fn check_id(&self) -> &str {
        &self.shared.check_id
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.shared.config
    }

    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the registration to take effect.
    pub async fn wait_for_registration(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_registered() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(REGISTRATION_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Start a lock on `key`. `value` defaults to the lock's session id.
    ///
    /// The first lock created for a key is recorded and stopped with the
    /// service. A second lock on the same key runs but is not recorded; the
    /// caller owns its lifetime. After [`deregister`](Service::deregister)
    /// the returned lock is inert and never held.
    pub fn new_lock(
        &self,
        key: impl Into<String>,
        value: Option<Vec<u8>>,
        lock_delay: Duration,
    ) -> Lock {
        let key = key.into();
        let mut locks = self.shared.locks();
        if self.shared.closing.load(Ordering::SeqCst) {
            warn!(parent: &self.shared.span, %key, "service is shutting down; lock will not run");
            return Lock::inert(key);
        }
        let lock = Lock::start(&self.shared, key.clone(), value, lock_delay);
        match locks.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(lock.clone());
            }
            Entry::Occupied(entry) => {
                warn!(parent: &self.shared.span, key = %entry.key(), "lock already exists for key; new lock is not tracked by the service");
            }
        }
        lock
    }

    /// Start a lock on `key` with the configured lock delay and the session
    /// id as value.
    pub fn new_lock_with_defaults(&self, key: impl Into<String>) -> Lock {
        self.new_lock(key, None, self.shared.config.lock_delay)
    }

    pub fn lock_count(&self) -> usize {
        self.shared.locks().len()
    }

    pub fn lock_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.locks().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Lock recorded under `key`.
    pub fn lock(&self, key: &str) -> Option<Lock> {
        self.shared.locks().get(key).cloned()
    }

    /// Stop all locks and deregister, waiting up to the configured
    /// deregister timeout. Idempotent; never fails.
    ///
    /// If the supervisor does not acknowledge in time (it may be stuck in an
    /// agent call), the tracked locks are stopped from here so the map is
    /// empty on return either way. The supervisor still deregisters from the
    /// agent once its call completes.
    pub async fn deregister(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let timeout = self.shared.config.deregister_timeout;
        let outcome = self.stop.request(timeout).await;
        match outcome {
            StopOutcome::TimedOut => {
                warn!(parent: &self.shared.span, ?timeout, "service loop did not acknowledge deregistration in time");
            }
            outcome => debug!(parent: &self.shared.span, ?outcome, "deregister requested"),
        }
        if !outcome.is_acknowledged() {
            let locks: Vec<Lock> = self.shared.locks().drain().map(|(_, lock)| lock).collect();
            if !locks.is_empty() {
                debug!(parent: &self.shared.span, count = locks.len(), "stopping locks without the service loop");
                join_all(locks.iter().map(|lock| lock.stop_loop())).await;
            }
        }
    }
}

struct Supervisor {
    shared: Arc<ServiceShared>,
    stop: StopListener,
}

impl Supervisor {
    async fn run(mut self) {
        let request = loop {
            if let Err(request) = self.register().await {
                break request;
            }
            if let Err(request) = self.heartbeat().await {
                break request;
            }
        };
        self.shutdown(request).await;
    }

    async fn pause(&mut self) -> Result<(), StopRequest> {
        match self.stop.sleep(self.shared.config.retry_interval).await {
            Some(request) => Err(request),
            None => Ok(()),
        }
    }

    fn check_stop(&mut self) -> Result<(), StopRequest> {
        match self.stop.poll() {
            Some(request) => Err(request),
            None => Ok(()),
        }
    }

    /// Steps 1 to 4. Returns once registered.
    async fn register(&mut self) -> Result<(), StopRequest> {
        self.shared.registered.store(false, Ordering::SeqCst);
        let agent = self.shared.agent.clone();
        let registration = self.shared.registration();
        loop {
            self.check_stop()?;
            if let Err(e) = agent.deregister_service(&registration.id).await {
                warn!(error = %e, "failed to clear previous registration");
                self.pause().await?;
                continue;
            }

            self.check_stop()?;
            match agent.register_service(&registration).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "failed to register service");
                    self.pause().await?;
                }
            }
        }

        self.shared.registered.store(true, Ordering::SeqCst);
        info!(check_id = %self.shared.check_id, "service registered");
        if let Err(e) = agent.pass_check(&self.shared.check_id, "registered").await {
            warn!(error = %e, "failed to refresh service check after registering");
        }
        Ok(())
    }

    /// Step 5. Returns `Ok` when the registration must be redone.
    async fn heartbeat(&mut self) -> Result<(), StopRequest> {
        let agent = self.shared.agent.clone();
        let interval = self.shared.config.heartbeat_interval;
        loop {
            if let Some(request) = self.stop.sleep(interval).await {
                return Err(request);
            }
            match agent.pass_check(&self.shared.check_id, "").await {
                Ok(()) => debug!("service check refreshed"),
                Err(AgentError::NoSuchCheck(message)) => {
                    warn!(%message, "service check missing; registering again");
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "failed to refresh service check"),
            }
        }
    }

    /// Step 6.
    async fn shutdown(self, request: StopRequest) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let locks: Vec<Lock> = self.shared.locks().drain().map(|(_, lock)| lock).collect();
        if !locks.is_empty() {
            debug!(count = locks.len(), "stopping locks");
            join_all(locks.iter().map(|lock| lock.stop_loop())).await;
        }

        if let Err(e) = self.shared.agent.deregister_service(&self.shared.id).await {
            warn!(error = %e, "failed to deregister service");
        }
        self.shared.registered.store(false, Ordering::SeqCst);
        info!("service deregistered");
        request.acknowledge();
    }
}
