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

//! Narrow lock interface consumed by worker code.

use crate::{LocalLock, Lock, Service};
use async_trait::async_trait;
use std::sync::Arc;

/// What a singleton worker needs from a lock.
///
/// Worker loops typically call [`wait`](LockApi::wait) before each round of
/// work and check [`locked`](LockApi::locked) between items:
///
/// ```rust,no_run
/// # use tenure_election::LockApi;
/// # async fn run(lock: &dyn LockApi) {
/// loop {
///     if !lock.wait().await {
///         return;
///     }
///     while lock.locked() {
///         // process one item
/// #       break;
///     }
/// }
/// # }
/// ```
#[async_trait]
pub trait LockApi: Send + Sync {
    /// Whether this process currently holds the lock.
    fn locked(&self) -> bool;

    /// Wait until held. `false` means the lock was released or stopped.
    async fn wait(&self) -> bool;

    /// Give up the lock. Idempotent.
    async fn release(&self);
}

#[async_trait]
impl LockApi for Lock {
    fn locked(&self) -> bool {
        Lock::locked(self)
    }

    async fn wait(&self) -> bool {
        Lock::wait(self).await
    }

    async fn release(&self) {
        Lock::release(self).await
    }
}

/// Lock for a singleton job: distributed through `service` when there is
/// one, process-local otherwise (development deployments without an agent).
pub fn singleton_lock(service: Option<&Service>, key: &str) -> Arc<dyn LockApi> {
    match service {
        Some(service) => Arc::new(service.new_lock_with_defaults(key)),
        None => Arc::new(LocalLock::new(key)),
    }
}
