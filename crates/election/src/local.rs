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

//! Process-local lock for deployments without a coordination agent.

use crate::LockApi;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// A lock that is held from creation until released.
///
/// Only correct when a single process runs the job, e.g. local development
/// or debug deployments.
#[derive(Debug)]
pub struct LocalLock {
    key: String,
    released: AtomicBool,
}

impl LocalLock {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl LockApi for LocalLock {
    fn locked(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    async fn wait(&self) -> bool {
        self.locked()
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lock_held_until_released() {
        let lock = LocalLock::new("service/restapi/cleanup");
        assert!(lock.locked());
        assert!(lock.wait().await);

        lock.release().await;
        lock.release().await;
        assert!(!lock.locked());
        assert!(!lock.wait().await);
    }
}
