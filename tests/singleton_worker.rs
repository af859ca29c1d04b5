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

//! Singleton worker pattern end to end.
//!
//! Two workers run the same job loop: wait for the lock, then process items
//! while it is held. Items must never be processed by both at once, and the
//! job moves to the surviving worker when the holder shuts down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenure::agent::memory::MemoryCluster;
use tenure::{singleton_lock, LockApi, Service, ServiceConfig};
use tokio::time::sleep;

const JOB: &str = "service/awslogidx/cleanup";

struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    processed: [AtomicUsize; 2],
}

async fn worker(id: usize, lock: Arc<dyn LockApi>, counters: Arc<Counters>) {
    loop {
        if !lock.wait().await {
            return;
        }
        while lock.locked() {
            let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
            counters.max_active.fetch_max(active, Ordering::SeqCst);
            counters.processed[id].fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(500)).await;
            counters.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_singleton_job_moves_to_survivor() {
    let cluster = MemoryCluster::new();
    let counters = Arc::new(Counters {
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
        processed: [AtomicUsize::new(0), AtomicUsize::new(0)],
    });

    let mut services = Vec::new();
    let mut workers = Vec::new();
    for (id, node) in ["node-a", "node-b"].into_iter().enumerate() {
        let service = Service::register(
            Arc::new(cluster.agent(node)),
            ServiceConfig::new("awslogidx").with_lock_delay(Duration::from_secs(30)),
        )
        .unwrap();
        assert!(service.wait_for_registration(Duration::from_secs(10)).await);
        let lock = singleton_lock(Some(&service), JOB);
        workers.push(tokio::spawn(worker(id, lock, counters.clone())));
        services.push(service);
    }

    sleep(Duration::from_secs(20)).await;
    let first = if counters.processed[0].load(Ordering::SeqCst) > 0 { 0 } else { 1 };
    let second = 1 - first;
    assert_eq!(counters.processed[second].load(Ordering::SeqCst), 0);

    // The holder shuts down; its worker sees the lock stop and exits.
    services[first].deregister().await;
    sleep(Duration::from_secs(60)).await;
    assert!(workers[first].is_finished());
    assert!(counters.processed[second].load(Ordering::SeqCst) > 0);
    assert_eq!(counters.max_active.load(Ordering::SeqCst), 1);

    services[second].deregister().await;
    sleep(Duration::from_secs(2)).await;
    assert!(workers[second].is_finished());
}
