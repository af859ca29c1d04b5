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

//! Stop protocol shared by the service and lock loops.
//!
//! ## Purpose
//! A background loop owns a [`StopListener`]; callers hold [`StopHandle`]s.
//! A stop request carries a one-shot acknowledgement channel that the loop
//! completes after its teardown, so callers can bound how long they wait.
//!
//! ## Design
//! - **Capacity one**: the stop channel buffers a single request. A caller
//!   never waits for the loop to become receptive; a second request while
//!   one is pending returns [`StopOutcome::AlreadyStopping`] at once.
//! - **Non-blocking acknowledgement**: the loop completes the one-shot and
//!   moves on; an absent requester is not an error.
//! - **Interruptible waits**: [`StopListener::sleep`] and
//!   [`StopListener::race`] select over the stop channel and a timer or an
//!   in-flight agent call, polling the stop channel first.
//! - **Dropped handles**: when every handle is gone the channel is closed,
//!   which the loop treats as a stop request nobody waits on.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::oneshot;

/// A pending stop request, handed to the loop.
#[derive(Debug)]
pub struct StopRequest {
    ack: Option<oneshot::Sender<bool>>,
}

impl StopRequest {
    /// Request with nobody waiting (the channel was closed).
    pub(crate) fn detached() -> Self {
        Self { ack: None }
    }

    /// Confirm teardown to the requester, if it is still waiting.
    pub fn acknowledge(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(true);
        }
    }
}

/// How a [`StopHandle::request`] concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop finished its teardown within the timeout
    Acknowledged,
    /// The loop did not confirm in time; it may still be tearing down
    TimedOut,
    /// Another stop request is already queued
    AlreadyStopping,
    /// The loop has already exited
    AlreadyStopped,
}

impl StopOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, StopOutcome::Acknowledged)
    }
}

/// Requester side of a stop channel.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<StopRequest>,
}

impl StopHandle {
    /// Ask the loop to stop and wait up to `timeout` for its acknowledgement.
    pub async fn request(&self, timeout: Duration) -> StopOutcome {
        let (ack_tx, ack_rx) = oneshot::channel();
        match self.tx.try_send(StopRequest { ack: Some(ack_tx) }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return StopOutcome::AlreadyStopping,
            Err(TrySendError::Closed(_)) => return StopOutcome::AlreadyStopped,
        }
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(_)) => StopOutcome::Acknowledged,
            // The loop exited with our request still queued.
            Ok(Err(_)) => StopOutcome::AlreadyStopped,
            Err(_) => StopOutcome::TimedOut,
        }
    }

    /// Whether the loop has exited (its listener is gone).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Loop side of a stop channel.
#[derive(Debug)]
pub struct StopListener {
    rx: mpsc::Receiver<StopRequest>,
}

impl StopListener {
    /// Take a pending request without waiting.
    pub fn poll(&mut self) -> Option<StopRequest> {
        match self.rx.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(StopRequest::detached()),
        }
    }

    async fn recv(&mut self) -> StopRequest {
        self.rx.recv().await.unwrap_or_else(StopRequest::detached)
    }

    /// Sleep for `duration` unless a stop request arrives first.
    pub async fn sleep(&mut self, duration: Duration) -> Option<StopRequest> {
        tokio::select! {
            biased;
            request = self.recv() => Some(request),
            _ = tokio::time::sleep(duration) => None,
        }
    }

    /// Await `fut` unless a stop request arrives first; `fut` is dropped then.
    pub async fn race<F: Future>(&mut self, fut: F) -> Result<F::Output, StopRequest> {
        tokio::select! {
            biased;
            request = self.recv() => Err(request),
            output = fut => Ok(output),
        }
    }
}

/// Create a stop channel of capacity one.
pub fn stop_channel() -> (StopHandle, StopListener) {
    let (tx, rx) = mpsc::channel(1);
    (StopHandle { tx }, StopListener { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_request_acknowledged() {
        let (handle, mut listener) = stop_channel();
        let task = tokio::spawn(async move {
            loop {
                if let Some(request) = listener.sleep(Duration::from_secs(5)).await {
                    request.acknowledge();
                    return;
                }
            }
        });

        let outcome = handle.request(Duration::from_secs(1)).await;
        assert_eq!(outcome, StopOutcome::Acknowledged);
        task.await.unwrap();
        assert_eq!(
            handle.request(Duration::from_secs(1)).await,
            StopOutcome::AlreadyStopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_when_loop_busy() {
        let (handle, _listener) = stop_channel();
        let started = tokio::time::Instant::now();
        let outcome = handle.request(Duration::from_secs(1)).await;
        assert_eq!(outcome, StopOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(1));

        // The first request is still queued.
        assert_eq!(
            handle.request(Duration::from_secs(1)).await,
            StopOutcome::AlreadyStopping
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_is_detached_stop() {
        let (handle, mut listener) = stop_channel();
        assert!(listener.poll().is_none());
        drop(handle);
        assert!(listener.poll().is_some());
        assert!(listener.sleep(Duration::from_secs(60)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_prefers_stop() {
        let (handle, mut listener) = stop_channel();
        let requester = tokio::spawn(async move { handle.request(Duration::from_secs(1)).await });
        tokio::task::yield_now().await;

        let result = listener
            .race(tokio::time::sleep(Duration::from_secs(300)))
            .await;
        match result {
            Err(request) => request.acknowledge(),
            Ok(()) => panic!("blocking call should have been interrupted"),
        }
        assert_eq!(requester.await.unwrap(), StopOutcome::Acknowledged);
    }
}
