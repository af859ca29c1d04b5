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

//! Run a registered service holding a set of locks

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tenure_agent::memory::MemoryCluster;
use tenure_agent::{AgentClient, HttpAgentClient, HttpAgentConfig};
use tenure_election::{ConfigLoader, ElectionSettings, Lock, LockSpec, Service, ServiceConfig};
use tokio::signal;
use tracing::{info, info_span, warn};

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RunOptions {
    pub agent: String,
    pub token: Option<String>,
    pub name: Option<String>,
    pub id: Option<String>,
    pub tags: Vec<String>,
    pub port: Option<u16>,
    pub keys: Vec<String>,
    pub lock_delay: u64,
    pub config: Option<String>,
    pub in_memory: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn settings_from_args(options: &RunOptions) -> Result<ElectionSettings> {
    let Some(name) = options.name.clone() else {
        bail!("--name is required when no --config file is given");
    };
    let lock_delay = Duration::from_secs(options.lock_delay);

    let mut service = ServiceConfig::new(name)
        .with_tags(options.tags.clone())
        .with_lock_delay(lock_delay);
    if let Some(id) = &options.id {
        service = service.with_id(id.clone());
    }
    if let Some(port) = options.port {
        service = service.with_port(port);
    }
    service.validate()?;

    let mut agent = HttpAgentConfig::new(options.agent.clone());
    if let Some(token) = &options.token {
        agent = agent.with_token(token.clone());
    }

    let locks = options
        .keys
        .iter()
        .map(|key| LockSpec {
            key: key.clone(),
            value: None,
            lock_delay,
        })
        .collect();

    Ok(ElectionSettings {
        agent,
        service,
        locks,
    })
}

pub async fn run(options: RunOptions) -> Result<()> {
    init_tracing();

    let settings = match &options.config {
        Some(path) => ConfigLoader::new()
            .load_with_env_precedence(path)
            .await
            .with_context(|| format!("Failed to load settings from {path}"))?,
        None => settings_from_args(&options)?,
    };

    let agent: Arc<dyn AgentClient> = if options.in_memory {
        info!("using a process-local agent");
        Arc::new(MemoryCluster::new().agent(settings.service.service_id()))
    } else {
        Arc::new(HttpAgentClient::new(settings.agent.clone()).context("Invalid agent address")?)
    };

    match agent.agent_self().await {
        Ok(node) => info!(%node, "connected to agent"),
        Err(e) => warn!(error = %e, address = %settings.agent.address, "agent not reachable yet; will keep retrying"),
    }

    let span = info_span!("tenure");
    let service = Service::register_with_span(agent, settings.service.clone(), &span)?;
    if service.wait_for_registration(REGISTRATION_TIMEOUT).await {
        info!(id = service.id(), check_id = service.check_id(), "service registered");
    } else {
        warn!(id = service.id(), timeout = ?REGISTRATION_TIMEOUT, "registration not confirmed; continuing in the background");
    }

    let locks: Vec<Lock> = settings
        .locks
        .iter()
        .map(|spec| service.new_lock(spec.key.clone(), spec.value.clone(), spec.lock_delay))
        .collect();
    if locks.is_empty() {
        info!("no lock keys given; only keeping the registration alive");
    }

    let reporter = tokio::spawn(report_transitions(locks));
    shutdown_signal().await;
    info!("shutdown signal received, deregistering...");
    reporter.abort();
    service.deregister().await;
    info!("service deregistered");
    Ok(())
}

/// Log whenever a lock's `locked` flag flips.
async fn report_transitions(locks: Vec<Lock>) {
    let mut held = vec![false; locks.len()];
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        for (lock, was_held) in locks.iter().zip(held.iter_mut()) {
            let now_held = lock.locked();
            if now_held == *was_held {
                continue;
            }
            if now_held {
                info!(key = lock.key(), session = ?lock.session(), "holding lock");
            } else {
                info!(key = lock.key(), "no longer holding lock");
            }
            *was_held = now_held;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            agent: "127.0.0.1:8500".to_string(),
            token: None,
            name: Some("awslogidx".to_string()),
            id: None,
            tags: vec![],
            port: None,
            keys: vec!["service/awslogidx/cleanup".to_string()],
            lock_delay: 30,
            config: None,
            in_memory: false,
        }
    }

    #[test]
    fn test_settings_from_args() {
        let settings = settings_from_args(&options()).unwrap();
        assert_eq!(settings.agent.address, "http://127.0.0.1:8500");
        assert_eq!(settings.service.service_id(), "awslogidx");
        assert_eq!(settings.locks.len(), 1);
        assert_eq!(settings.locks[0].lock_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_name_required_without_config() {
        let mut opts = options();
        opts.name = None;
        assert!(settings_from_args(&opts).is_err());
    }
}
