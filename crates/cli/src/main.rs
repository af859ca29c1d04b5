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

//! Tenure CLI Tool
//!
//! ## Purpose
//! Operator and demo entry point for the election primitives:
//! - `run`: register a service, hold one or more locks, log leadership
//!   transitions and deregister on SIGINT/SIGTERM
//! - `status`: print which session holds a lock key

use anyhow::Result;
use clap::{Parser, Subcommand};
use tenure_agent::http::DEFAULT_AGENT_ADDRESS;

mod run;
mod status;

#[derive(Parser)]
#[command(name = "tenure")]
#[command(about = "Tenure CLI - service registration and leader election", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a service and hold locks until interrupted
    Run {
        /// Agent address (e.g., 127.0.0.1:8500)
        #[arg(long, env = "TENURE_AGENT_ADDRESS", default_value = DEFAULT_AGENT_ADDRESS)]
        agent: String,

        /// ACL token
        #[arg(long, env = "TENURE_AGENT_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Service name (required unless --config is given)
        #[arg(short, long, env = "TENURE_SERVICE_NAME")]
        name: Option<String>,

        /// Service id (defaults to the name)
        #[arg(long, env = "TENURE_SERVICE_ID")]
        id: Option<String>,

        /// Service tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Service port
        #[arg(long)]
        port: Option<u16>,

        /// Lock key to hold (repeatable)
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Lock delay in seconds
        #[arg(long, default_value_t = 30)]
        lock_delay: u64,

        /// YAML settings file; replaces the service and lock flags
        #[arg(short, long)]
        config: Option<String>,

        /// Use a process-local agent instead of a real one
        #[arg(long)]
        in_memory: bool,
    },

    /// Show the holder of a lock key
    Status {
        /// Agent address
        #[arg(long, env = "TENURE_AGENT_ADDRESS", default_value = DEFAULT_AGENT_ADDRESS)]
        agent: String,

        /// ACL token
        #[arg(long, env = "TENURE_AGENT_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Lock key
        #[arg(short, long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            agent,
            token,
            name,
            id,
            tags,
            port,
            keys,
            lock_delay,
            config,
            in_memory,
        } => {
            run::run(run::RunOptions {
                agent,
                token,
                name,
                id,
                tags,
                port,
                keys,
                lock_delay,
                config,
                in_memory,
            })
            .await
        }
        Commands::Status { agent, token, key } => status::status(&agent, token, &key).await,
    }
}
