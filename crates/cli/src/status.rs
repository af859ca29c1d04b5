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

//! Lock key inspection

use anyhow::{Context, Result};
use tenure_agent::{AgentClient, HttpAgentClient, HttpAgentConfig, QueryOptions};

pub async fn status(agent: &str, token: Option<String>, key: &str) -> Result<()> {
    let mut config = HttpAgentConfig::new(agent);
    if let Some(token) = token {
        config = config.with_token(token);
    }
    let client = HttpAgentClient::new(config).context("Invalid agent address")?;

    let (pair, meta) = client
        .get_key(key, &QueryOptions::default())
        .await
        .with_context(|| format!("Failed to read key {key}"))?;

    println!("Key: {key}");
    println!("   Index: {}", meta.last_index);
    match pair {
        None => println!("   Holder: none (key absent)"),
        Some(pair) => {
            match pair.holder() {
                Some(session) => println!("   Holder: {session}"),
                None => println!("   Holder: none"),
            }
            println!("   Lock index: {}", pair.lock_index);
            if !pair.value.is_empty() {
                println!("   Value: {}", String::from_utf8_lossy(&pair.value));
            }
        }
    }
    Ok(())
}
