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

//! Error types for coordination agent operations.

use thiserror::Error;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors surfaced by an [`AgentClient`](crate::AgentClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Agent unreachable, connection reset, or request timed out
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session id is unknown to the agent (expired, destroyed or never created)
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// The TTL check does not exist; the owning service must re-register
    #[error("No such check: {0}")]
    NoSuchCheck(String),

    /// A registration with the same id already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other non-success response from the agent
    #[error("Agent returned status {status}: {message}")]
    Api { status: u16, message: String },

    /// Request or response payload could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Client configuration error (bad agent address, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Whether retrying the same operation later may succeed without any
    /// change of state on the caller's side.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Transport(_) => true,
            AgentError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Classify a non-success agent response by status code and body.
    ///
    /// The agent reports session and check problems as plain-text bodies,
    /// sometimes with a generic 500 status, so the body is inspected first.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = body.trim().to_string();
        let lower = message.to_lowercase();
        if lower.contains("invalid session") || lower.contains("session id not found") {
            AgentError::InvalidSession(message)
        } else if lower.contains("does not have associated ttl")
            || lower.contains("unknown check")
        {
            AgentError::NoSuchCheck(message)
        } else if status == 409 {
            AgentError::Conflict(message)
        } else {
            AgentError::Api { status, message }
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

#[cfg(feature = "http-backend")]
impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            AgentError::Serialization(err.to_string())
        } else {
            AgentError::Transport(err.to_string())
        }
    }
}
