//! Commands sent by the master and the responses a node sends back.
//!
//! Commands are matched by literal prefix, `get` before `alive`. Any other
//! command is a broadcast instruction whose payload starts after a fixed-width
//! prefix (conventionally `broadcast `).

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::NodeId;

/// Number of leading bytes of a broadcast command that are skipped.
pub const BROADCAST_PREFIX_LEN: usize = 10;

/// A parsed master command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Retrieve the node's message log.
    Get,

    /// Retrieve the ids the node believes are alive.
    Alive,

    /// Record a message locally and forward it to every peer link.
    Broadcast {
        /// The message, with the command prefix removed.
        payload: String,
    },
}

impl Command {
    /// Parse a single command line, without its trailing newline.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        if raw.starts_with("get") {
            Ok(Self::Get)
        } else if raw.starts_with("alive") {
            Ok(Self::Alive)
        } else {
            raw.get(BROADCAST_PREFIX_LEN..)
                .map(|payload| Self::Broadcast {
                    payload: payload.to_owned(),
                })
                .ok_or_else(|| CommandError::Malformed(raw.to_owned()))
        }
    }
}

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum CommandError {
    #[error("command {0:?} is too short to carry a broadcast payload")]
    #[diagnostic(code(relay::proto::malformed_command))]
    Malformed(String),
}

/// A response to a master query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The message log, in arrival order.
    Messages(Vec<String>),

    /// The alive ids.
    Alive(Vec<NodeId>),
}

/// Characters stripped from the end of each message in a `get` response.
const TRAILING_WHITESPACE: &[char] = &[' ', '\t', '\n', '\r', '\x0b', '\x0c'];

impl Response {
    /// Build the response to a `get`, trimming trailing ASCII whitespace from each message.
    pub fn messages<'a>(log: impl IntoIterator<Item = &'a str>) -> Self {
        Self::Messages(
            log.into_iter()
                .map(|m| m.trim_end_matches(TRAILING_WHITESPACE).to_owned())
                .collect(),
        )
    }

    /// Build the response to an `alive`, ordering ids by their decimal form.
    pub fn alive(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let mut ids: Vec<_> = ids.into_iter().collect();
        ids.sort_by_key(|id| id.to_string());
        Self::Alive(ids)
    }

    /// The response body, without its length prefix.
    pub fn body(&self) -> String {
        match self {
            Self::Messages(messages) => format!("messages {}", messages.join(",")),
            Self::Alive(ids) => format!(
                "alive {}",
                ids.iter()
                    .map(NodeId::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    /// Encode the response for the wire: `<len>-<body>\n`, where `len` is the
    /// byte length of the body.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.body();
        writeln!(f, "{}-{}", body.len(), body)
    }
}
