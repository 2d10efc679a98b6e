//! Error types for routing and backend operations.

use shardis_protocol::ProtocolError;

/// Transport-level failures on a single backend connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server disconnected")]
    Disconnected,

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("failed to select database {db}: {reason}")]
    SelectFailed { db: u32, reason: String },
}

/// Errors surfaced by the router.
///
/// Backend failures (`Server`, `Connection`) pass through unchanged;
/// everything else is raised locally before or after the network round
/// trip.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// Missing, empty or malformed server list, or an unreadable config.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The command has no routing key.
    #[error("{0} is not shardable")]
    NotShardable(String),

    /// The command is not in the command table.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(String),

    /// Multi-key commands fan out on their own and cannot join a pipeline.
    #[error("{0} cannot be queued in a pipeline")]
    NotPipelinable(String),

    /// Error reply from a backend, verbatim.
    #[error("{0}")]
    Server(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// Pipeline results could not be matched back to their calls. This is
    /// a bug, never a runtime condition.
    #[error("pipeline consistency violation: {0}")]
    Consistency(String),
}

impl ShardError {
    /// Returns true if the error came from a backend rather than from
    /// local validation.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            ShardError::Server(_) | ShardError::Connection(_) | ShardError::UnexpectedReply { .. }
        )
    }

    pub(crate) fn unexpected(command: &str, reply: &shardis_protocol::Frame) -> Self {
        ShardError::UnexpectedReply {
            command: command.to_string(),
            reply: reply.to_string(),
        }
    }
}
