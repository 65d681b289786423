//! Error types for scheduler operations

use gridlink_client::TransportError;
use thiserror::Error;

use crate::master::MasterParseError;
use crate::reply::ReplyParseError;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors a scheduler operation can end with
///
/// None of these is fatal: the client tries again once the project's backoff
/// window has passed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Connection, I/O or server status failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The scheduler reply could not be parsed
    #[error("Failed to parse scheduler reply: {0}")]
    Reply(#[from] ReplyParseError),

    /// The master document could not be parsed
    #[error("Failed to parse master document: {0}")]
    Master(#[from] MasterParseError),

    /// The master document was fetched but the project still has no scheduler
    #[error("Master file for {project} lists no schedulers")]
    NoSchedulers { project: String },

    /// Neither a scheduler URL nor a master URL is known
    #[error("Project {project} has no scheduler or master URL")]
    NoUsableUrl { project: String },

    /// Another operation holds the project
    #[error("Project {project} already has a scheduler operation in progress")]
    ProjectBusy { project: String },

    /// `start_op` without a preceding `init_*` call
    #[error("Scheduler operation was not initialized")]
    NotInitialized,

    /// `init_*` or `start_op` while a negotiation is in flight
    #[error("Scheduler operation is already in progress")]
    InProgress,

    /// The operation was initialized for a different project
    #[error("Scheduler operation is bound to {expected}, not {actual}")]
    WrongProject { expected: String, actual: String },

    /// The request document could not be built
    #[error("Failed to encode scheduler request: {0}")]
    Request(String),
}

impl SchedulerError {
    /// Whether this failure came out of a negotiation attempt and so must
    /// advance the project's backoff
    pub fn feeds_backoff(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Reply(_) | Self::Master(_) | Self::NoSchedulers { .. }
        )
    }

    /// Whether the server answered but its document was unusable
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Reply(_) | Self::Master(_))
    }

    /// Whether the caller broke an operation precondition
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::ProjectBusy { .. } | Self::NotInitialized | Self::InProgress | Self::WrongProject { .. }
        )
    }
}
