//! Actor runtime errors

use codec::ActorId;
use network::TransportError;
use streams::StreamError;
use thiserror::Error;

/// Errors raised by the actor registry, server and collaborators
#[derive(Error, Debug, Clone)]
pub enum ActorError {
    #[error("Actor identifier '{actor_id}' is already bound")]
    DuplicateIdentifier { actor_id: ActorId },

    #[error("Actor identifier must not be empty")]
    EmptyIdentifier,

    #[error("Unknown actor '{actor_id}'")]
    UnknownActor { actor_id: ActorId },

    /// The mailbox task is gone; the actor has stopped
    #[error("Mailbox of actor '{actor_id}' is closed")]
    MailboxClosed { actor_id: ActorId },

    #[error("Lifecycle hook failed for actor '{actor_id}': {message}")]
    Lifecycle { actor_id: ActorId, message: String },

    #[error("Persistence failure: {message}")]
    Persistence { message: String },

    #[error("Discovery failure: {message}")]
    Discovery { message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl ActorError {
    pub fn lifecycle(actor_id: &ActorId, message: impl ToString) -> Self {
        Self::Lifecycle {
            actor_id: actor_id.clone(),
            message: message.to_string(),
        }
    }

    pub fn persistence(message: impl ToString) -> Self {
        Self::Persistence {
            message: message.to_string(),
        }
    }

    /// Short stable name for log fields
    pub fn category(&self) -> &'static str {
        match self {
            ActorError::DuplicateIdentifier { .. } => "duplicate_identifier",
            ActorError::EmptyIdentifier => "empty_identifier",
            ActorError::UnknownActor { .. } => "unknown_actor",
            ActorError::MailboxClosed { .. } => "mailbox_closed",
            ActorError::Lifecycle { .. } => "lifecycle",
            ActorError::Persistence { .. } => "persistence",
            ActorError::Discovery { .. } => "discovery",
            ActorError::Transport(_) => "transport",
            ActorError::Stream(_) => "stream",
        }
    }
}

pub type Result<T> = std::result::Result<T, ActorError>;
