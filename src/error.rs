//! Error kinds surfaced to the command layer.
//!
//! Every variant is local and recoverable: the command layer turns it into a
//! reply for the user and the session keeps running.

use std::time::Duration;

use thiserror::Error;

use crate::models::ChannelId;
use crate::session::PlaybackStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    #[error("I'm not in a voice channel!")]
    NotConnected,

    #[error("Already connected to another voice channel ({channel}), use switch to move me")]
    AlreadyConnected { channel: ChannelId },

    #[error("Cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: PlaybackStatus,
    },

    #[error("Queue is empty!")]
    QueueEmpty,

    #[error("Invalid position {position}! Queue has {len} song(s)")]
    IndexOutOfRange { position: usize, len: usize },

    #[error("Command on cooldown. Try again in {:.1}s", retry_after.as_secs_f32())]
    RateLimited { retry_after: Duration },

    #[error("Could not find any results for: {0}")]
    NotFound(String),

    #[error("Could not load track: {0}")]
    Extraction(String),

    #[error("You don't have permission to {0}")]
    PermissionDenied(&'static str),

    #[error("Volume must be between 0 and 100, got {0}")]
    InvalidVolume(i64),

    #[error("Music commands can only be used in the #{allowed} channel")]
    WrongChannel { allowed: String },

    #[error("Voice transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

/// Startup configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Expected {0} in the environment")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}
