//! Error types for Cadence Lockstep.
//!
//! Errors carry structured context fields instead of pre-formatted strings:
//! construction on hot paths is allocation-free, callers can match on the
//! specific case, and messages are only formatted when somebody actually
//! displays them.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::wire::codec::CodecError;
use crate::{GameTime, PlayerId};

/// The error type for all fallible engine operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum LockstepError {
    /// The engine has not finished its snapshot bootstrap yet; commands are
    /// not accepted and the simulation does not advance.
    NotInitialized,
    /// A command with an empty payload was refused.
    EmptyCommand,
    /// No command time is known yet: the pacer has not completed a single
    /// step, so there is no safe execution time to schedule against.
    CommandTimeUnknown,
    /// A remote peer has already simulated past the candidate command time;
    /// the command could not reach them before becoming due.
    PeerAhead {
        /// The player that is ahead.
        player_id: PlayerId,
        /// That player's last reported gameplay time.
        peer_gameplay_time: GameTime,
        /// The command time the push was evaluated against.
        command_time: GameTime,
    },
    /// The operation is not available during replay playback.
    ReplayPlayback,
    /// An inbound packet arrived on a route the engine does not know.
    UnknownRoute {
        /// The offending route name.
        route: String,
    },
    /// An inbound P2P packet was too short to carry its sender prefix.
    TruncatedPacket {
        /// Bytes required for the sender prefix.
        needed: usize,
        /// Bytes actually present.
        got: usize,
    },
    /// A packet or replay stream failed to decode.
    Codec(CodecError),
}

impl Display for LockstepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => {
                write!(f, "engine is not initialized yet")
            },
            Self::EmptyCommand => write!(f, "refusing zero-length command"),
            Self::CommandTimeUnknown => {
                write!(f, "command time is not known yet (pacer has not stepped)")
            },
            Self::PeerAhead {
                player_id,
                peer_gameplay_time,
                command_time,
            } => {
                write!(
                    f,
                    "player {} is already at gameplay time {} (past command time {})",
                    player_id, peer_gameplay_time, command_time
                )
            },
            Self::ReplayPlayback => {
                write!(f, "operation is not available during replay playback")
            },
            Self::UnknownRoute { route } => write!(f, "unknown route: {route}"),
            Self::TruncatedPacket { needed, got } => {
                write!(
                    f,
                    "packet too short for sender prefix: needed {needed} bytes, got {got}"
                )
            },
            Self::Codec(err) => write!(f, "codec error: {err}"),
        }
    }
}

impl Error for LockstepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for LockstepError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

// #########
// # TESTS #
// #########
