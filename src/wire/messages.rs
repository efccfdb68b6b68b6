//! Message types exchanged over the session mesh and the session-control
//! channel.
//!
//! Route names are literal strings: the four `lockstep.*` routes flow peer to
//! peer (prefixed with the 16-byte sender id), the two `lockstepPlayers.*`
//! routes come from the session server without a prefix.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::error::LockstepError;
use crate::wire::codec;
use crate::{CommandId, GameTime, OutboundPacket, PeerId, PlayerId, Reliability, WallMs};

/// Route for per-tick frame updates (unreliable-sequenced).
pub const FRAME_ROUTE: &str = "lockstep.frame";
/// Auxiliary route for reliable command batches.
pub const COMMAND_ROUTE: &str = "lockstep.command";
/// Route a late joiner uses to ask a donor peer for a snapshot (reliable).
pub const REQUEST_SNAPSHOT_ROUTE: &str = "lockstep.requestSnapshot";
/// Route carrying a snapshot back to the requester (reliable).
pub const INSTALL_SNAPSHOT_ROUTE: &str = "lockstep.installSnapshot";
/// Server route broadcasting ordered roster updates.
pub const PLAYERS_UPDATE_ROUTE: &str = "lockstepPlayers.update";
/// Server route installing a full roster snapshot.
pub const PLAYERS_INSTALL_SNAPSHOT_ROUTE: &str = "lockstepPlayers.installSnapshot";

/// One command inside a [`FrameDto`] batch or stored in a peer's command log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDto {
    /// Per-player sequence number.
    pub command_id: CommandId,
    /// Scheduled execution time.
    pub gameplay_time_seconds: GameTime,
    /// Opaque payload.
    pub content: Vec<u8>,
}

/// Per-tick status update sent to every remote peer.
///
/// Carries the sender's clocks and horizons, acknowledges what the sender has
/// received from the addressee, and piggybacks any locally originated
/// commands the addressee has not yet confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDto {
    /// Sender wall-clock milliseconds at send time (for latency sampling).
    pub sent_on: WallMs,
    /// Sender's current gameplay time.
    pub gameplay_time_seconds: GameTime,
    /// Sender promises to schedule no command at or before this time.
    pub validated_gameplay_time_seconds: GameTime,
    /// The sender's last simulation advance.
    pub delta_time_per_frame_seconds: GameTime,
    /// First command id the sender holds *from the addressee*.
    pub first_command_received: CommandId,
    /// Last command id the sender holds *from the addressee*: the ack the
    /// addressee rewinds its send cursor to.
    pub last_command_received: CommandId,
    /// The sender's consistency hash for its current frame.
    pub consistency_data: Vec<u8>,
    /// Locally originated commands not yet confirmed by the addressee.
    pub commands: SmallVec<[CommandDto; 8]>,
}

/// A snapshot of host game state, sent reliably to a late joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDto {
    /// The gameplay time the snapshot captures.
    pub gameplay_time_seconds: GameTime,
    /// Opaque host game state.
    pub content: Vec<u8>,
}

/// Kind of roster change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayersUpdateKind {
    /// A player joined the session.
    Add,
    /// A player left the session.
    Remove,
}

/// One server-ordered roster change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayersUpdateCommand {
    /// Add or remove.
    pub command_type: PlayersUpdateKind,
    /// Server-assigned total order; updates apply strictly in sequence.
    pub update_id: i32,
    /// The player concerned.
    pub player_id: PlayerId,
    /// The session peer the player plays on.
    pub player_session_id: PeerId,
}

/// A full roster snapshot from the server; resets the player table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayersSnapshotInstallCommand {
    /// The roster sequence number this snapshot corresponds to.
    pub update_id: i32,
    /// The local player's id.
    pub current_player_id: PlayerId,
    /// All players, keyed by player id.
    pub players: BTreeMap<PlayerId, PeerId>,
}

/// A decoded inbound message, dispatched by route name.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A frame update from a peer.
    Frame(PeerId, FrameDto),
    /// A reliable command batch from a peer (auxiliary route).
    Commands(PeerId, Vec<CommandDto>),
    /// A peer asks us for a snapshot.
    SnapshotRequest(PeerId),
    /// A donor peer answers our snapshot request.
    SnapshotInstall(PeerId, SnapshotDto),
    /// A roster change from the server.
    RosterUpdate(PlayersUpdateCommand),
    /// A roster snapshot from the server.
    RosterSnapshot(PlayersSnapshotInstallCommand),
}

impl InboundMessage {
    /// Decodes a raw packet received on `route`.
    ///
    /// P2P routes parse the 16-byte sender prefix first, then the body;
    /// server routes decode the body directly.
    pub fn decode(route: &str, payload: &[u8]) -> Result<Self, LockstepError> {
        match route {
            FRAME_ROUTE => {
                let (sender, body) = codec::split_sender(payload)?;
                Ok(Self::Frame(sender, codec::decode_value(body)?))
            },
            COMMAND_ROUTE => {
                let (sender, body) = codec::split_sender(payload)?;
                Ok(Self::Commands(sender, codec::decode_value(body)?))
            },
            REQUEST_SNAPSHOT_ROUTE => {
                let (sender, _) = codec::split_sender(payload)?;
                Ok(Self::SnapshotRequest(sender))
            },
            INSTALL_SNAPSHOT_ROUTE => {
                let (sender, body) = codec::split_sender(payload)?;
                Ok(Self::SnapshotInstall(sender, codec::decode_value(body)?))
            },
            PLAYERS_UPDATE_ROUTE => Ok(Self::RosterUpdate(codec::decode_value(payload)?)),
            PLAYERS_INSTALL_SNAPSHOT_ROUTE => {
                Ok(Self::RosterSnapshot(codec::decode_value(payload)?))
            },
            other => Err(LockstepError::UnknownRoute {
                route: other.to_owned(),
            }),
        }
    }
}

/// Builds the outbound packet for a [`FrameDto`].
pub fn frame_packet(sender: &PeerId, frame: &FrameDto) -> Result<OutboundPacket, LockstepError> {
    Ok(OutboundPacket {
        route: FRAME_ROUTE,
        reliability: Reliability::UnreliableSequenced,
        payload: codec::encode_prefixed(sender, frame)?,
    })
}

/// Builds the outbound packet for a reliable command batch.
pub fn command_packet(
    sender: &PeerId,
    commands: &[CommandDto],
) -> Result<OutboundPacket, LockstepError> {
    Ok(OutboundPacket {
        route: COMMAND_ROUTE,
        reliability: Reliability::Reliable,
        payload: codec::encode_prefixed(sender, &commands)?,
    })
}

/// Builds the outbound packet asking a donor peer for a snapshot.
pub fn request_snapshot_packet(sender: &PeerId) -> OutboundPacket {
    OutboundPacket {
        route: REQUEST_SNAPSHOT_ROUTE,
        reliability: Reliability::Reliable,
        payload: sender.as_bytes().to_vec(),
    }
}

/// Builds the outbound packet carrying a snapshot to a requester.
pub fn install_snapshot_packet(
    sender: &PeerId,
    snapshot: &SnapshotDto,
) -> Result<OutboundPacket, LockstepError> {
    Ok(OutboundPacket {
        route: INSTALL_SNAPSHOT_ROUTE,
        reliability: Reliability::Reliable,
        payload: codec::encode_prefixed(sender, snapshot)?,
    })
}

// #########
// # TESTS #
// #########
