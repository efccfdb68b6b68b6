//! # Cadence Lockstep
//!
//! Cadence Lockstep is a deterministic lockstep simulation engine for real-time
//! multiplayer games. Every participant in a session runs an identical,
//! fixed-step simulation and exchanges only timestamped player *commands*,
//! never game state. The engine keeps all peers in agreement by:
//!
//! - pacing the local simulation so it never advances past any peer's
//!   *validated horizon* (the time up to which that peer promises to issue no
//!   further commands),
//! - scheduling locally issued commands far enough in the future to reach
//!   every peer before they become due,
//! - bootstrapping late joiners from a host-supplied snapshot,
//! - recording every session into a replay stream that plays back the exact
//!   same frames, and
//! - cross-checking opaque per-frame consistency hashes to detect divergence.
//!
//! The engine is transport-agnostic: the host supplies a [`MeshSocket`] that
//! can deliver unreliable-sequenced and reliable messages to peers identified
//! by an opaque [`PeerId`], and feeds inbound packets back through
//! [`LockstepEngine::handle_packet`]. All engine calls happen on the host's
//! game-loop thread; no internal locking is performed.
//!
//! ```
//! use cadence_lockstep::{LockstepConfig, LockstepEngine};
//!
//! let mut engine = LockstepEngine::new(LockstepConfig::default());
//! engine.pause(false);
//!
//! // Host loop: ask the pacer how far to advance, then advance.
//! let delta = engine.adjust_tick(1.0 / 60.0, 1.0 / 60.0);
//! engine.tick(delta, 1.0 / 60.0);
//! engine.end_frame();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::LockstepEngine;
pub use error::LockstepError;
pub use event::{Event, LockstepEvents, Subscription};
pub use replay::{ReplaySink, ReplayWriteEvent};
pub use wire::codec::{CodecError, CodecResult};

pub mod clock;
mod command_list;
mod consistency;
pub mod engine;
pub mod error;
pub mod event;
mod pacer;
mod player;
pub mod replay;
mod roster;
mod samples;
mod sessions {
    pub mod networked;
    pub mod offline;
    pub mod replay_playback;
}
pub mod wire {
    //! Wire-level message types and the binary codec used for both network
    //! packets and replay records.
    pub mod codec;
    pub mod messages;
}

// #############
// # CONSTANTS #
// #############

/// Gameplay time: seconds since session start.
pub type GameTime = f64;

/// A span of gameplay time, in seconds.
pub type FrameDuration = f64;

/// Wall-clock milliseconds, as reported by the injected [`Clock`].
pub type WallMs = i64;

// #############
// #   TYPES   #
// #############

/// An opaque 16-byte identifier for a peer in the session mesh.
///
/// Peer ids are assigned by the surrounding session infrastructure; the
/// engine never inspects their content, it only compares them and writes them
/// as the sender prefix of outgoing packets.
///
/// # Examples
///
/// ```
/// use cadence_lockstep::PeerId;
///
/// let peer = PeerId::from_bytes([7; 16]);
/// assert!(!peer.is_nil());
/// assert!(PeerId::NIL.is_nil());
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PeerId([u8; 16]);

impl PeerId {
    /// The nil peer id (all zeroes), used where no peer applies: offline
    /// play and replay playback.
    pub const NIL: PeerId = PeerId([0; 16]);

    /// The size of a peer id in bytes, also the length of the sender prefix
    /// on every P2P packet.
    pub const LENGTH: usize = 16;

    /// Creates a peer id from its raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(bytes)
    }

    /// Returns the raw bytes of this peer id.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns `true` if this is the nil (all-zero) peer id.
    #[inline]
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Parses a peer id from a byte slice, returning `None` when the slice is
    /// shorter than [`PeerId::LENGTH`].
    #[must_use]
    pub fn try_parse(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 16] = bytes.get(..Self::LENGTH)?.try_into().ok()?;
        Some(PeerId(raw))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A small integer player id assigned by the session server.
///
/// Player ids order command execution within a frame and identify players in
/// consistency reports and replays. [`PlayerId::NONE`] (-1) marks "not yet
/// assigned".
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PlayerId(i32);

impl PlayerId {
    /// The unassigned player id (-1).
    pub const NONE: PlayerId = PlayerId(-1);

    /// Creates a player id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        PlayerId(id)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this id has been assigned (is non-negative).
    #[inline]
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for PlayerId {
    #[inline]
    fn from(value: i32) -> Self {
        PlayerId(value)
    }
}

/// A per-player command sequence number.
///
/// Commands from one player form a strictly increasing sequence starting at
/// 1; [`CommandId::NONE`] (0) means "no command".
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct CommandId(i32);

impl CommandId {
    /// The "no command" id (0).
    pub const NONE: CommandId = CommandId(0);

    /// The first command id a player issues.
    pub const FIRST: CommandId = CommandId(1);

    /// Creates a command id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        CommandId(id)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns the id following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        CommandId(self.0 + 1)
    }

    /// Returns `true` if this id refers to an actual command.
    #[inline]
    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single player command: an opaque payload scheduled for execution at a
/// fixed gameplay time.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Per-player sequence number, starting at 1.
    pub command_id: CommandId,
    /// The player who issued the command.
    pub player_id: PlayerId,
    /// The peer the command originated from ([`PeerId::NIL`] offline and in
    /// replay playback).
    pub peer_id: PeerId,
    /// Opaque command payload; the engine never interprets it.
    pub content: Vec<u8>,
    /// The gameplay time at which the command executes.
    pub execution_time: GameTime,
}

/// One simulation step, as delivered to `on_step` subscribers.
///
/// Commands are ordered by `(player_id, command_id)` ascending, identical on
/// every peer. Subscribers may fill in [`Frame::consistency_data`] with an
/// opaque hash of the post-step game state; it is exchanged with peers for
/// divergence detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Gameplay time at the end of this step.
    pub current_time: GameTime,
    /// Time up to which no further local commands will be scheduled.
    pub validated_time: GameTime,
    /// Commands that became due during this step.
    pub commands: Vec<Command>,
    /// Host-supplied consistency hash for this step (may be empty).
    pub consistency_data: Vec<u8>,
}

/// An opaque serialization of host game state at a given gameplay time.
///
/// Snapshots bootstrap late joiners and seed replay playback. The engine
/// never interprets `content`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// The gameplay time the snapshot was captured at.
    pub gameplay_time_seconds: GameTime,
    /// Opaque game state bytes.
    pub content: Vec<u8>,
}

/// Context for a host-driven rollback.
///
/// The engine itself never initiates rollback; the event hook exists for
/// hosts that implement snapshot-based restoration on top of the command
/// stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RollbackContext {
    /// The frame the host wants to return to.
    pub target_frame: i32,
    /// The frame that was actually restored.
    pub restored_frame: i32,
}

/// Per-frame consistency hashes collected from every player, delivered via
/// `on_consistency_check`.
///
/// The engine only lines the hashes up; comparing them, and deciding what to
/// do about a mismatch, is the host's responsibility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyCheckEvent {
    /// The gameplay time the hashes belong to.
    pub gameplay_time: GameTime,
    /// Consistency hash per player id.
    pub hashes: std::collections::BTreeMap<PlayerId, Vec<u8>>,
}

/// The gameplay-progress state of the engine, emitted on transitions via
/// `on_pause_state_changed`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PauseState {
    /// Simulation time is advancing.
    Running,
    /// Not paused, but blocked: typically waiting on a peer's validated
    /// horizon.
    Waiting,
    /// Explicitly paused by the host.
    Paused,
}

/// Whether the current session records a replay or plays one back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReplayMode {
    /// Offline and networked sessions record.
    Recording,
    /// A session created by [`LockstepEngine::load_replay`] plays back.
    Playing,
}

/// A value-copied view of one participant, as returned by
/// [`LockstepEngine::players`].
#[derive(Debug, Clone, PartialEq)]
pub struct LockstepPlayer {
    /// The peer this player plays on.
    pub peer_id: PeerId,
    /// The server-assigned player id.
    pub player_id: PlayerId,
    /// Average observed one-way latency to this peer, in milliseconds.
    pub latency_ms: u32,
    /// `true` for the player on this device.
    pub is_local: bool,
    /// The gameplay time up to which this player has validated: no command
    /// from them will execute at or before this time.
    pub synchronized_until: GameTime,
    /// The newest local command this peer has confirmed receiving
    /// ([`CommandId::NONE`] for the local player).
    pub last_command_id: CommandId,
    /// The simulation advance this player last reported.
    pub target_delta_seconds: FrameDuration,
}

/// Tunable timing parameters of the engine.
///
/// The defaults match a 30 Hz simulation with command delays between 100 ms
/// and 600 ms.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LockstepConfig {
    /// Minimum delay between pushing a command and its execution, in seconds.
    pub min_delay_seconds: FrameDuration,
    /// Maximum delay between pushing a command and its execution, in seconds.
    pub max_delay_seconds: FrameDuration,
    /// The fixed simulation step, in seconds.
    pub fixed_delta_time_seconds: FrameDuration,
    /// Safety margin added on top of the observed peer latency when
    /// scheduling commands, in seconds.
    pub delay_margin_seconds: FrameDuration,
    /// Minimum gameplay time between pacing pauses when slowing down to
    /// re-align with a lagging peer. Prevents micro-pausing every frame.
    pub min_pause_delay_on_slow_adjust: FrameDuration,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            min_delay_seconds: 0.1,
            max_delay_seconds: 0.6,
            fixed_delta_time_seconds: 1.0 / 30.0,
            delay_margin_seconds: 0.066_666,
            min_pause_delay_on_slow_adjust: 1.0,
        }
    }
}

// #############
// # TRANSPORT #
// #############

/// Delivery guarantees the engine requests from the transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// May be dropped; a newer message supersedes an older in-flight one.
    /// Used for per-tick frame updates.
    UnreliableSequenced,
    /// Must arrive. Used for snapshot requests and responses.
    Reliable,
}

/// An encoded message ready to be handed to the transport.
///
/// The payload already carries the 16-byte sender peer-id prefix described in
/// the wire format; the transport only moves bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    /// The literal route name, e.g. `"lockstep.frame"`.
    pub route: &'static str,
    /// Requested delivery guarantee.
    pub reliability: Reliability,
    /// Encoded message bytes, sender prefix included.
    pub payload: Vec<u8>,
}

/// The peer-to-peer transport the engine sends through.
///
/// Implement this over whatever mesh your game uses. Outbound only: inbound
/// packets are pushed into the engine via [`LockstepEngine::handle_packet`]
/// from the same thread that drives the game loop.
pub trait MeshSocket {
    /// Sends `packet` to the peer identified by `peer`.
    fn send_to(&mut self, peer: &PeerId, packet: OutboundPacket);
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod lib_tests {
    use super::*;

    #[test]
    fn peer_id_roundtrip_and_nil() {
        let peer = PeerId::from_bytes([0xAB; 16]);
        assert_eq!(peer.as_bytes(), &[0xAB; 16]);
        assert!(!peer.is_nil());
        assert!(PeerId::NIL.is_nil());
        assert_eq!(PeerId::default(), PeerId::NIL);
    }

    #[test]
    fn peer_id_try_parse_needs_sixteen_bytes() {
        assert!(PeerId::try_parse(&[0; 15]).is_none());
        let mut bytes = vec![1u8; 16];
        bytes.extend_from_slice(&[9, 9, 9]); // trailing payload is ignored
        assert_eq!(PeerId::try_parse(&bytes), Some(PeerId::from_bytes([1; 16])));
    }

    #[test]
    fn peer_id_display_is_lowercase_hex() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xDE;
        bytes[15] = 0x0F;
        let text = PeerId::from_bytes(bytes).to_string();
        assert_eq!(text.len(), 32);
        assert!(text.starts_with("de"));
        assert!(text.ends_with("0f"));
    }

    #[test]
    fn player_id_assignment() {
        assert!(!PlayerId::NONE.is_assigned());
        assert!(PlayerId::new(0).is_assigned());
        assert_eq!(PlayerId::from(3).as_i32(), 3);
    }

    #[test]
    fn command_id_sequence() {
        assert!(!CommandId::NONE.is_some());
        assert_eq!(CommandId::NONE.next(), CommandId::FIRST);
        assert_eq!(CommandId::FIRST.next().as_i32(), 2);
        assert!(CommandId::FIRST.is_some());
    }

    #[test]
    fn config_defaults_match_documented_values() {
        let config = LockstepConfig::default();
        assert_eq!(config.min_delay_seconds, 0.1);
        assert_eq!(config.max_delay_seconds, 0.6);
        assert!((config.fixed_delta_time_seconds - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(config.min_pause_delay_on_slow_adjust, 1.0);
    }

    #[test]
    fn frame_default_is_empty() {
        let frame = Frame::default();
        assert_eq!(frame.current_time, 0.0);
        assert!(frame.commands.is_empty());
        assert!(frame.consistency_data.is_empty());
    }
}
