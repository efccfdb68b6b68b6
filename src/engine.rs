//! The engine facade and its mode state machine.
//!
//! A [`LockstepEngine`] is always in exactly one mode:
//!
//! - **Offline**: created this way. Single local player, everything
//!   recorded.
//! - **Networked**: entered via [`LockstepEngine::attach_session`] when a
//!   game session is joined.
//! - **Replay playback**: entered via [`LockstepEngine::load_replay`].
//!
//! Each transition discards the previous session wholesale (commands, player
//! state, pacing) and constructs a fresh one. Event subscriptions live on the
//! facade, not the session, so they survive every transition.

use tracing::debug;

use crate::clock::Clock;
use crate::event::LockstepEvents;
use crate::replay::{null_sink, ReplaySink, SharedSink};
use crate::sessions::networked::NetworkedSession;
use crate::sessions::offline::OfflineSession;
use crate::sessions::replay_playback::ReplaySession;
use crate::wire::messages::InboundMessage;
use crate::{
    CommandId, FrameDuration, GameTime, LockstepConfig, LockstepError, LockstepPlayer,
    MeshSocket, PeerId, PlayerId, ReplayMode,
};

/// Header fields of a replay, as returned by
/// [`LockstepEngine::try_get_replay_initial_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayInitialData {
    /// Opaque host data needed to set the game up.
    pub initialization_data: Vec<u8>,
    /// Build identifier of the recording game.
    pub build_id: String,
    /// The game session the replay was recorded in.
    pub game_id: String,
}

#[derive(Debug)]
enum Service {
    Offline(OfflineSession),
    Networked(Box<NetworkedSession>),
    Replay(Box<ReplaySession>),
}

/// The deterministic lockstep engine.
///
/// Drive it from the host game loop:
///
/// ```
/// use cadence_lockstep::{LockstepConfig, LockstepEngine};
///
/// let mut engine = LockstepEngine::new(LockstepConfig::default());
/// engine.pause(false);
/// loop {
///     let delta = engine.adjust_tick(1.0 / 60.0, 1.0 / 60.0);
///     engine.tick(delta, 1.0 / 60.0);
///     // ... render ...
///     engine.end_frame();
///     # break;
/// }
/// ```
pub struct LockstepEngine {
    config: LockstepConfig,
    events: LockstepEvents,
    sink: SharedSink,
    service: Service,
}

impl std::fmt::Debug for LockstepEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockstepEngine")
            .field("config", &self.config)
            .field("service", &self.service)
            .finish()
    }
}

impl LockstepEngine {
    /// Creates an engine in offline mode.
    #[must_use]
    pub fn new(config: LockstepConfig) -> Self {
        let sink = null_sink();
        Self {
            config,
            events: LockstepEvents::default(),
            sink: sink.clone(),
            service: Service::Offline(OfflineSession::new(config, sink)),
        }
    }

    /// The event topics. Subscribe here; subscriptions survive mode
    /// transitions.
    pub fn events_mut(&mut self) -> &mut LockstepEvents {
        &mut self.events
    }

    /// Installs the sink replay bytes are streamed into. Takes effect for
    /// the current session immediately.
    pub fn set_replay_writer(&mut self, sink: ReplaySink) {
        *self.sink.borrow_mut() = sink;
    }

    // ####################
    // # MODE TRANSITIONS #
    // ####################

    /// Enters networked mode for a joined game session. Any previous session
    /// state is discarded.
    pub fn attach_session(
        &mut self,
        local_peer: PeerId,
        game_id: String,
        socket: Box<dyn MeshSocket>,
        clock: Box<dyn Clock>,
    ) {
        self.service = Service::Networked(Box::new(NetworkedSession::new(
            self.config,
            local_peer,
            game_id,
            socket,
            clock,
            self.sink.clone(),
        )));
    }

    /// Leaves networked or playback mode and returns to a fresh offline
    /// session. Called on scene disconnect.
    pub fn detach_session(&mut self) {
        self.service = Service::Offline(OfflineSession::new(self.config, self.sink.clone()));
    }

    /// Resets the engine to a fresh offline session.
    ///
    /// Networked sessions reset implicitly when a new game session is
    /// joined; offline mode resets only through this call.
    pub fn reset(&mut self) {
        self.detach_session();
    }

    /// Enters replay playback over `bytes`. Playback starts paused.
    pub fn load_replay(&mut self, bytes: &[u8]) -> Result<(), LockstepError> {
        let session = ReplaySession::new(self.config, bytes)?;
        self.service = Service::Replay(Box::new(session));
        Ok(())
    }

    // #############
    // # GAME LOOP #
    // #############

    /// Pacer decision: how much simulation time `tick` may advance this
    /// host-loop invocation.
    pub fn adjust_tick(
        &mut self,
        target_delta: FrameDuration,
        _real_delta: FrameDuration,
    ) -> FrameDuration {
        match &mut self.service {
            Service::Offline(session) => session.adjust_tick(target_delta),
            Service::Networked(session) => session.adjust_tick(target_delta),
            Service::Replay(session) => session.adjust_tick(target_delta),
        }
    }

    /// Advances the simulation by `delta` (the value `adjust_tick`
    /// returned), draining due commands and emitting `on_step`.
    pub fn tick(&mut self, delta: FrameDuration, _real_delta: FrameDuration) {
        match &mut self.service {
            Service::Offline(session) => session.tick(delta, &mut self.events),
            Service::Networked(session) => session.tick(delta, &mut self.events),
            Service::Replay(session) => session.tick(delta, &mut self.events),
        }
    }

    /// Signals that the host finished the frame; emits `on_end_frame`.
    pub fn end_frame(&mut self) {
        match &mut self.service {
            Service::Offline(session) => session.end_frame(&mut self.events),
            Service::Networked(session) => session.end_frame(&mut self.events),
            Service::Replay(session) => session.end_frame(&mut self.events),
        }
    }

    /// Schedules an opaque command from the local player, returning its
    /// per-player id.
    pub fn push_command(&mut self, payload: &[u8]) -> Result<CommandId, LockstepError> {
        match &mut self.service {
            Service::Offline(session) => session.push_command(payload, &mut self.events),
            Service::Networked(session) => session.push_command(payload),
            Service::Replay(session) => session.push_command(),
        }
    }

    // ###########
    // # INBOUND #
    // ###########

    /// Feeds a raw inbound packet into the engine.
    ///
    /// `route` is the literal route name the transport delivered on. Packets
    /// arriving while no networked session is active (e.g. a snapshot answer
    /// racing a mode transition) decode but are dropped silently.
    pub fn handle_packet(&mut self, route: &str, payload: &[u8]) -> Result<(), LockstepError> {
        let message = InboundMessage::decode(route, payload)?;
        match &mut self.service {
            Service::Networked(session) => session.handle(message, &mut self.events),
            _ => debug!("dropping {route} packet: no networked session active"),
        }
        Ok(())
    }

    // #############
    // # OBSERVERS #
    // #############

    /// Gameplay time at the end of the last executed step.
    #[must_use]
    pub fn current_time(&self) -> GameTime {
        match &self.service {
            Service::Offline(session) => session.current_time(),
            Service::Networked(session) => session.current_time(),
            Service::Replay(session) => session.current_time(),
        }
    }

    /// The slowest peer's estimated present gameplay time (one step ahead of
    /// `current_time` when no peers exist).
    #[must_use]
    pub fn target_time(&self) -> GameTime {
        match &self.service {
            Service::Offline(session) => session.target_time(),
            Service::Networked(session) => session.target_time(),
            Service::Replay(session) => session.target_time(),
        }
    }

    /// The execution time the next pushed command would be scheduled at.
    #[must_use]
    pub fn command_time(&self) -> GameTime {
        match &self.service {
            Service::Offline(session) => session.command_time(),
            Service::Networked(session) => session.command_time(),
            Service::Replay(session) => session.command_time(),
        }
    }

    /// The current command delay derived from peer latency, in seconds.
    #[must_use]
    pub fn latency(&self) -> FrameDuration {
        match &self.service {
            Service::Offline(session) => session.latency(),
            Service::Networked(session) => session.latency(),
            Service::Replay(_) => 0.0,
        }
    }

    /// Id of the local player's newest executed command.
    #[must_use]
    pub fn last_executed_command(&self) -> CommandId {
        match &self.service {
            Service::Offline(session) => session.last_executed_command(),
            Service::Networked(session) => session.last_executed_command(),
            Service::Replay(_) => CommandId::NONE,
        }
    }

    /// The local player's id.
    #[must_use]
    pub fn current_player_id(&self) -> PlayerId {
        match &self.service {
            Service::Offline(session) => session.current_player_id(),
            Service::Networked(session) => session.current_player_id(),
            Service::Replay(session) => session.current_player_id(),
        }
    }

    /// Whether the engine is explicitly paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        match &self.service {
            Service::Offline(session) => session.is_paused(),
            Service::Networked(session) => session.is_paused(),
            Service::Replay(session) => session.is_paused(),
        }
    }

    /// Pauses or resumes the engine. The first unpause starts the replay
    /// writer (recording modes).
    pub fn pause(&mut self, pause: bool) {
        match &mut self.service {
            Service::Offline(session) => session.pause(pause),
            Service::Networked(session) => session.pause(pause),
            Service::Replay(session) => session.pause(pause),
        }
    }

    /// Value-copied list of all participants.
    #[must_use]
    pub fn players(&self) -> Vec<LockstepPlayer> {
        match &self.service {
            Service::Offline(session) => session.players(),
            Service::Networked(session) => session.players(),
            Service::Replay(session) => session.players(),
        }
    }

    /// Whether this session records or plays back.
    #[must_use]
    pub fn replay_mode(&self) -> ReplayMode {
        match &self.service {
            Service::Replay(_) => ReplayMode::Playing,
            _ => ReplayMode::Recording,
        }
    }

    /// Playback only: `true` once the record stream is exhausted.
    #[must_use]
    pub fn is_replay_finished(&self) -> bool {
        match &self.service {
            Service::Replay(session) => session.is_finished(),
            _ => false,
        }
    }

    /// Sets the replay header's initialization payload and build id. Fails
    /// in playback mode or once the header has been written out.
    pub fn try_set_replay_initial_data(&mut self, data: &[u8], build_id: &str) -> bool {
        match &mut self.service {
            Service::Offline(session) => session.try_set_replay_initial_data(data, build_id),
            Service::Networked(session) => session.try_set_replay_initial_data(data, build_id),
            Service::Replay(_) => false,
        }
    }

    /// Reads the replay header fields of the current session.
    #[must_use]
    pub fn try_get_replay_initial_data(&self) -> Option<ReplayInitialData> {
        let (initialization_data, build_id, game_id) = match &self.service {
            Service::Offline(session) => session.replay_initial_data(),
            Service::Networked(session) => session.replay_initial_data(),
            Service::Replay(session) => session.replay_initial_data(),
        };
        Some(ReplayInitialData {
            initialization_data,
            build_id,
            game_id,
        })
    }
}

// #########
// # TESTS #
// #########
