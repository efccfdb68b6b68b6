//! Mesh-attached lockstep session.
//!
//! The full protocol lives here: per-tick frame updates to every remote peer,
//! command batching with ack-driven rewind, the late-join snapshot handshake,
//! roster sequencing, command drain into frames, and the consistency sweep.
//!
//! Everything runs on the host game-loop thread. Inbound transport callbacks
//! must be dispatched on that same thread; the session never locks.

use smallvec::SmallVec;
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::command_list::CommandLog;
use crate::consistency::ConsistencyChecker;
use crate::event::LockstepEvents;
use crate::pacer::{Pacer, PacingInputs};
use crate::player::{PlayerState, PlayerTable};
use crate::replay::{ReplayWriter, SharedSink};
use crate::roster::RosterSequencer;
use crate::wire::messages::{
    self, CommandDto, FrameDto, InboundMessage, PlayersSnapshotInstallCommand,
    PlayersUpdateCommand, PlayersUpdateKind, SnapshotDto,
};
use crate::{
    Command, CommandId, Frame, FrameDuration, GameTime, LockstepConfig, LockstepError,
    LockstepPlayer, MeshSocket, PauseState, PeerId, PlayerId, Snapshot,
};

/// Lockstep session connected to a peer mesh.
pub(crate) struct NetworkedSession {
    config: LockstepConfig,
    clock: Box<dyn Clock>,
    socket: Box<dyn MeshSocket>,
    local_peer: PeerId,
    players: PlayerTable,
    /// Commands issued by the local player. Kept off the player table so the
    /// per-remote ack cursors (indices into this log) never alias it.
    local_commands: CommandLog,
    roster: RosterSequencer,
    checker: ConsistencyChecker,
    pacer: Pacer,
    writer: ReplayWriter,
    current_frame: Frame,
    current_player_id: PlayerId,
    command_time: GameTime,
    latency: FrameDuration,
    last_delta: FrameDuration,
    paused: bool,
    progressing: bool,
    initialized: bool,
    initializing: bool,
    started: bool,
}

impl std::fmt::Debug for NetworkedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedSession")
            .field("local_peer", &self.local_peer)
            .field("current_player_id", &self.current_player_id)
            .field("players", &self.players.len())
            .field("current_time", &self.current_frame.current_time)
            .field("command_time", &self.command_time)
            .field("initialized", &self.initialized)
            .field("paused", &self.paused)
            .finish()
    }
}

impl NetworkedSession {
    pub(crate) fn new(
        config: LockstepConfig,
        local_peer: PeerId,
        game_id: String,
        socket: Box<dyn MeshSocket>,
        clock: Box<dyn Clock>,
        sink: SharedSink,
    ) -> Self {
        Self {
            config,
            clock,
            socket,
            local_peer,
            players: PlayerTable::new(),
            local_commands: CommandLog::new(),
            roster: RosterSequencer::new(),
            checker: ConsistencyChecker::new(),
            pacer: Pacer::new(),
            writer: ReplayWriter::new(game_id, PlayerId::NONE, sink),
            current_frame: Frame::default(),
            current_player_id: PlayerId::NONE,
            command_time: 0.0,
            latency: 0.0,
            last_delta: 0.0,
            paused: true,
            progressing: false,
            initialized: false,
            initializing: false,
            started: false,
        }
    }

    // ##########
    // # PACING #
    // ##########

    pub(crate) fn adjust_tick(&mut self, target_delta: FrameDuration) -> FrameDuration {
        if !self.initialized {
            return 0.0;
        }
        let inputs = PacingInputs {
            paused: self.paused,
            current_time: self.current_frame.current_time,
            target_time: self.target_time(),
            synchronized_until: self.synchronized_until(),
        };
        let granted = self.pacer.adjust(target_delta, &self.config, inputs);
        if granted > 0.0 {
            self.update_latency_and_command_time();
        }
        granted
    }

    /// The minimum validated horizon over all remote peers: the engine never
    /// advances past it.
    fn synchronized_until(&self) -> GameTime {
        self.players
            .remotes()
            .map(PlayerState::synchronized_until)
            .fold(f64::INFINITY, f64::min)
    }

    /// The slowest remote peer's gameplay time, extrapolated by the wall
    /// time elapsed since it reported.
    pub(crate) fn target_time(&self) -> GameTime {
        let now = self.clock.now_ms();
        let estimate = self
            .players
            .remotes()
            .map(|state| {
                state.gameplay_time_seconds + (now - state.sent_on) as GameTime / 1000.0
            })
            .fold(f64::INFINITY, f64::min);
        if estimate.is_finite() {
            estimate
        } else {
            self.current_frame.current_time + self.config.fixed_delta_time_seconds
        }
    }

    /// Refreshes the command delay from observed peer latency and floats the
    /// command time forward over every peer's estimated present.
    fn update_latency_and_command_time(&mut self) {
        let mut max_latency_ms = 0u32;
        let mut highest = self.current_frame.current_time;
        for state in self.players.remotes() {
            let peer_ms = state.latency.max();
            if peer_ms > max_latency_ms {
                max_latency_ms = peer_ms;
            }
            let estimated =
                state.gameplay_time_seconds + GameTime::from(peer_ms) / 1000.0;
            if estimated > highest {
                highest = estimated;
            }
        }
        self.latency = (GameTime::from(max_latency_ms) / 1000.0
            + self.config.delay_margin_seconds)
            .clamp(self.config.min_delay_seconds, self.config.max_delay_seconds);

        let candidate = highest + self.latency;
        if candidate > self.command_time {
            self.command_time = candidate;
        }
    }

    // ########
    // # TICK #
    // ########

    pub(crate) fn tick(&mut self, delta: FrameDuration, events: &mut LockstepEvents) {
        self.process_roster(events);
        if self.players.local().is_none() {
            return;
        }

        self.synchronize_state();

        if !self.initialized && self.can_initialize() {
            self.try_start_initialize(events);
        }
        if !self.initialized {
            return;
        }

        if delta == 0.0 {
            self.pacer.note_stall(self.current_frame.current_time);
            self.emit_pause_transition(false, events);
            return;
        }
        self.last_delta = delta;

        if !self.started {
            self.started = true;
            events.on_start.emit(&mut ());
        }

        let previous_time = self.current_frame.current_time;
        let mut frame = Frame {
            current_time: previous_time + delta,
            validated_time: self.command_time,
            commands: Vec::new(),
            consistency_data: Vec::new(),
        };

        for state in self.players.iter_mut() {
            let player_id = state.player_id;
            let peer_id = state.peer_id;
            let log = if state.is_local {
                &mut self.local_commands
            } else {
                &mut state.commands
            };
            while let Some(index) = log.next_unexecuted() {
                let pending = log.command(index);
                if pending.gameplay_time_seconds > frame.current_time {
                    break;
                }
                if pending.gameplay_time_seconds > previous_time {
                    frame.commands.push(Command {
                        command_id: pending.command_id,
                        player_id,
                        peer_id,
                        content: pending.content.clone(),
                        execution_time: pending.gameplay_time_seconds,
                    });
                    self.writer.write_execute_command_record(
                        frame.current_time,
                        player_id,
                        pending.command_id,
                    );
                } else {
                    warn!(
                        "desync: skipping command {}/{} scheduled at {} behind frame {}",
                        player_id,
                        pending.command_id,
                        pending.gameplay_time_seconds,
                        previous_time
                    );
                }
                log.mark_executed(index);
            }
        }

        self.writer.write_frame_record(frame.current_time);

        self.emit_pause_transition(true, events);
        events.on_step.emit(&mut frame);

        // The host filled in the consistency hash (if any) during on_step;
        // line the local report up with the remote ones.
        if let Some(local) = self.players.iter_mut().find(|state| state.is_local) {
            local
                .consistency
                .push(frame.current_time, frame.consistency_data.clone());
        }

        self.current_frame = frame;
    }

    pub(crate) fn end_frame(&mut self, events: &mut LockstepEvents) {
        events.on_end_frame.emit(&mut self.current_frame);
    }

    fn emit_pause_transition(&mut self, advancing: bool, events: &mut LockstepEvents) {
        if advancing != self.progressing {
            self.progressing = advancing;
            let mut state = if self.paused {
                PauseState::Paused
            } else if advancing {
                PauseState::Running
            } else {
                PauseState::Waiting
            };
            events.on_pause_state_changed.emit(&mut state);
        }
    }

    // #################
    // # SYNC PROTOCOL #
    // #################

    /// Sends the per-tick frame update to every remote peer. Runs even while
    /// blocked so stalled peers keep exchanging validated horizons.
    fn synchronize_state(&mut self) {
        self.current_frame.validated_time = self.command_time;
        let now = self.clock.now_ms();

        for state in self.players.iter_mut() {
            if state.is_local {
                state.validated_gameplay_time_seconds = self.command_time;
                continue;
            }

            let mut dto = FrameDto {
                sent_on: now,
                gameplay_time_seconds: self.current_frame.current_time,
                validated_gameplay_time_seconds: self.current_frame.validated_time,
                delta_time_per_frame_seconds: self.last_delta,
                first_command_received: state.commands.first_id(),
                last_command_received: state.commands.last_id(),
                consistency_data: self.current_frame.consistency_data.clone(),
                commands: SmallVec::new(),
            };

            // Command batches are rate-limited to twice the average latency;
            // a push resets `last_command_update_on` to force the next tick.
            if now - state.last_command_update_on
                > i64::from(state.latency.average()) * 2
            {
                let mut cursor = match state.last_sent_command {
                    None => self.local_commands.first_index(),
                    Some(acked) => self.local_commands.next_of(acked),
                };
                while let Some(index) = cursor {
                    dto.commands.push(self.local_commands.command(index).clone());
                    cursor = self.local_commands.next_of(index);
                }
                state.last_command_update_on = now;
            }

            match messages::frame_packet(&self.local_peer, &dto) {
                Ok(packet) => self.socket.send_to(&state.peer_id, packet),
                Err(err) => error!("failed to encode frame update: {err}"),
            }
        }
    }

    // ###########
    // # INBOUND #
    // ###########

    pub(crate) fn handle(&mut self, message: InboundMessage, events: &mut LockstepEvents) {
        match message {
            InboundMessage::Frame(peer, frame) => self.handle_frame(&peer, frame, events),
            InboundMessage::Commands(peer, commands) => self.handle_commands(&peer, commands),
            InboundMessage::SnapshotRequest(peer) => self.handle_snapshot_request(&peer, events),
            InboundMessage::SnapshotInstall(peer, snapshot) => {
                self.handle_snapshot_install(&peer, snapshot, events)
            },
            InboundMessage::RosterUpdate(command) => self.roster.buffer(command),
            InboundMessage::RosterSnapshot(command) => self.handle_roster_snapshot(command),
        }
    }

    fn handle_frame(&mut self, peer: &PeerId, dto: FrameDto, events: &mut LockstepEvents) {
        let now = self.clock.now_ms();
        let current_time = self.current_frame.current_time;

        let Some(state) = self.players.find_by_peer_mut(peer) else {
            debug!("frame update from unknown peer {peer}");
            return;
        };

        state.received_on = now;
        let sample = (state.received_on - dto.sent_on).clamp(0, i64::from(u32::MAX)) as u32;
        state.latency.push(sample);

        // Unreliable-sequenced may still reorder across routes; anything
        // older than the newest observed update is superseded.
        if dto.gameplay_time_seconds < state.gameplay_time_seconds {
            trace!(
                "dropping stale frame update from player {} ({} < {})",
                state.player_id,
                dto.gameplay_time_seconds,
                state.gameplay_time_seconds
            );
            return;
        }

        state.sent_on = dto.sent_on;
        state.delta_time_per_frame_seconds = dto.delta_time_per_frame_seconds;
        state.validated_gameplay_time_seconds = dto.validated_gameplay_time_seconds;
        state.gameplay_time_seconds = dto.gameplay_time_seconds;
        state
            .consistency
            .push(dto.gameplay_time_seconds, dto.consistency_data.clone());

        let player_id = state.player_id;
        for command in dto.commands {
            if command.gameplay_time_seconds <= current_time {
                error!(
                    "desync: received command {}/{} for time {} but current time is {} \
                     (validated {})",
                    player_id,
                    command.command_id,
                    command.gameplay_time_seconds,
                    current_time,
                    dto.validated_gameplay_time_seconds
                );
            }
            let execution_time = command.gameplay_time_seconds;
            let command_id = command.command_id;
            let content = command.content.clone();
            if state.commands.insert(command) {
                self.writer.write_add_command_record(
                    current_time,
                    execution_time,
                    player_id,
                    command_id,
                    &content,
                );
            }
        }

        // Rewind our send cursor to what the peer actually acknowledged.
        let mut acked = state.last_sent_command;
        if acked.is_none() {
            if let Some(first) = self.local_commands.first_index() {
                if self.local_commands.id_at(first) <= dto.last_command_received {
                    acked = Some(first);
                }
            }
        }
        while let Some(index) = acked {
            if self.local_commands.id_at(index) < dto.last_command_received {
                match self.local_commands.next_of(index) {
                    Some(next) => acked = Some(next),
                    None => break,
                }
            } else {
                break;
            }
        }
        state.last_sent_command = acked;
        state.is_synchronized = true;

        let reports = self
            .checker
            .sweep(&mut self.players, self.config.fixed_delta_time_seconds);
        for mut report in reports {
            events.on_consistency_check.emit(&mut report);
        }
    }

    fn handle_commands(&mut self, peer: &PeerId, commands: Vec<CommandDto>) {
        let Some(state) = self.players.find_by_peer_mut(peer) else {
            warn!("received command batch but no corresponding player found");
            return;
        };
        for command in commands {
            debug!(
                "adding command {}/{} for time {}",
                state.player_id, command.command_id, command.gameplay_time_seconds
            );
            state.commands.insert(command);
        }
    }

    // ######################
    // # SNAPSHOT BOOTSTRAP #
    // ######################

    fn can_initialize(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .iter()
                .all(|state| state.is_synchronized || state.is_local)
    }

    fn try_start_initialize(&mut self, events: &mut LockstepEvents) {
        if self.initializing || self.initialized {
            return;
        }
        self.initializing = true;

        // Donor: the remote peer that has simulated the furthest. No remote
        // has left time zero (or there are none): fresh session, install an
        // empty snapshot locally.
        let mut donor: Option<PeerId> = None;
        let mut donor_time: GameTime = 0.0;
        for state in self.players.remotes() {
            if state.gameplay_time_seconds > donor_time {
                donor_time = state.gameplay_time_seconds;
                donor = Some(state.peer_id);
            }
        }

        match donor {
            None => {
                let player_id = if self.current_player_id.is_assigned() {
                    self.current_player_id
                } else {
                    PlayerId::new(0)
                };
                self.writer.set_player_id(player_id);

                let mut snapshot = Snapshot::default();
                events.on_install_snapshot.emit(&mut snapshot);
                self.writer.write_load_snapshot_record(0.0, &snapshot.content);
                self.initialized = true;
                self.update_latency_and_command_time();
            },
            Some(peer) => {
                info!("requesting snapshot from peer {peer} at {donor_time}");
                self.writer.set_player_id(self.current_player_id);
                self.socket
                    .send_to(&peer, messages::request_snapshot_packet(&self.local_peer));
            },
        }
    }

    /// Donor side: always answered, so a still-uninitialized requester can
    /// retry safely.
    fn handle_snapshot_request(&mut self, peer: &PeerId, events: &mut LockstepEvents) {
        let mut snapshot = Snapshot {
            gameplay_time_seconds: self.current_frame.current_time,
            content: Vec::new(),
        };
        events.on_create_snapshot.emit(&mut snapshot);
        let dto = SnapshotDto {
            gameplay_time_seconds: snapshot.gameplay_time_seconds,
            content: snapshot.content,
        };
        match messages::install_snapshot_packet(&self.local_peer, &dto) {
            Ok(packet) => self.socket.send_to(peer, packet),
            Err(err) => error!("failed to encode snapshot: {err}"),
        }
    }

    fn handle_snapshot_install(
        &mut self,
        peer: &PeerId,
        dto: SnapshotDto,
        events: &mut LockstepEvents,
    ) {
        if self.initialized {
            debug!("dropping snapshot from {peer}: already initialized");
            return;
        }
        info!(
            "installing snapshot from {peer} at {}",
            dto.gameplay_time_seconds
        );

        self.current_frame.current_time = dto.gameplay_time_seconds;
        self.current_frame.validated_time = dto.gameplay_time_seconds;

        let mut snapshot = Snapshot {
            gameplay_time_seconds: dto.gameplay_time_seconds,
            content: dto.content,
        };
        events.on_install_snapshot.emit(&mut snapshot);
        self.writer
            .write_load_snapshot_record(dto.gameplay_time_seconds, &snapshot.content);

        // Commands at or before the snapshot time are already baked into the
        // snapshot state; never execute them again.
        for state in self.players.iter_mut() {
            if !state.is_local {
                state
                    .commands
                    .advance_executed_past(dto.gameplay_time_seconds);
            }
        }

        self.initialized = true;
        self.update_latency_and_command_time();
    }

    // ##########
    // # ROSTER #
    // ##########

    fn process_roster(&mut self, events: &mut LockstepEvents) {
        for command in self.roster.drain_applicable() {
            self.apply_roster_update(&command, events);
        }
    }

    fn apply_roster_update(
        &mut self,
        command: &PlayersUpdateCommand,
        events: &mut LockstepEvents,
    ) {
        match command.command_type {
            PlayersUpdateKind::Add => {
                let mut state = PlayerState::new(command.player_session_id, command.player_id);
                if state.peer_id == self.local_peer {
                    state.is_local = true;
                    state.is_synchronized = true;
                    self.current_player_id = command.player_id;
                    self.writer.set_player_id(command.player_id);
                }
                info!(
                    "player {} joined on peer {}",
                    command.player_id, command.player_session_id
                );
                self.players.insert(state);
            },
            PlayersUpdateKind::Remove => {
                if self
                    .players
                    .remove_by_peer(&command.player_session_id)
                    .is_some()
                {
                    info!("player {} left", command.player_id);
                }
            },
        }
        self.writer
            .write_update_players_record(self.current_frame.current_time, command);
        events.on_player_list_changed.emit(&mut ());
    }

    fn handle_roster_snapshot(&mut self, command: PlayersSnapshotInstallCommand) {
        self.current_player_id = command.current_player_id;
        self.players.clear();
        for (player_id, peer_id) in command.players {
            let mut state = PlayerState::new(peer_id, player_id);
            if peer_id == self.local_peer {
                state.is_local = true;
                state.is_synchronized = true;
            }
            self.players.insert(state);
        }
        self.roster.install_snapshot(command.update_id);
    }

    // #############
    // # ADMISSION #
    // #############

    pub(crate) fn push_command(&mut self, payload: &[u8]) -> Result<CommandId, LockstepError> {
        if !self.initialized {
            return Err(LockstepError::NotInitialized);
        }
        if payload.is_empty() {
            return Err(LockstepError::EmptyCommand);
        }
        let execution_time = self.command_time;
        if execution_time == 0.0 {
            return Err(LockstepError::CommandTimeUnknown);
        }
        for state in self.players.remotes() {
            if state.gameplay_time_seconds > execution_time {
                return Err(LockstepError::PeerAhead {
                    player_id: state.player_id,
                    peer_gameplay_time: state.gameplay_time_seconds,
                    command_time: execution_time,
                });
            }
        }

        let command_id = self.local_commands.last_id().next();
        self.local_commands.insert(CommandDto {
            command_id,
            gameplay_time_seconds: execution_time,
            content: payload.to_vec(),
        });

        // Force an immediate command batch to every peer on the next sync.
        for state in self.players.iter_mut() {
            state.last_command_update_on = 0;
        }

        self.writer.write_add_command_record(
            self.current_frame.current_time,
            execution_time,
            self.current_player_id,
            command_id,
            payload,
        );
        info!(
            "enqueued command {}/{} for time {}",
            self.current_player_id, command_id, execution_time
        );
        Ok(command_id)
    }

    // #############
    // # OBSERVERS #
    // #############

    pub(crate) fn current_time(&self) -> GameTime {
        self.current_frame.current_time
    }

    pub(crate) fn command_time(&self) -> GameTime {
        self.command_time
    }

    pub(crate) fn latency(&self) -> FrameDuration {
        self.latency
    }

    pub(crate) fn last_executed_command(&self) -> CommandId {
        self.local_commands.last_executed_id()
    }

    pub(crate) fn current_player_id(&self) -> PlayerId {
        self.current_player_id
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn pause(&mut self, pause: bool) {
        self.paused = pause;
        if !pause {
            self.writer.start();
        }
    }

    pub(crate) fn players(&self) -> Vec<LockstepPlayer> {
        self.players
            .iter()
            .map(|state| LockstepPlayer {
                peer_id: state.peer_id,
                player_id: state.player_id,
                latency_ms: state.latency.average(),
                is_local: state.is_local,
                synchronized_until: state.synchronized_until(),
                last_command_id: state
                    .last_sent_command
                    .map_or(CommandId::NONE, |index| self.local_commands.id_at(index)),
                target_delta_seconds: state.delta_time_per_frame_seconds,
            })
            .collect()
    }

    pub(crate) fn try_set_replay_initial_data(&mut self, data: &[u8], build_id: &str) -> bool {
        self.writer.try_set_initialization_data(data, build_id)
    }

    pub(crate) fn replay_initial_data(&self) -> (Vec<u8>, String, String) {
        (
            self.writer.header.initialization_data.clone(),
            self.writer.header.build_id.clone(),
            self.writer.header.game_id.clone(),
        )
    }
}
