//! Single-player session.
//!
//! Runs the same fixed-step pacing and command admission as a networked
//! session with zero remote peers: no horizon to respect, and the command
//! delay collapses to the configured minimum. Everything is recorded, so an
//! offline game produces a replay identical in shape to a networked one.

use tracing::warn;

use crate::command_list::CommandLog;
use crate::event::LockstepEvents;
use crate::pacer::{Pacer, PacingInputs};
use crate::replay::{ReplayWriter, SharedSink};
use crate::wire::messages::{CommandDto, PlayersUpdateCommand, PlayersUpdateKind};
use crate::{
    Command, CommandId, Frame, FrameDuration, GameTime, LockstepConfig, LockstepError,
    LockstepPlayer, PauseState, PeerId, PlayerId, Snapshot,
};

const OFFLINE_GAME_ID: &str = "offline";
const OFFLINE_PLAYER: PlayerId = PlayerId::new(0);

/// Lockstep session without a transport: one local player.
#[derive(Debug)]
pub(crate) struct OfflineSession {
    config: LockstepConfig,
    pacer: Pacer,
    writer: ReplayWriter,
    commands: CommandLog,
    current_frame: Frame,
    command_time: GameTime,
    paused: bool,
    progressing: bool,
    initialized: bool,
}

impl OfflineSession {
    pub(crate) fn new(config: LockstepConfig, sink: SharedSink) -> Self {
        Self {
            config,
            pacer: Pacer::new(),
            writer: ReplayWriter::new(OFFLINE_GAME_ID.to_owned(), OFFLINE_PLAYER, sink),
            commands: CommandLog::new(),
            current_frame: Frame::default(),
            command_time: 0.0,
            paused: true,
            progressing: false,
            initialized: false,
        }
    }

    /// Bootstraps the single-player roster and an empty snapshot at time 0.
    fn try_initialize(&mut self, events: &mut LockstepEvents) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        let update = PlayersUpdateCommand {
            command_type: PlayersUpdateKind::Add,
            update_id: 0,
            player_id: OFFLINE_PLAYER,
            player_session_id: PeerId::NIL,
        };
        self.writer.write_update_players_record(0.0, &update);

        let mut snapshot = Snapshot::default();
        events.on_install_snapshot.emit(&mut snapshot);
        self.writer
            .write_load_snapshot_record(snapshot.gameplay_time_seconds, &snapshot.content);

        events.on_start.emit(&mut ());
    }

    pub(crate) fn adjust_tick(&mut self, target_delta: FrameDuration) -> FrameDuration {
        let inputs = PacingInputs {
            paused: self.paused,
            current_time: self.current_frame.current_time,
            target_time: self.current_frame.current_time + self.config.fixed_delta_time_seconds,
            synchronized_until: f64::INFINITY,
        };
        let granted = self.pacer.adjust(target_delta, &self.config, inputs);
        if granted > 0.0 {
            self.update_command_time();
        }
        granted
    }

    // With no peers the effective latency is the configured floor.
    fn update_command_time(&mut self) {
        let latency = self
            .config
            .delay_margin_seconds
            .clamp(self.config.min_delay_seconds, self.config.max_delay_seconds);
        let candidate = self.current_frame.current_time + latency;
        if candidate > self.command_time {
            self.command_time = candidate;
        }
    }

    pub(crate) fn tick(&mut self, delta: FrameDuration, events: &mut LockstepEvents) {
        if delta == 0.0 {
            self.pacer.note_stall(self.current_frame.current_time);
            self.emit_pause_transition(false, events);
            return;
        }
        self.try_initialize(events);

        let previous_time = self.current_frame.current_time;
        let mut frame = Frame {
            current_time: previous_time + delta,
            validated_time: self.command_time,
            commands: Vec::new(),
            consistency_data: Vec::new(),
        };

        while let Some(index) = self.commands.next_unexecuted() {
            let pending = self.commands.command(index);
            if pending.gameplay_time_seconds > frame.current_time {
                break;
            }
            if pending.gameplay_time_seconds > previous_time {
                frame.commands.push(Command {
                    command_id: pending.command_id,
                    player_id: OFFLINE_PLAYER,
                    peer_id: PeerId::NIL,
                    content: pending.content.clone(),
                    execution_time: pending.gameplay_time_seconds,
                });
                self.writer.write_execute_command_record(
                    frame.current_time,
                    OFFLINE_PLAYER,
                    pending.command_id,
                );
            } else {
                warn!(
                    "skipping command {} scheduled at {} behind frame {}",
                    pending.command_id, pending.gameplay_time_seconds, previous_time
                );
            }
            self.commands.mark_executed(index);
        }

        self.writer.write_frame_record(frame.current_time);

        self.emit_pause_transition(true, events);
        events.on_step.emit(&mut frame);
        self.current_frame = frame;
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

    pub(crate) fn end_frame(&mut self, events: &mut LockstepEvents) {
        events.on_end_frame.emit(&mut self.current_frame);
    }

    pub(crate) fn push_command(
        &mut self,
        payload: &[u8],
        events: &mut LockstepEvents,
    ) -> Result<CommandId, LockstepError> {
        if payload.is_empty() {
            return Err(LockstepError::EmptyCommand);
        }
        self.try_initialize(events);

        let execution_time = self.command_time;
        if execution_time == 0.0 {
            return Err(LockstepError::CommandTimeUnknown);
        }

        let command_id = self.commands.last_id().next();
        self.commands.insert(CommandDto {
            command_id,
            gameplay_time_seconds: execution_time,
            content: payload.to_vec(),
        });
        self.writer.write_add_command_record(
            self.current_frame.current_time,
            execution_time,
            OFFLINE_PLAYER,
            command_id,
            payload,
        );
        Ok(command_id)
    }

    pub(crate) fn pause(&mut self, pause: bool) {
        self.paused = pause;
        if !pause {
            self.writer.start();
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn current_time(&self) -> GameTime {
        self.current_frame.current_time
    }

    pub(crate) fn target_time(&self) -> GameTime {
        self.current_frame.current_time + self.config.fixed_delta_time_seconds
    }

    pub(crate) fn command_time(&self) -> GameTime {
        self.command_time
    }

    pub(crate) fn latency(&self) -> FrameDuration {
        0.0
    }

    pub(crate) fn last_executed_command(&self) -> CommandId {
        self.commands.last_executed_id()
    }

    pub(crate) fn current_player_id(&self) -> PlayerId {
        OFFLINE_PLAYER
    }

    pub(crate) fn players(&self) -> Vec<LockstepPlayer> {
        // Offline, the local player validates up to the minimum delay ahead,
        // or up to the newest scheduled command if that is later.
        let mut synchronized_until =
            self.current_frame.current_time + self.config.min_delay_seconds;
        let mut last_command_id = CommandId::NONE;
        if let Some(newest) = self.commands.last() {
            if newest.gameplay_time_seconds > synchronized_until {
                synchronized_until = newest.gameplay_time_seconds;
            }
            last_command_id = newest.command_id;
        }
        vec![LockstepPlayer {
            peer_id: PeerId::NIL,
            player_id: OFFLINE_PLAYER,
            latency_ms: 0,
            is_local: true,
            synchronized_until,
            last_command_id,
            target_delta_seconds: self.config.fixed_delta_time_seconds,
        }]
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

// #########
// # TESTS #
// #########
