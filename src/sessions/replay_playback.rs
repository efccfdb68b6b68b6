//! Replay playback session.
//!
//! Drives a recorded session back through the same event surface as a live
//! one. Each tick consumes every record whose timestamp falls inside the
//! advanced window and re-emits the frames the recording session produced;
//! driving playback with the same delta pattern as the recording yields a
//! pointwise-identical frame stream.
//!
//! While paused, only snapshot and roster records execute (and they ignore
//! the time gate), so a replay can be scrubbed forward onto a mid-game
//! snapshot without running the simulation.

use tracing::{debug, error};

use crate::event::LockstepEvents;
use crate::replay::{
    AddCommandRecord, ExecuteCommandRecord, FrameRecord, LoadSnapshotRecord, RecordHeader,
    RecordType, ReplayReader, UpdatePlayerListRecord,
};
use crate::wire::codec::CodecError;
use crate::wire::messages::PlayersUpdateKind;
use crate::{
    Command, CommandId, Frame, FrameDuration, GameTime, LockstepConfig, LockstepError,
    LockstepPlayer, PeerId, PlayerId, Snapshot,
};

/// Session that plays a recorded byte stream back.
#[derive(Debug)]
pub(crate) struct ReplaySession {
    config: LockstepConfig,
    reader: ReplayReader,
    /// A record header read but not yet consumable (its time gate failed).
    pending_header: Option<RecordHeader>,
    /// Commands announced by `AddCommand` records, waiting for their
    /// `ExecuteCommand`.
    pending_commands: Vec<Command>,
    players: Vec<LockstepPlayer>,
    current_frame: Frame,
    paused: bool,
    finished: bool,
}

impl ReplaySession {
    pub(crate) fn new(config: LockstepConfig, bytes: &[u8]) -> Result<Self, LockstepError> {
        let reader = ReplayReader::new(bytes)?;
        Ok(Self {
            config,
            reader,
            pending_header: None,
            pending_commands: Vec::new(),
            players: Vec::new(),
            current_frame: Frame::default(),
            paused: true,
            finished: false,
        })
    }

    pub(crate) fn adjust_tick(&mut self, target_delta: FrameDuration) -> FrameDuration {
        // Playback follows the host's pace directly; the recording already
        // fixed which commands land in which frame.
        if self.paused {
            0.0
        } else {
            target_delta
        }
    }

    pub(crate) fn tick(&mut self, delta: FrameDuration, events: &mut LockstepEvents) {
        let previous_time = self.current_frame.current_time;
        let mut frame = Frame {
            current_time: previous_time + delta,
            validated_time: previous_time + delta,
            commands: Vec::new(),
            consistency_data: Vec::new(),
        };

        loop {
            let header = match self.pending_header.take() {
                Some(header) => header,
                None => match self.reader.try_read_record_header() {
                    Ok(Some(header)) => header,
                    Ok(None) => {
                        self.finished = true;
                        break;
                    },
                    Err(err) => {
                        error!("replay stream corrupt: {err}");
                        self.finished = true;
                        break;
                    },
                },
            };

            let Ok(record_type) = RecordType::try_from(header.record_type) else {
                error!("unknown replay record type {}", header.record_type);
                self.finished = true;
                break;
            };

            if self.paused {
                // Scrub mode: snapshot and roster records execute regardless
                // of their timestamp; everything else waits for unpause.
                if matches!(
                    record_type,
                    RecordType::LoadSnapshot | RecordType::UpdatePlayerList
                ) {
                    if let Err(err) = self.consume_record(record_type, header, &mut frame, true, events)
                    {
                        error!("replay stream corrupt: {err}");
                        self.finished = true;
                        break;
                    }
                    continue;
                }
                self.pending_header = Some(header);
                break;
            }

            if header.game_time > frame.current_time {
                self.pending_header = Some(header);
                break;
            }

            // Records behind the previous frame were already consumed by the
            // recording session before this playback window; skip their
            // effects but still advance over their bytes.
            let execute = header.game_time >= previous_time;
            if let Err(err) = self.consume_record(record_type, header, &mut frame, execute, events)
            {
                error!("replay stream corrupt: {err}");
                self.finished = true;
                break;
            }
        }

        if delta > 0.0 || !frame.commands.is_empty() {
            events.on_step.emit(&mut frame);
        }
        self.current_frame = frame;
    }

    fn consume_record(
        &mut self,
        record_type: RecordType,
        header: RecordHeader,
        frame: &mut Frame,
        execute: bool,
        events: &mut LockstepEvents,
    ) -> Result<(), CodecError> {
        match record_type {
            RecordType::Frame => {
                let _: FrameRecord = self.reader.read_body()?;
            },
            RecordType::AddCommand => {
                let record: AddCommandRecord = self.reader.read_body()?;
                if execute {
                    self.pending_commands.push(Command {
                        command_id: record.command_id,
                        player_id: record.player_id,
                        peer_id: PeerId::NIL,
                        content: record.data,
                        execution_time: record.game_time,
                    });
                }
            },
            RecordType::ExecuteCommand => {
                let record: ExecuteCommandRecord = self.reader.read_body()?;
                if execute {
                    if let Some(position) = self.pending_commands.iter().position(|command| {
                        command.command_id == record.command_id
                            && command.player_id == record.player_id
                    }) {
                        frame.commands.push(self.pending_commands.remove(position));
                    } else {
                        debug!(
                            "execute record for unknown command {}/{}",
                            record.player_id, record.command_id
                        );
                    }
                }
            },
            RecordType::LoadSnapshot => {
                let record: LoadSnapshotRecord = self.reader.read_body()?;
                if execute {
                    // Forward-only: a snapshot never rewinds playback time.
                    if header.game_time > frame.current_time {
                        frame.current_time = header.game_time;
                    }
                    frame.validated_time = frame.current_time;
                    let mut snapshot = Snapshot {
                        gameplay_time_seconds: header.game_time,
                        content: record.data,
                    };
                    events.on_install_snapshot.emit(&mut snapshot);
                }
            },
            RecordType::UpdatePlayerList => {
                let record: UpdatePlayerListRecord = self.reader.read_body()?;
                if execute {
                    self.apply_roster_update(&record);
                    events.on_player_list_changed.emit(&mut ());
                }
            },
        }
        Ok(())
    }

    fn apply_roster_update(&mut self, record: &UpdatePlayerListRecord) {
        let update = &record.player_update;
        match update.command_type {
            PlayersUpdateKind::Add => {
                self.players.push(LockstepPlayer {
                    peer_id: update.player_session_id,
                    player_id: update.player_id,
                    latency_ms: 0,
                    is_local: update.player_id == self.reader.header.player_id,
                    synchronized_until: 0.0,
                    last_command_id: CommandId::NONE,
                    target_delta_seconds: 0.0,
                });
            },
            PlayersUpdateKind::Remove => {
                self.players
                    .retain(|player| player.peer_id != update.player_session_id);
            },
        }
    }

    pub(crate) fn end_frame(&mut self, events: &mut LockstepEvents) {
        events.on_end_frame.emit(&mut self.current_frame);
    }

    pub(crate) fn push_command(&mut self) -> Result<CommandId, LockstepError> {
        Err(LockstepError::ReplayPlayback)
    }

    pub(crate) fn pause(&mut self, pause: bool) {
        self.paused = pause;
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    /// `true` once the record stream has been fully consumed.
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn current_time(&self) -> GameTime {
        self.current_frame.current_time
    }

    pub(crate) fn target_time(&self) -> GameTime {
        self.current_frame.current_time + self.config.fixed_delta_time_seconds
    }

    pub(crate) fn command_time(&self) -> GameTime {
        // Commands cannot be issued during playback.
        self.current_frame.current_time
    }

    pub(crate) fn current_player_id(&self) -> PlayerId {
        self.reader.header.player_id
    }

    pub(crate) fn players(&self) -> Vec<LockstepPlayer> {
        self.players.clone()
    }

    pub(crate) fn replay_initial_data(&self) -> (Vec<u8>, String, String) {
        (
            self.reader.header.initialization_data.clone(),
            self.reader.header.build_id.clone(),
            self.reader.header.game_id.clone(),
        )
    }
}
