//! Replay record stream: types, writer and reader.
//!
//! A replay is a byte stream beginning with a [`FileHeader`] followed by
//! repeated `(RecordHeader, body)` pairs, all encoded with the crate codec.
//! Sessions write records as they run; the writer buffers everything until
//! [`ReplayWriter::start`] (invoked on the first unpause) and then streams
//! through a host-supplied sink, so a session that never starts leaves no
//! partial file behind.
//!
//! Record bodies by type:
//!
//! | type | body | header `game_time` |
//! |---|---|---|
//! | 1 | [`LoadSnapshotRecord`] | snapshot time |
//! | 2 | [`AddCommandRecord`] | insertion time (body carries execution time) |
//! | 3 | [`ExecuteCommandRecord`] | executing frame's time |
//! | 4 | [`FrameRecord`] | frame time |
//! | 5 | [`UpdatePlayerListRecord`] | application time |

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::error;

use crate::error::LockstepError;
use crate::wire::codec::{self, CodecError};
use crate::wire::messages::PlayersUpdateCommand;
use crate::{CommandId, GameTime, PlayerId};

/// Version written into every replay file header.
pub const REPLAY_FILE_VERSION: i32 = 2;

/// Leading header of a replay file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Replay format version.
    pub version: i32,
    /// Build identifier of the game that recorded the replay; playback
    /// should refuse mismatching builds (determinism is per-build).
    pub build_id: String,
    /// The recording player's id.
    pub player_id: PlayerId,
    /// The game session id the replay was recorded in.
    pub game_id: String,
    /// Opaque host data needed to set the game up before playback.
    pub initialization_data: Vec<u8>,
}

impl FileHeader {
    fn new(game_id: String, player_id: PlayerId) -> Self {
        Self {
            version: REPLAY_FILE_VERSION,
            build_id: String::new(),
            player_id,
            game_id,
            initialization_data: Vec::new(),
        }
    }
}

/// Per-record header: the record type tag and its gameplay timestamp.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// One of the [`RecordType`] byte values.
    pub record_type: u8,
    /// Gameplay time the record applies at.
    pub game_time: GameTime,
}

/// Typed view of the record-type byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordType {
    /// A snapshot to install (type 1).
    LoadSnapshot = 1,
    /// A command entering the log (type 2).
    AddCommand = 2,
    /// A command executing in a frame (type 3).
    ExecuteCommand = 3,
    /// A frame boundary (type 4).
    Frame = 4,
    /// A roster change (type 5).
    UpdatePlayerList = 5,
}

impl TryFrom<u8> for RecordType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::LoadSnapshot),
            2 => Ok(Self::AddCommand),
            3 => Ok(Self::ExecuteCommand),
            4 => Ok(Self::Frame),
            5 => Ok(Self::UpdatePlayerList),
            other => Err(other),
        }
    }
}

/// Body of a snapshot record; the snapshot time travels in the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshotRecord {
    /// Opaque host game state.
    pub data: Vec<u8>,
}

/// Body of a command-insertion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddCommandRecord {
    /// The issuing player.
    pub player_id: PlayerId,
    /// The command's scheduled execution time.
    pub game_time: GameTime,
    /// The command's per-player sequence number.
    pub command_id: CommandId,
    /// Opaque command payload.
    pub data: Vec<u8>,
}

/// Body of a command-execution record.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteCommandRecord {
    /// The issuing player.
    pub player_id: PlayerId,
    /// The executed command.
    pub command_id: CommandId,
}

/// Body of a frame-boundary record (empty; the time is in the header).
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {}

/// Body of a roster-change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlayerListRecord {
    /// The roster change that was applied.
    pub player_update: PlayersUpdateCommand,
}

/// One chunk of replay bytes handed to the host sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayWriteEvent {
    /// Encoded bytes: the file header, or one `(RecordHeader, body)` pair.
    pub data: Vec<u8>,
    /// `true` for the file header chunk.
    pub is_header: bool,
    /// The recording player's id.
    pub player_id: PlayerId,
    /// The recording session's game id.
    pub game_id: String,
}

/// The host-supplied consumer of replay bytes.
pub type ReplaySink = Box<dyn FnMut(&ReplayWriteEvent)>;

/// A sink shared between the engine facade and the active session, so
/// [`crate::LockstepEngine::set_replay_writer`] takes effect immediately.
pub(crate) type SharedSink = Rc<RefCell<ReplaySink>>;

pub(crate) fn shared_sink(sink: ReplaySink) -> SharedSink {
    Rc::new(RefCell::new(sink))
}

/// Discarding sink used until the host installs one.
pub(crate) fn null_sink() -> SharedSink {
    shared_sink(Box::new(|_| {}))
}

/// Streams session records into the host sink, buffering until started.
pub(crate) struct ReplayWriter {
    pub(crate) header: FileHeader,
    started: bool,
    header_written: bool,
    pending: VecDeque<ReplayWriteEvent>,
    sink: SharedSink,
}

impl std::fmt::Debug for ReplayWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayWriter")
            .field("header", &self.header)
            .field("started", &self.started)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ReplayWriter {
    pub(crate) fn new(game_id: String, player_id: PlayerId, sink: SharedSink) -> Self {
        Self {
            header: FileHeader::new(game_id, player_id),
            started: false,
            header_written: false,
            pending: VecDeque::new(),
            sink,
        }
    }

    /// Sets the header's initialization payload and build id. Fails once the
    /// file header has been flushed.
    pub(crate) fn try_set_initialization_data(&mut self, data: &[u8], build_id: &str) -> bool {
        if self.header_written {
            return false;
        }
        self.header.initialization_data = data.to_vec();
        self.header.build_id = build_id.to_owned();
        true
    }

    pub(crate) fn set_player_id(&mut self, player_id: PlayerId) {
        if !self.header_written {
            self.header.player_id = player_id;
        }
    }

    pub(crate) fn write_frame_record(&mut self, game_time: GameTime) {
        self.write_record(RecordType::Frame, game_time, &FrameRecord {});
    }

    pub(crate) fn write_execute_command_record(
        &mut self,
        game_time: GameTime,
        player_id: PlayerId,
        command_id: CommandId,
    ) {
        self.write_record(
            RecordType::ExecuteCommand,
            game_time,
            &ExecuteCommandRecord {
                player_id,
                command_id,
            },
        );
    }

    pub(crate) fn write_add_command_record(
        &mut self,
        game_time: GameTime,
        execution_time: GameTime,
        player_id: PlayerId,
        command_id: CommandId,
        data: &[u8],
    ) {
        self.write_record(
            RecordType::AddCommand,
            game_time,
            &AddCommandRecord {
                player_id,
                game_time: execution_time,
                command_id,
                data: data.to_vec(),
            },
        );
    }

    /// Writes a snapshot record; the header timestamp carries the snapshot
    /// time.
    pub(crate) fn write_load_snapshot_record(&mut self, snapshot_time: GameTime, data: &[u8]) {
        self.write_record(
            RecordType::LoadSnapshot,
            snapshot_time,
            &LoadSnapshotRecord { data: data.to_vec() },
        );
    }

    pub(crate) fn write_update_players_record(
        &mut self,
        game_time: GameTime,
        command: &PlayersUpdateCommand,
    ) {
        self.write_record(
            RecordType::UpdatePlayerList,
            game_time,
            &UpdatePlayerListRecord {
                player_update: command.clone(),
            },
        );
    }

    fn write_record<T: Serialize>(&mut self, record_type: RecordType, game_time: GameTime, body: &T) {
        let header = RecordHeader {
            record_type: record_type as u8,
            game_time,
        };
        let mut data = match codec::encode(&header) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("failed to encode replay record header: {err}");
                return;
            },
        };
        if let Err(err) = codec::encode_append(body, &mut data) {
            error!("failed to encode replay record body: {err}");
            return;
        }
        let event = ReplayWriteEvent {
            data,
            is_header: false,
            player_id: self.header.player_id,
            game_id: self.header.game_id.clone(),
        };
        self.write(event);
    }

    fn write(&mut self, event: ReplayWriteEvent) {
        if self.started {
            (*self.sink.borrow_mut())(&event);
        } else {
            self.pending.push_back(event);
        }
    }

    /// Flushes the file header and everything buffered so far, then streams
    /// subsequent records directly. Idempotent.
    pub(crate) fn start(&mut self) {
        if self.started {
            return;
        }
        self.write_file_header();
        while let Some(event) = self.pending.pop_front() {
            (*self.sink.borrow_mut())(&event);
        }
        self.started = true;
    }

    fn write_file_header(&mut self) {
        if self.header_written {
            return;
        }
        self.header_written = true;
        match codec::encode(&self.header) {
            Ok(data) => {
                let event = ReplayWriteEvent {
                    data,
                    is_header: true,
                    player_id: self.header.player_id,
                    game_id: self.header.game_id.clone(),
                };
                (*self.sink.borrow_mut())(&event);
            },
            Err(err) => error!("failed to encode replay file header: {err}"),
        }
    }
}

/// Incremental decoder over a replay byte stream.
pub(crate) struct ReplayReader {
    data: Vec<u8>,
    offset: usize,
    pub(crate) header: FileHeader,
}

impl std::fmt::Debug for ReplayReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayReader")
            .field("header", &self.header)
            .field("offset", &self.offset)
            .field("len", &self.data.len())
            .finish()
    }
}

impl ReplayReader {
    pub(crate) fn new(bytes: &[u8]) -> Result<Self, LockstepError> {
        let (header, consumed): (FileHeader, usize) = codec::decode(bytes)?;
        Ok(Self {
            data: bytes.to_vec(),
            offset: consumed,
            header,
        })
    }

    /// Reads the next record header, or `None` at end of stream.
    pub(crate) fn try_read_record_header(&mut self) -> Result<Option<RecordHeader>, CodecError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let (header, consumed): (RecordHeader, usize) = codec::decode(&self.data[self.offset..])?;
        self.offset += consumed;
        Ok(Some(header))
    }

    /// Reads the body following a record header.
    pub(crate) fn read_body<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let (body, consumed): (T, usize) = codec::decode(&self.data[self.offset..])?;
        self.offset += consumed;
        Ok(body)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod replay_tests {
    use super::*;
    use crate::wire::messages::PlayersUpdateKind;
    use crate::PeerId;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collecting_sink() -> (SharedSink, Rc<RefCell<Vec<ReplayWriteEvent>>>) {
        let collected = Rc::new(RefCell::new(Vec::new()));
        let inner = collected.clone();
        let sink = shared_sink(Box::new(move |event: &ReplayWriteEvent| {
            inner.borrow_mut().push(event.clone());
        }));
        (sink, collected)
    }

    fn concat(events: &[ReplayWriteEvent]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for event in events {
            bytes.extend_from_slice(&event.data);
        }
        bytes
    }

    #[test]
    fn nothing_flows_before_start() {
        let (sink, collected) = collecting_sink();
        let mut writer = ReplayWriter::new("game".to_owned(), PlayerId::new(0), sink);
        writer.write_frame_record(0.1);
        writer.write_frame_record(0.2);
        assert!(collected.borrow().is_empty());

        writer.start();
        // Header + the two buffered records.
        assert_eq!(collected.borrow().len(), 3);
        assert!(collected.borrow()[0].is_header);
    }

    #[test]
    fn start_is_idempotent_and_streams_afterwards() {
        let (sink, collected) = collecting_sink();
        let mut writer = ReplayWriter::new("game".to_owned(), PlayerId::new(0), sink);
        writer.start();
        writer.start();
        assert_eq!(collected.borrow().len(), 1);

        writer.write_frame_record(0.1);
        assert_eq!(collected.borrow().len(), 2);
    }

    #[test]
    fn initialization_data_locks_after_header_flush() {
        let (sink, _collected) = collecting_sink();
        let mut writer = ReplayWriter::new("game".to_owned(), PlayerId::new(0), sink);
        assert!(writer.try_set_initialization_data(&[1, 2, 3], "build-7"));
        writer.start();
        assert!(!writer.try_set_initialization_data(&[9], "build-8"));
        assert_eq!(writer.header.initialization_data, vec![1, 2, 3]);
        assert_eq!(writer.header.build_id, "build-7");
    }

    #[test]
    fn written_stream_reads_back_record_by_record() {
        let (sink, collected) = collecting_sink();
        let mut writer = ReplayWriter::new("the-game".to_owned(), PlayerId::new(2), sink);
        writer.try_set_initialization_data(&[0xAB], "build-1");
        writer.write_load_snapshot_record(0.0, &[0x01]);
        writer.write_add_command_record(0.1, 0.25, PlayerId::new(2), CommandId::new(1), &[0x41]);
        writer.write_execute_command_record(0.3, PlayerId::new(2), CommandId::new(1));
        writer.write_frame_record(0.3);
        writer.write_update_players_record(
            0.4,
            &PlayersUpdateCommand {
                command_type: PlayersUpdateKind::Remove,
                update_id: 9,
                player_id: PlayerId::new(1),
                player_session_id: PeerId::from_bytes([5; 16]),
            },
        );
        writer.start();

        let bytes = concat(&collected.borrow());
        let mut reader = ReplayReader::new(&bytes).unwrap();
        assert_eq!(reader.header.version, REPLAY_FILE_VERSION);
        assert_eq!(reader.header.game_id, "the-game");
        assert_eq!(reader.header.player_id, PlayerId::new(2));
        assert_eq!(reader.header.build_id, "build-1");
        assert_eq!(reader.header.initialization_data, vec![0xAB]);

        let h1 = reader.try_read_record_header().unwrap().unwrap();
        assert_eq!(RecordType::try_from(h1.record_type), Ok(RecordType::LoadSnapshot));
        assert_eq!(h1.game_time, 0.0);
        let snapshot: LoadSnapshotRecord = reader.read_body().unwrap();
        assert_eq!(snapshot.data, vec![0x01]);

        let h2 = reader.try_read_record_header().unwrap().unwrap();
        assert_eq!(RecordType::try_from(h2.record_type), Ok(RecordType::AddCommand));
        assert_eq!(h2.game_time, 0.1);
        let add: AddCommandRecord = reader.read_body().unwrap();
        assert_eq!(add.game_time, 0.25);
        assert_eq!(add.command_id, CommandId::new(1));
        assert_eq!(add.data, vec![0x41]);

        let h3 = reader.try_read_record_header().unwrap().unwrap();
        assert_eq!(RecordType::try_from(h3.record_type), Ok(RecordType::ExecuteCommand));
        let _execute: ExecuteCommandRecord = reader.read_body().unwrap();

        let h4 = reader.try_read_record_header().unwrap().unwrap();
        assert_eq!(RecordType::try_from(h4.record_type), Ok(RecordType::Frame));
        let _frame: FrameRecord = reader.read_body().unwrap();

        let h5 = reader.try_read_record_header().unwrap().unwrap();
        assert_eq!(
            RecordType::try_from(h5.record_type),
            Ok(RecordType::UpdatePlayerList)
        );
        let update: UpdatePlayerListRecord = reader.read_body().unwrap();
        assert_eq!(update.player_update.update_id, 9);

        assert!(reader.try_read_record_header().unwrap().is_none());
    }

    #[test]
    fn reader_rejects_garbage() {
        assert!(ReplayReader::new(&[0xFF]).is_err());
    }

    #[test]
    fn record_type_rejects_unknown_bytes() {
        assert_eq!(RecordType::try_from(0), Err(0));
        assert_eq!(RecordType::try_from(6), Err(6));
    }
}
