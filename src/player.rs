//! Per-player state tracked by a networked session.

use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::command_list::CommandLog;
use crate::samples::SampleWindow;
use crate::{GameTime, PeerId, PlayerId, WallMs};

/// Capacity of the per-player consistency history.
const CONSISTENCY_HISTORY_LEN: usize = 8;

/// One `(gameplay time, hash)` report from a player.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConsistencyEntry {
    pub gameplay_time_seconds: GameTime,
    pub hash: Vec<u8>,
}

/// Ring of the most recent consistency reports from one player.
///
/// The checker consumes entries from the oldest end as its checkpoint
/// advances; a slow consumer simply loses the overwritten oldest entries.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConsistencyRing {
    entries: SmallVec<[ConsistencyEntry; CONSISTENCY_HISTORY_LEN]>,
    offset: usize,
    count: usize,
}

impl ConsistencyRing {
    pub(crate) fn push(&mut self, gameplay_time_seconds: GameTime, hash: Vec<u8>) {
        let entry = ConsistencyEntry {
            gameplay_time_seconds,
            hash,
        };
        if self.entries.len() < CONSISTENCY_HISTORY_LEN {
            self.entries.push(entry);
        } else {
            self.entries[self.offset] = entry;
        }
        self.offset = (self.offset + 1) % CONSISTENCY_HISTORY_LEN;
        if self.count < CONSISTENCY_HISTORY_LEN {
            self.count += 1;
        }
    }

    pub(crate) fn oldest(&self) -> Option<&ConsistencyEntry> {
        if self.count == 0 {
            return None;
        }
        let index =
            (CONSISTENCY_HISTORY_LEN + self.offset - self.count) % CONSISTENCY_HISTORY_LEN;
        self.entries.get(index)
    }

    pub(crate) fn pop_oldest(&mut self) {
        if self.count > 0 {
            self.count -= 1;
        }
    }
}

/// Everything a networked session tracks about one participant.
///
/// The command log of a *remote* player holds the commands we have received
/// from them. The local player's commands live on the session itself, so the
/// `last_sent_command` cursor of each remote (an index into the local log,
/// marking the newest local command that peer has acknowledged) never aliases
/// the table.
#[derive(Debug)]
pub(crate) struct PlayerState {
    pub peer_id: PeerId,
    pub player_id: PlayerId,
    pub is_local: bool,
    /// Rolling one-way latency samples, in milliseconds.
    pub latency: SampleWindow,
    /// Highest gameplay time this peer has reported.
    pub gameplay_time_seconds: GameTime,
    /// Horizon promise: no command from this peer at or before this time.
    pub validated_gameplay_time_seconds: GameTime,
    /// The peer's last reported simulation advance.
    pub delta_time_per_frame_seconds: GameTime,
    /// Peer wall clock when its latest frame update was sent.
    pub sent_on: WallMs,
    /// Local wall clock when that frame update arrived.
    pub received_on: WallMs,
    /// Local wall clock of the last command batch sent to this peer.
    pub last_command_update_on: WallMs,
    /// Newest *local* command this peer has acknowledged: an index into the
    /// session's local command log.
    pub last_sent_command: Option<usize>,
    /// Commands received from this peer (remote players only).
    pub commands: CommandLog,
    /// Recent consistency reports from this player.
    pub consistency: ConsistencyRing,
    /// Set on the first accepted frame update (immediately for the local
    /// player). Gates the late-join bootstrap.
    pub is_synchronized: bool,
}

impl PlayerState {
    pub(crate) fn new(peer_id: PeerId, player_id: PlayerId) -> Self {
        Self {
            peer_id,
            player_id,
            is_local: false,
            latency: SampleWindow::with_capacity(SampleWindow::LATENCY_CAPACITY),
            gameplay_time_seconds: 0.0,
            validated_gameplay_time_seconds: 0.0,
            delta_time_per_frame_seconds: 0.0,
            sent_on: 0,
            received_on: 0,
            last_command_update_on: 0,
            last_sent_command: None,
            commands: CommandLog::new(),
            consistency: ConsistencyRing::default(),
            is_synchronized: false,
        }
    }

    /// The horizon this peer has validated up to.
    pub(crate) fn synchronized_until(&self) -> GameTime {
        self.validated_gameplay_time_seconds
    }
}

/// All participants, iterable in ascending player-id order.
///
/// Deterministic iteration matters: command drain order within a frame is
/// `(player_id, command_id)` and must match on every peer.
#[derive(Debug, Default)]
pub(crate) struct PlayerTable {
    players: BTreeMap<PlayerId, PlayerState>,
}

impl PlayerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, state: PlayerState) {
        self.players.insert(state.player_id, state);
    }

    pub(crate) fn remove_by_peer(&mut self, peer_id: &PeerId) -> Option<PlayerState> {
        let player_id = self
            .players
            .values()
            .find(|state| state.peer_id == *peer_id)
            .map(|state| state.player_id)?;
        self.players.remove(&player_id)
    }

    pub(crate) fn find_by_peer_mut(&mut self, peer_id: &PeerId) -> Option<&mut PlayerState> {
        self.players
            .values_mut()
            .find(|state| state.peer_id == *peer_id)
    }

    pub(crate) fn local(&self) -> Option<&PlayerState> {
        self.players.values().find(|state| state.is_local)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerState> {
        self.players.values_mut()
    }

    pub(crate) fn remotes(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values().filter(|state| !state.is_local)
    }

    pub(crate) fn len(&self) -> usize {
        self.players.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.players.clear();
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
mod consistency_ring_tests {
    use super::*;

    #[test]
    fn oldest_tracks_insertion_order() {
        let mut ring = ConsistencyRing::default();
        assert!(ring.oldest().is_none());
        ring.push(1.0, vec![1]);
        ring.push(2.0, vec![2]);
        assert_eq!(
            ring.oldest().map(|e| e.gameplay_time_seconds),
            Some(1.0)
        );
        ring.pop_oldest();
        assert_eq!(
            ring.oldest().map(|e| e.gameplay_time_seconds),
            Some(2.0)
        );
        ring.pop_oldest();
        assert!(ring.oldest().is_none());
    }

    #[test]
    fn overflow_drops_the_oldest_entries() {
        let mut ring = ConsistencyRing::default();
        for i in 0..10 {
            ring.push(f64::from(i), vec![i as u8]);
        }
        // Capacity 8: entries 0 and 1 were overwritten.
        assert_eq!(
            ring.oldest().map(|e| e.gameplay_time_seconds),
            Some(2.0)
        );
    }

    #[test]
    fn pop_on_empty_is_harmless() {
        let mut ring = ConsistencyRing::default();
        ring.pop_oldest();
        assert!(ring.oldest().is_none());
    }
}
