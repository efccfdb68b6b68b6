//! Cross-peer consistency sweep.
//!
//! Every player (local included) reports an opaque hash of its simulation
//! state per frame. The checker walks a checkpoint forward in fixed-step
//! increments; once every player has reported a hash for the checkpoint time
//! it lines them up into one event for the host to compare. The engine never
//! judges the hashes itself.

use std::collections::BTreeMap;

use crate::player::PlayerTable;
use crate::{ConsistencyCheckEvent, FrameDuration, GameTime};

/// Advances the consistency checkpoint and assembles per-checkpoint reports.
#[derive(Debug, Default)]
pub(crate) struct ConsistencyChecker {
    target: GameTime,
}

impl ConsistencyChecker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs as many checkpoints as the collected histories allow, returning
    /// one event per checkpoint where at least one player reported a hash.
    ///
    /// Stops as soon as any player's history is exhausted; the missing
    /// report may still arrive. A player whose oldest entry is already past
    /// the checkpoint (a late joiner) is skipped for that checkpoint rather
    /// than stalling the sweep forever.
    pub(crate) fn sweep(
        &mut self,
        players: &mut PlayerTable,
        fixed_delta: FrameDuration,
    ) -> Vec<ConsistencyCheckEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.check_once(players) {
            if !event.hashes.is_empty() {
                events.push(event);
            }
            self.target += fixed_delta;
        }
        events
    }

    fn check_once(&mut self, players: &mut PlayerTable) -> Option<ConsistencyCheckEvent> {
        let mut hashes = BTreeMap::new();
        for state in players.iter_mut() {
            // Discard reports older than the checkpoint; they were either
            // checked already or can never be checked again.
            while let Some(entry) = state.consistency.oldest() {
                if entry.gameplay_time_seconds >= self.target {
                    break;
                }
                state.consistency.pop_oldest();
            }

            match state.consistency.oldest() {
                None => return None,
                Some(entry) if entry.gameplay_time_seconds == self.target => {
                    hashes.insert(state.player_id, entry.hash.clone());
                },
                // Oldest entry is past the checkpoint: skip this player.
                Some(_) => {},
            }
        }

        Some(ConsistencyCheckEvent {
            gameplay_time: self.target,
            hashes,
        })
    }
}

// #########
// # TESTS #
// #########
