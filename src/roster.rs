//! Roster sequencer.
//!
//! The session server broadcasts player add/remove updates carrying a
//! strictly increasing `update_id`. Deliveries may arrive out of order, so
//! updates are buffered and released only in exact sequence: an update is
//! applicable when its id is exactly one past the last applied id. Updates
//! from the future are retained indefinitely; stale ids are dropped
//! silently.

use tracing::debug;

use crate::wire::messages::PlayersUpdateCommand;

/// Orders server roster updates before they touch the player table.
#[derive(Debug, Default)]
pub(crate) struct RosterSequencer {
    pending: Vec<PlayersUpdateCommand>,
    current_update_id: i32,
}

impl RosterSequencer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Buffers an incoming update. Stale updates are dropped.
    pub(crate) fn buffer(&mut self, command: PlayersUpdateCommand) {
        if command.update_id <= self.current_update_id {
            debug!(
                "dropping stale roster update {} (current {})",
                command.update_id, self.current_update_id
            );
            return;
        }
        self.pending.push(command);
    }

    /// A roster snapshot resets the sequence position; buffered updates the
    /// snapshot already covers become stale and are discarded.
    pub(crate) fn install_snapshot(&mut self, update_id: i32) {
        self.current_update_id = update_id;
        self.pending.retain(|cmd| cmd.update_id > update_id);
    }

    /// Releases every buffered update that is now in sequence, in order.
    pub(crate) fn drain_applicable(&mut self) -> Vec<PlayersUpdateCommand> {
        let mut applicable = Vec::new();
        loop {
            let next_id = self.current_update_id + 1;
            let Some(position) = self
                .pending
                .iter()
                .position(|cmd| cmd.update_id == next_id)
            else {
                break;
            };
            let command = self.pending.swap_remove(position);
            self.current_update_id = next_id;
            applicable.push(command);
        }
        applicable
    }
}

// #########
// # TESTS #
// #########
