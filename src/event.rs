//! Typed event topics with host-registered subscribers.
//!
//! Each public engine event is a plain list of boxed callbacks. Subscribing
//! returns a [`Subscription`] handle that can later be passed to
//! [`Event::unsubscribe`]; nothing is unsubscribed implicitly. The
//! [`LockstepEvents`] bundle is owned by the engine facade and *lent* to the
//! active session for the duration of a call, so subscriptions survive mode
//! transitions (offline → networked → replay) unchanged.
//!
//! Callbacks receive `&mut T` so hooks like `on_step` can write back into the
//! frame (e.g. fill in its consistency hash) and `on_create_snapshot` can
//! fill in the snapshot content.

use crate::{ConsistencyCheckEvent, Frame, PauseState, RollbackContext, Snapshot};

/// A handle identifying one subscriber of an [`Event`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// A single event topic: an ordered list of subscriber callbacks.
///
/// Subscribers run in subscription order. The engine is single-threaded, so
/// callbacks may freely capture `Rc<RefCell<...>>` handles into host state.
///
/// # Examples
///
/// ```
/// use cadence_lockstep::Event;
///
/// let mut topic: Event<u32> = Event::new();
/// let sub = topic.subscribe(Box::new(|value| *value += 1));
/// let mut payload = 41;
/// topic.emit(&mut payload);
/// assert_eq!(payload, 42);
/// topic.unsubscribe(sub);
/// ```
pub struct Event<T> {
    subscribers: Vec<(u64, Box<dyn FnMut(&mut T)>)>,
    next_id: u64,
}

impl<T> Event<T> {
    /// Creates an event with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    /// Registers `callback` and returns its cancellation handle.
    pub fn subscribe(&mut self, callback: Box<dyn FnMut(&mut T)>) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, callback));
        Subscription(id)
    }

    /// Removes the subscriber behind `subscription`. Unknown handles are
    /// ignored.
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.subscribers.retain(|(id, _)| *id != subscription.0);
    }

    /// Invokes every subscriber with `value`, in subscription order.
    pub fn emit(&mut self, value: &mut T) {
        for (_, callback) in &mut self.subscribers {
            callback(value);
        }
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns `true` when nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// All event topics exposed by the engine, bundled so the facade can pass
/// them to whichever session is active.
#[derive(Debug, Default)]
pub struct LockstepEvents {
    /// A simulation step was produced. Subscribers advance the host
    /// simulation and may fill in [`Frame::consistency_data`].
    pub on_step: Event<Frame>,
    /// The host finished the frame; fired from `end_frame`.
    pub on_end_frame: Event<Frame>,
    /// Hook for host-driven rollback. The engine never emits this itself.
    pub on_rollback: Event<RollbackContext>,
    /// Gameplay progress changed between running, waiting and paused.
    /// Emitted only on transitions.
    pub on_pause_state_changed: Event<PauseState>,
    /// The player roster changed; query `players()` for the new list.
    pub on_player_list_changed: Event<()>,
    /// Consistency hashes for one checkpoint are complete across players.
    pub on_consistency_check: Event<ConsistencyCheckEvent>,
    /// The engine needs a snapshot of the host game state (a late joiner
    /// asked for one). Fill in the snapshot's content.
    pub on_create_snapshot: Event<Snapshot>,
    /// A snapshot must be installed into the host game state.
    pub on_install_snapshot: Event<Snapshot>,
    /// The session finished bootstrapping and the first step is about to run.
    pub on_start: Event<()>,
}

// #########
// # TESTS #
// #########
