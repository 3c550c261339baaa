//! Process-wide link state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the modem link.
///
/// `Uninitialized -> Initialized` on attach, `Initialized -> Uninitialized`
/// when the link drops, and `ShutDown` as the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// No link attached yet, or the previous link went away.
    Uninitialized = 0,
    /// A link is attached and commands may be sent.
    Initialized = 1,
    /// The session was shut down and will not accept a new link.
    ShutDown = 2,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Initialized,
            2 => LinkState::ShutDown,
            _ => LinkState::Uninitialized,
        }
    }
}

/// Atomic cell holding a [`LinkState`].
#[derive(Debug)]
pub(crate) struct AtomicLinkState(AtomicU8);

impl AtomicLinkState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LinkState::Uninitialized as u8))
    }

    pub(crate) fn get(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; returns the state actually found.
    pub(crate) fn transition(&self, from: LinkState, to: LinkState) -> Result<(), LinkState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LinkState::from_u8)
    }
}
