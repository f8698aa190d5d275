//! Per-tile lifecycle notifications.
//!
//! Events are delivered through a direct observer callback rather than any
//! broadcast mechanism, so cancellation propagation is testable in
//! isolation. Ordering is guaranteed per tile only:
//! `Requested -> {Loaded | Cancelled}` and eventually `Removed`.

use crate::core::projection::TileAddress;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEvent {
    /// A load was issued for the tile
    Requested(TileAddress),
    /// The tile resolved with displayable content (real or placeholder)
    Loaded(TileAddress),
    /// An in-flight load was cancelled
    Cancelled(TileAddress),
    /// The tile left the screen and was destroyed
    Removed(TileAddress),
}

impl TileEvent {
    pub fn address(&self) -> TileAddress {
        match *self {
            TileEvent::Requested(addr)
            | TileEvent::Loaded(addr)
            | TileEvent::Cancelled(addr)
            | TileEvent::Removed(addr) => addr,
        }
    }
}

/// Instrumentation hook for tile lifecycle events (e.g. a network-activity
/// indicator counting `Requested` against `Loaded`/`Cancelled`).
pub trait TileObserver: Send + Sync {
    fn on_tile_event(&self, event: TileEvent);
}

pub type SharedObserver = Arc<dyn TileObserver>;

/// Observer that ignores all events
#[derive(Debug, Default)]
pub struct NullObserver;

impl TileObserver for NullObserver {
    fn on_tile_event(&self, _event: TileEvent) {}
}

/// Observer that records every event in order. Intended for tests and
/// diagnostics.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TileEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TileEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count_requested(&self) -> usize {
        self.count(|e| matches!(e, TileEvent::Requested(_)))
    }

    pub fn count_loaded(&self) -> usize {
        self.count(|e| matches!(e, TileEvent::Loaded(_)))
    }

    pub fn count_cancelled(&self) -> usize {
        self.count(|e| matches!(e, TileEvent::Cancelled(_)))
    }

    pub fn count_removed(&self) -> usize {
        self.count(|e| matches!(e, TileEvent::Removed(_)))
    }

    fn count(&self, pred: impl Fn(&TileEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl TileObserver for RecordingObserver {
    fn on_tile_event(&self, event: TileEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
