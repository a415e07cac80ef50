// Transport control - host-side transport state shared across threads

use crate::engine::position::{TransportPosition, TransportState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Shared transport state.
///
/// Control threads start/stop the transport and stage reposition requests;
/// the realtime cycle reads the state and consumes at most one staged
/// reposition per period. Everything except the staged position is atomics.
#[derive(Debug, Default)]
pub struct TransportControl {
    rolling: AtomicBool,
    reposition: Mutex<Option<TransportPosition>>,
    timebase_master: AtomicBool,
    sync_timeout_ms: AtomicU32,
}

impl TransportControl {
    pub fn new() -> Self {
        Self {
            rolling: AtomicBool::new(false),
            reposition: Mutex::new(None),
            timebase_master: AtomicBool::new(true),
            sync_timeout_ms: AtomicU32::new(2000),
        }
    }

    pub fn state(&self) -> TransportState {
        if self.rolling.load(Ordering::Relaxed) {
            TransportState::Rolling
        } else {
            TransportState::Stopped
        }
    }

    pub fn start(&self) {
        self.rolling.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.rolling.store(false, Ordering::Relaxed);
    }

    pub fn toggle(&self) {
        self.rolling.fetch_xor(true, Ordering::Relaxed);
    }

    /// Stage a relocation to an absolute transport frame; BBT is derived by
    /// the timebase callback next period.
    pub fn locate(&self, frame: u64) {
        *self.reposition.lock() = Some(TransportPosition::at_frame(frame));
    }

    /// Stage a relocation expressed in BBT.
    pub fn locate_bbt(&self, bar: u32, beat: u32, tick: u32) {
        *self.reposition.lock() = Some(TransportPosition::at_bbt(bar, beat, tick));
    }

    /// Consume the staged reposition, if any. Called once per period by the
    /// realtime cycle.
    pub fn take_reposition(&self) -> Option<TransportPosition> {
        self.reposition.try_lock().and_then(|mut slot| slot.take())
    }

    pub fn request_timebase(&self) -> bool {
        self.timebase_master.store(true, Ordering::Relaxed);
        true
    }

    pub fn release_timebase(&self) {
        self.timebase_master.store(false, Ordering::Relaxed);
    }

    pub fn is_timebase_master(&self) -> bool {
        self.timebase_master.load(Ordering::Relaxed)
    }

    pub fn set_sync_timeout(&self, timeout_ms: u32) {
        self.sync_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    pub fn sync_timeout(&self) -> u32 {
        self.sync_timeout_ms.load(Ordering::Relaxed)
    }
}
