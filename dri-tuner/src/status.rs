//! Last-known signal, CableCARD and security state.
//!
//! Written from the event-delivery thread, read by tuning and signal logic.
//! Readers may see a value one event behind.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use parking_lot::RwLock;

use dri_protocol::{CardStatus, DescramblingStatus, PairingStatus};

use crate::device::StateValue;

pub const VAR_PCR_LOCK: &str = "PCRLock";
pub const VAR_LOCK: &str = "Lock";
pub const VAR_CARD_STATUS: &str = "CardStatus";
pub const VAR_CARD_MESSAGE: &str = "CardMessage";
pub const VAR_DESCRAMBLING_STATUS: &str = "DescramblingStatus";
pub const VAR_PAIRING_STATUS: &str = "DrmPairingStatus";
pub const VAR_MMI_MESSAGE: &str = "MMIMessage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub signal_locked: bool,
    pub signal_present: bool,
    pub card: CardStatus,
    pub descrambling: DescramblingStatus,
    pub pairing: PairingStatus,
    /// 0..100.
    pub signal_level: i32,
    pub signal_quality: i32,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            signal_locked: false,
            signal_present: false,
            card: CardStatus::Unknown,
            descrambling: DescramblingStatus::Unknown,
            pairing: PairingStatus::Red,
            signal_level: 0,
            signal_quality: 0,
        }
    }
}

/// Status fed by evented state variables.
pub struct StatusTracker {
    tuner_id: String,
    snapshot: RwLock<StatusSnapshot>,
    scanning: AtomicBool,
}

impl StatusTracker {
    pub fn new(tuner_id: impl Into<String>) -> Self {
        Self {
            tuner_id: tuner_id.into(),
            snapshot: RwLock::new(StatusSnapshot::default()),
            scanning: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        *self.snapshot.read()
    }

    pub fn card_status(&self) -> CardStatus {
        self.snapshot.read().card
    }

    pub fn is_signal_locked(&self) -> bool {
        self.snapshot.read().signal_locked
    }

    /// Mark an out-of-band scan as running or finished.
    pub fn set_scanning(&self, scanning: bool) {
        self.scanning.store(scanning, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Apply one evented variable. Returns whether any field changed.
    ///
    /// Unknown variables and values are logged and dropped.
    pub fn apply(&self, name: &str, value: &StateValue) -> bool {
        match name {
            VAR_PCR_LOCK | VAR_LOCK => {
                if self.is_scanning() {
                    debug!(
                        "[Tuner {}] Ignoring {} = {} while scanning",
                        self.tuner_id, name, value
                    );
                    return false;
                }
                match value.as_bool() {
                    Some(locked) => {
                        self.snapshot.write().signal_locked = locked;
                        debug!("[Tuner {}] Signal locked = {}", self.tuner_id, locked);
                        true
                    }
                    None => self.unparsable(name, value),
                }
            }
            VAR_CARD_STATUS => match value.as_text().map(str::parse::<CardStatus>) {
                Some(Ok(status)) => {
                    let previous = std::mem::replace(&mut self.snapshot.write().card, status);
                    if previous != status {
                        info!(
                            "[Tuner {}] CableCARD status {} -> {}",
                            self.tuner_id, previous, status
                        );
                    }
                    true
                }
                _ => self.unparsable(name, value),
            },
            VAR_CARD_MESSAGE => {
                if let Some(message) = value.as_text().filter(|m| !m.is_empty()) {
                    info!("[Tuner {}] CableCARD message: {}", self.tuner_id, message);
                }
                false
            }
            VAR_DESCRAMBLING_STATUS => {
                match value.as_text().map(str::parse::<DescramblingStatus>) {
                    Some(Ok(status)) => {
                        self.snapshot.write().descrambling = status;
                        debug!("[Tuner {}] Descrambling status = {}", self.tuner_id, status);
                        true
                    }
                    _ => self.unparsable(name, value),
                }
            }
            VAR_PAIRING_STATUS => match value.as_text().map(str::parse::<PairingStatus>) {
                Some(Ok(status)) => {
                    self.snapshot.write().pairing = status;
                    debug!("[Tuner {}] Pairing status = {}", self.tuner_id, status);
                    true
                }
                _ => self.unparsable(name, value),
            },
            _ => {
                debug!(
                    "[Tuner {}] Unhandled state variable {} = {}",
                    self.tuner_id, name, value
                );
                false
            }
        }
    }

    fn unparsable(&self, name: &str, value: &StateValue) -> bool {
        warn!(
            "[Tuner {}] Unrecognised value for {}: {}",
            self.tuner_id, name, value
        );
        false
    }

    /// Record a polled signal reading.
    pub fn record_signal(&self, locked: bool, present: bool, level: i32, quality: i32) {
        let mut snapshot = self.snapshot.write();
        snapshot.signal_locked = locked;
        snapshot.signal_present = present;
        snapshot.signal_level = level;
        snapshot.signal_quality = quality;
    }

    /// Record the lock indicator returned by a tune or an out-of-band check.
    pub fn record_lock(&self, locked: bool) {
        let mut snapshot = self.snapshot.write();
        snapshot.signal_locked = locked;
        snapshot.signal_present = locked;
    }

    /// Forget signal state when a new tune starts.
    pub fn clear_signal(&self) {
        self.record_signal(false, false, 0, 0);
    }
}
