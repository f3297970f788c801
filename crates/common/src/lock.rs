//! Interpretation of the dashboard's settlement-lock panel
//!
//! The panel (`#settlementActivity`) is the only place the UI exposes the
//! backend's distributed lock. Readings are derived purely from its rendered
//! text, so a change in the panel wording silently changes what is detected.

use serde::{Deserialize, Serialize};

/// Text shown while the lock is held
pub const ACTIVE_MARKER: &str = "Redis Lock Active";
/// Text shown shortly after a short-lived hold, so it is not missed between polls
pub const RECENTLY_ACTIVE_MARKER: &str = "Redis Lock Recently Active";
/// Text shown when nobody holds the lock
pub const RELEASED_MARKER: &str = "No Lock Held";
/// Prefix of each rendered holder annotation
pub const HOLDER_MARKER: &str = "Holder:";

/// What the panel said the lock was doing at one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Active,
    RecentlyActive,
    Released,
    Unknown,
}

impl LockState {
    pub fn is_active(&self) -> bool {
        matches!(self, LockState::Active | LockState::RecentlyActive)
    }
}

/// One observation of the lock panel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockPanelReading {
    pub state: LockState,
    /// Number of holder annotations rendered at once
    pub holder_markers: usize,
    /// Holder label of the first annotation, if any
    pub holder: Option<String>,
}

impl LockPanelReading {
    pub fn from_text(text: &str) -> Self {
        let state = if text.contains(RECENTLY_ACTIVE_MARKER) {
            LockState::RecentlyActive
        } else if text.contains(ACTIVE_MARKER) {
            LockState::Active
        } else if text.contains(RELEASED_MARKER) {
            LockState::Released
        } else {
            LockState::Unknown
        };

        let holder_markers = text.matches(HOLDER_MARKER).count();
        let holder = text.split(HOLDER_MARKER).nth(1).and_then(|rest| {
            rest.lines()
                .next()
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
        });

        Self {
            state,
            holder_markers,
            holder,
        }
    }

    pub fn shows_multiple_holders(&self) -> bool {
        self.holder_markers > 1
    }
}
