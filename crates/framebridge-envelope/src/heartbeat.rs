use serde::{Deserialize, Serialize};

/// Liveness record written by the tab that hosts the session frame.
///
/// Stored as `{"time": <epoch-ms>}` under [`HEARTBEAT_KEY`](crate::HEARTBEAT_KEY).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub time: u64,
}

impl HeartbeatRecord {
    pub fn new(time: u64) -> Self {
        Self { time }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"time\":{}}}", self.time))
    }

    /// Parse a stored record. Anything unreadable counts as no record.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Whether the owner should still be considered alive at `now`.
    ///
    /// A record is live while `|now - time| <= interval + overlap`. The same
    /// tolerance bounds clock skew: a record stamped further in the future
    /// than that is treated as stale.
    pub fn is_fresh(&self, now: u64, interval_ms: u64, overlap_ms: u64) -> bool {
        let tolerance = interval_ms.saturating_add(overlap_ms);
        if self.time > now {
            return self.time - now <= tolerance;
        }
        now - self.time <= tolerance
    }
}
