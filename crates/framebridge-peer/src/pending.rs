use std::collections::HashMap;
use std::fmt;

use framebridge_envelope::Payload;

use crate::error::RequestError;

/// One-shot continuation receiving the outcome of a request.
pub type Completion = Box<dyn FnOnce(std::result::Result<Payload, RequestError>)>;

/// Bookkeeping for one request awaiting its reply.
pub struct PendingRecord {
    pub action: String,
    /// Navigation generation when the request was sent.
    pub generation: u64,
    pub created_ms: u64,
    pub deadline_ms: u64,
    pub completion: Completion,
}

impl fmt::Debug for PendingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRecord")
            .field("action", &self.action)
            .field("generation", &self.generation)
            .field("created_ms", &self.created_ms)
            .field("deadline_ms", &self.deadline_ms)
            .finish_non_exhaustive()
    }
}

/// Requests in flight, keyed by `request_uuid`.
///
/// A record leaves the table exactly once, either through [`take`](Self::take)
/// when its reply arrives or through [`take_expired`](Self::take_expired).
#[derive(Debug, Default)]
pub struct PendingTable {
    records: HashMap<String, PendingRecord>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request. Returns the record back if the id is already live.
    pub fn insert(
        &mut self,
        request_uuid: String,
        record: PendingRecord,
    ) -> std::result::Result<(), PendingRecord> {
        if self.records.contains_key(&request_uuid) {
            return Err(record);
        }
        self.records.insert(request_uuid, record);
        Ok(())
    }

    pub fn take(&mut self, request_uuid: &str) -> Option<PendingRecord> {
        self.records.remove(request_uuid)
    }

    /// Remove every record whose deadline is at or before `now_ms`, earliest first.
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<(String, PendingRecord)> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.deadline_ms <= now_ms)
            .map(|(id, _)| id.clone())
            .collect();

        let mut taken: Vec<(String, PendingRecord)> = expired
            .into_iter()
            .filter_map(|id| self.records.remove(&id).map(|record| (id, record)))
            .collect();
        taken.sort_by_key(|(_, record)| (record.deadline_ms, record.created_ms));
        taken
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.records.values().map(|record| record.deadline_ms).min()
    }

    pub fn contains(&self, request_uuid: &str) -> bool {
        self.records.contains_key(request_uuid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
