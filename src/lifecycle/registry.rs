//! Active working set of announced, non-archived requisitions.
//!
//! An explicit repository object rather than ambient global state, so the
//! lifecycle can be handed a fresh one in tests. Entries carry their own
//! async mutex: signals for the same message handle serialize on it while
//! different requisitions proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::requisition::{MessageHandle, Requisition, RequisitionStatus};

/// A live requisition plus the lifecycle's sub-protocol sequencing flags.
#[derive(Debug)]
pub struct ActiveEntry {
    pub req: Requisition,
    /// Set when the completion-details collection has been triggered.
    /// Guards the sub-protocol against running more than once.
    pub details_requested: bool,
    /// Set when collection finished (reply or timeout). Archival re-checks
    /// the completion condition once this is true, so a late accepter can
    /// hold archival open without re-running collection.
    pub details_done: bool,
}

impl ActiveEntry {
    pub fn new(req: Requisition) -> Self {
        Self {
            req,
            details_requested: false,
            details_done: false,
        }
    }
}

/// The working set, keyed by message handle. Owned by the lifecycle; the
/// lifecycle is the sole writer of the requisitions inside.
#[derive(Default)]
pub struct ActiveSet {
    inner: DashMap<MessageHandle, Arc<Mutex<ActiveEntry>>>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an announced requisition. The requisition must already carry
    /// its message handle; returns false (and does not insert) otherwise.
    pub fn insert(&self, req: Requisition) -> bool {
        let Some(handle) = req.message_handle else {
            return false;
        };
        self.inner
            .insert(handle, Arc::new(Mutex::new(ActiveEntry::new(req))));
        true
    }

    /// Track a requisition loaded back from the store after a restart,
    /// deriving the sub-protocol flags from its persisted state: details
    /// collection counts as triggered once the status reached
    /// awaiting-details, and as finished once details text was persisted.
    pub fn insert_restored(&self, req: Requisition) -> bool {
        let Some(handle) = req.message_handle else {
            return false;
        };
        let details_requested = req.status != RequisitionStatus::Open
            && req.status != RequisitionStatus::Draft;
        let details_done = !req.completion_details.is_empty();
        self.inner.insert(
            handle,
            Arc::new(Mutex::new(ActiveEntry {
                req,
                details_requested,
                details_done,
            })),
        );
        true
    }

    pub fn get(&self, handle: MessageHandle) -> Option<Arc<Mutex<ActiveEntry>>> {
        self.inner.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, handle: MessageHandle) -> Option<Arc<Mutex<ActiveEntry>>> {
        self.inner.remove(&handle).map(|(_, entry)| entry)
    }

    pub fn contains(&self, handle: MessageHandle) -> bool {
        self.inner.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requisition::{CommunityId, ParticipantId, RequisitionStatus};
    use chrono::Utc;

    fn requisition(handle: Option<MessageHandle>) -> Requisition {
        Requisition {
            id: 1,
            community: CommunityId(10),
            requester: ParticipantId(100),
            material: "Iron".to_string(),
            quantity: 50,
            payment: "gold".to_string(),
            deadline: Utc::now(),
            region: "Central".to_string(),
            accepted_by: Vec::new(),
            completed_by: Vec::new(),
            completion_details: String::new(),
            status: RequisitionStatus::Open,
            message_handle: handle,
        }
    }

    #[test]
    fn insert_requires_a_handle() {
        let set = ActiveSet::new();
        assert!(!set.insert(requisition(None)));
        assert!(set.is_empty());

        assert!(set.insert(requisition(Some(MessageHandle(5)))));
        assert_eq!(set.len(), 1);
        assert!(set.contains(MessageHandle(5)));
    }

    #[tokio::test]
    async fn entries_start_with_clear_flags() {
        let set = ActiveSet::new();
        set.insert(requisition(Some(MessageHandle(5))));
        let entry = set.get(MessageHandle(5)).unwrap();
        let guard = entry.lock().await;
        assert!(!guard.details_requested);
        assert!(!guard.details_done);
    }

    #[tokio::test]
    async fn restored_entries_derive_their_flags() {
        let set = ActiveSet::new();

        let mut awaiting = requisition(Some(MessageHandle(1)));
        awaiting.status = RequisitionStatus::AwaitingDetails;
        awaiting.completion_details = "left at depot".to_string();
        set.insert_restored(awaiting);

        let entry = set.get(MessageHandle(1)).unwrap();
        let guard = entry.lock().await;
        assert!(guard.details_requested);
        assert!(guard.details_done);
        drop(guard);

        let open = requisition(Some(MessageHandle(2)));
        set.insert_restored(open);
        let entry = set.get(MessageHandle(2)).unwrap();
        let guard = entry.lock().await;
        assert!(!guard.details_requested);
        assert!(!guard.details_done);
    }

    #[test]
    fn remove_untracks_the_handle() {
        let set = ActiveSet::new();
        set.insert(requisition(Some(MessageHandle(5))));
        assert!(set.remove(MessageHandle(5)).is_some());
        assert!(!set.contains(MessageHandle(5)));
        assert!(set.remove(MessageHandle(5)).is_none());
    }
}
