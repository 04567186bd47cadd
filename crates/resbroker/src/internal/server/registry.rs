use parking_lot::RwLock;

use crate::internal::server::request::ManagedRequestRef;
use crate::{Map, RequestId};

/// Live requests visible to callers.
///
/// Written by the admission path and the assigner, read by queries from any thread.
#[derive(Default)]
pub(crate) struct RequestRegistry {
    requests: RwLock<Map<RequestId, ManagedRequestRef>>,
}

impl RequestRegistry {
    pub fn insert(&self, request: ManagedRequestRef) {
        let old = self.requests.write().insert(request.id(), request);
        assert!(old.is_none());
    }

    pub fn remove(&self, request_id: RequestId) -> Option<ManagedRequestRef> {
        self.requests.write().remove(&request_id)
    }

    pub fn get(&self, request_id: RequestId) -> Option<ManagedRequestRef> {
        self.requests.read().get(&request_id).cloned()
    }

    /// All live requests ordered by their id.
    pub fn all(&self) -> Vec<ManagedRequestRef> {
        let mut requests: Vec<_> = self.requests.read().values().cloned().collect();
        requests.sort_unstable_by_key(|r| r.id());
        requests
    }
}
