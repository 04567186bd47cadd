use std::collections::VecDeque;
use std::sync::Arc;

use crate::auth::AuthorizationStore;
use crate::internal::server::registry::RequestRegistry;
use crate::internal::server::request::{ManagedRequestRef, RequestState};
use crate::internal::server::resource::ResourceEntry;
use crate::inventory::ResourceRef;
use crate::{Map, RequestId, ResourceId, ResourceType, Set, UserId};

/// Assignment state owned by the assigner task.
pub(crate) struct Core {
    requests: Map<RequestId, ManagedRequestRef>,
    backlog: Set<RequestId>,
    resources: Map<ResourceId, ResourceEntry>,
    // Resources that became available and were not offered yet
    resource_queue: VecDeque<ResourceId>,
    // Set when a request entered the backlog since the last scan
    backlog_grew: bool,
    registry: Arc<RequestRegistry>,
    auth_store: Arc<dyn AuthorizationStore>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UserLoad {
    pub working: u32,
    /// Requests holding a resource, READY or WORKING.
    pub holding: u32,
}

impl Core {
    pub fn new(registry: Arc<RequestRegistry>, auth_store: Arc<dyn AuthorizationStore>) -> Self {
        Core {
            requests: Default::default(),
            backlog: Default::default(),
            resources: Default::default(),
            resource_queue: Default::default(),
            backlog_grew: false,
            registry,
            auth_store,
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    #[inline]
    pub fn auth_store(&self) -> &dyn AuthorizationStore {
        self.auth_store.as_ref()
    }

    pub fn add_request(&mut self, request: ManagedRequestRef) {
        let request_id = request.id();
        if request.is_waiting() {
            self.backlog.insert(request_id);
            self.backlog_grew = true;
        }
        assert!(self.requests.insert(request_id, request).is_none());
    }

    #[inline]
    pub fn get_request(&self, request_id: RequestId) -> Option<&ManagedRequestRef> {
        self.requests.get(&request_id)
    }

    /// Forgets the request entirely, including the live set visible to callers.
    pub fn remove_request(&mut self, request_id: RequestId) -> Option<ManagedRequestRef> {
        self.backlog.remove(&request_id);
        self.registry.remove(request_id);
        self.requests.remove(&request_id)
    }

    pub fn requests(&self) -> impl Iterator<Item = &ManagedRequestRef> {
        self.requests.values()
    }

    pub fn take_requests(&mut self) -> Vec<ManagedRequestRef> {
        self.backlog.clear();
        self.requests.drain().map(|(_, r)| r).collect()
    }

    #[inline]
    pub fn add_to_backlog(&mut self, request_id: RequestId) {
        debug_assert!(self.requests.contains_key(&request_id));
        self.backlog.insert(request_id);
        self.backlog_grew = true;
    }

    /// Returns `true` once for every batch of requests added to the backlog.
    #[inline]
    pub fn take_backlog_grew(&mut self) -> bool {
        std::mem::take(&mut self.backlog_grew)
    }

    #[inline]
    pub fn remove_from_backlog(&mut self, request_id: RequestId) -> bool {
        self.backlog.remove(&request_id)
    }

    #[inline]
    pub fn is_in_backlog(&self, request_id: RequestId) -> bool {
        self.backlog.contains(&request_id)
    }

    #[inline]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Waiting requests competing for resources of the given type.
    pub fn waiting_requests(&self, resource_type: &ResourceType) -> Vec<ManagedRequestRef> {
        self.backlog
            .iter()
            .filter_map(|id| self.requests.get(id))
            .filter(|r| r.resource_type() == resource_type && r.is_waiting())
            .cloned()
            .collect()
    }

    pub fn has_demand_for(&self, resource_type: &ResourceType) -> bool {
        self.backlog
            .iter()
            .filter_map(|id| self.requests.get(id))
            .any(|r| r.resource_type() == resource_type)
    }

    pub fn user_loads(&self, resource_type: &ResourceType) -> Map<UserId, UserLoad> {
        let mut loads: Map<UserId, UserLoad> = Map::new();
        for request in self.requests.values() {
            if request.resource_type() != resource_type {
                continue;
            }
            let state = request.state();
            if !state.holds_resource() {
                continue;
            }
            let load = loads.entry(request.user().clone()).or_default();
            load.holding += 1;
            if state == RequestState::Working {
                load.working += 1;
            }
        }
        loads
    }

    /// Inserts a new resource or refreshes the handle of a known one.
    pub fn add_resource(&mut self, resource: ResourceRef) -> &mut ResourceEntry {
        let resource_id = resource.id();
        let entry = self
            .resources
            .entry(resource_id)
            .or_insert_with(|| ResourceEntry::new(resource.clone()));
        entry.observed = resource.state();
        entry.resource = resource;
        entry
    }

    #[inline]
    pub fn get_resource(&self, resource_id: ResourceId) -> Option<&ResourceEntry> {
        self.resources.get(&resource_id)
    }

    #[inline]
    pub fn get_resource_mut(&mut self, resource_id: ResourceId) -> Option<&mut ResourceEntry> {
        self.resources.get_mut(&resource_id)
    }

    pub fn remove_resource(&mut self, resource_id: ResourceId) -> Option<ResourceEntry> {
        self.resource_queue.retain(|id| *id != resource_id);
        self.resources.remove(&resource_id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.resources.values()
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.resources.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn count_resources(&self, resource_type: &ResourceType) -> usize {
        self.resources
            .values()
            .filter(|e| e.resource_type() == resource_type)
            .count()
    }

    pub fn queue_resource(&mut self, resource_id: ResourceId) {
        if !self.resource_queue.contains(&resource_id) {
            self.resource_queue.push_back(resource_id);
        }
    }

    #[inline]
    pub fn pop_queued_resource(&mut self) -> Option<ResourceId> {
        self.resource_queue.pop_front()
    }

    #[inline]
    pub fn has_queued_resources(&self) -> bool {
        !self.resource_queue.is_empty()
    }

    pub fn clear_resources(&mut self) -> Vec<ResourceEntry> {
        self.resource_queue.clear();
        self.resources.drain().map(|(_, e)| e).collect()
    }
}
