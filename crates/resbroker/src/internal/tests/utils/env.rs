use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{AuthorizationStore, MemoryAuthorizationStore};
use crate::events::BrokerEvent;
use crate::internal::scheduler::assign::{run_backlog_scan, try_assign_resource};
use crate::internal::server::comm::Comm;
use crate::internal::server::core::Core;
use crate::internal::server::reactor::{
    on_cancel_request, on_new_request, on_resource_added, on_resource_orphaned,
    on_resource_removed, on_resource_state_changed, on_resync, reap_abandoned,
};
use crate::internal::server::registry::RequestRegistry;
use crate::internal::server::request::{ManagedRequest, ManagedRequestRef, RequestState};
use crate::inventory::{Resource, ResourceRef, ResourceState};
use crate::local::LocalResource;
use crate::request::ResourceRequest;
use crate::{RequestId, ResourceId};

#[derive(Default)]
pub struct TestComm {
    pub events: Vec<BrokerEvent>,
    pub evictions: Vec<RequestId>,
    pub need_rescan: bool,
}

impl TestComm {
    pub fn take_state_changes(&mut self) -> Vec<(RequestId, RequestState, RequestState)> {
        let mut changes = Vec::new();
        self.events.retain(|event| match event {
            BrokerEvent::RequestStateChanged {
                request,
                previous,
                new,
            } => {
                changes.push((request.id(), *previous, *new));
                false
            }
            _ => true,
        });
        changes
    }

    pub fn take_cancelled(&mut self) -> Vec<RequestId> {
        let mut cancelled = Vec::new();
        self.events.retain(|event| match event {
            BrokerEvent::RequestCancelled(request) => {
                cancelled.push(request.id());
                false
            }
            _ => true,
        });
        cancelled
    }

    pub fn take_evictions(&mut self, len: usize) -> Vec<RequestId> {
        assert_eq!(self.evictions.len(), len);
        std::mem::take(&mut self.evictions)
    }

    pub fn emptiness_check(&self) {
        assert!(self.events.is_empty(), "Unexpected events: {:?}", self.events);
        assert!(self.evictions.is_empty());
    }
}

impl Comm for TestComm {
    fn publish(&mut self, event: BrokerEvent) {
        self.events.push(event);
    }

    fn schedule_eviction(&mut self, request_id: RequestId) {
        self.evictions.push(request_id);
    }

    fn ask_for_rescan(&mut self) {
        self.need_rescan = true;
    }
}

/// Drives the reactor and the assigner synchronously, without the assigner task.
pub struct TestEnv {
    core: Core,
    pub comm: TestComm,
    auth: Arc<MemoryAuthorizationStore>,
    request_id_counter: u64,
    pub start: Instant,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> TestEnv {
        let auth = Arc::new(MemoryAuthorizationStore::new());
        Self::with_store(auth.clone(), auth)
    }

    pub fn with_store(
        auth: Arc<MemoryAuthorizationStore>,
        store: Arc<dyn AuthorizationStore>,
    ) -> TestEnv {
        TestEnv {
            core: Core::new(Arc::new(RequestRegistry::default()), store),
            comm: TestComm::default(),
            auth,
            request_id_counter: 0,
            start: Instant::now(),
        }
    }

    pub fn core(&mut self) -> &mut Core {
        &mut self.core
    }

    pub fn auth(&self) -> &MemoryAuthorizationStore {
        &self.auth
    }

    pub fn authorize(&self, user: &str, resource_type: &str, max_resources: u32, nice_level: i32) {
        self.auth
            .add_authorization(user, resource_type, max_resources, nice_level);
    }

    pub fn new_resource(&mut self, id: u64, state: ResourceState) -> Arc<LocalResource> {
        self.new_resource_of_type(id, "mock", state)
    }

    pub fn new_resource_of_type(
        &mut self,
        id: u64,
        resource_type: &str,
        state: ResourceState,
    ) -> Arc<LocalResource> {
        let resource = LocalResource::with_state(id, resource_type, state);
        on_resource_added(&mut self.core, resource.clone());
        resource
    }

    /// Changes the live state of the resource and delivers the matching event.
    pub fn change_state(&mut self, resource: &LocalResource, new: ResourceState) {
        let previous = resource.state();
        resource.set_state(new);
        on_resource_state_changed(&mut self.core, &mut self.comm, resource.id(), previous, new);
    }

    /// Delivers a state change event without touching the resource.
    pub fn resource_event(&mut self, resource_id: u64, previous: ResourceState, new: ResourceState) {
        on_resource_state_changed(&mut self.core, &mut self.comm, resource_id.into(), previous, new);
    }

    pub fn resync(&mut self, snapshot: Vec<ResourceRef>) {
        on_resync(&mut self.core, &mut self.comm, snapshot);
    }

    pub fn orphan(&mut self, resource_id: u64) {
        on_resource_orphaned(&mut self.core, &mut self.comm, resource_id.into());
    }

    pub fn remove_resource(&mut self, resource_id: u64) {
        on_resource_removed(&mut self.core, &mut self.comm, resource_id.into());
    }

    pub fn submit(&mut self, request: ResourceRequest) -> ManagedRequestRef {
        self.submit_at(request, Duration::ZERO)
    }

    /// Submits a request created `offset` after the start of the environment.
    pub fn submit_at(&mut self, request: ResourceRequest, offset: Duration) -> ManagedRequestRef {
        self.request_id_counter += 1;
        let managed = ManagedRequest::new(
            self.request_id_counter.into(),
            request,
            self.start + offset,
            None,
        );
        self.core.registry().insert(managed.clone());
        on_new_request(&mut self.core, managed.clone());
        managed
    }

    /// Delivers the message sent by a cancelled request handle.
    pub fn cancel_message(&mut self, request_id: RequestId) {
        on_cancel_request(&mut self.core, &mut self.comm, request_id);
    }

    pub fn reap(&mut self, now: Instant, timeout: Duration) {
        reap_abandoned(&mut self.core, &mut self.comm, now, timeout);
    }

    pub fn request(&self, user: &str) -> ResourceRequest {
        ResourceRequest::new(user, "mock")
    }

    /// Offers the resource to waiting requests at `start + at`.
    pub fn assign(&mut self, resource_id: u64, at: Duration) -> bool {
        try_assign_resource(
            &mut self.core,
            &mut self.comm,
            resource_id.into(),
            self.start + at,
        )
    }

    /// Offers all queued resources, as the assigner does after draining events.
    pub fn offer_queued(&mut self, at: Duration) -> Vec<ResourceId> {
        let mut granted = Vec::new();
        while let Some(resource_id) = self.core.pop_queued_resource() {
            if try_assign_resource(&mut self.core, &mut self.comm, resource_id, self.start + at) {
                granted.push(resource_id);
            }
        }
        granted
    }

    pub fn scan(&mut self, at: Duration) -> usize {
        run_backlog_scan(&mut self.core, &mut self.comm, self.start + at)
    }

    pub fn holder_of(&self, resource_id: u64) -> Option<RequestId> {
        self.core
            .get_resource(resource_id.into())
            .and_then(|entry| entry.holder)
    }
}
