//! Public entry point of the broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedSender, channel, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthorizationStore;
use crate::config::BrokerConfig;
use crate::events::{BrokerEvent, EventProcessor, event_dispatch_loop};
use crate::internal::scheduler::main::{Assigner, AssignerInputs, ToAssigner};
use crate::internal::server::comm::CommSender;
use crate::internal::server::core::Core;
use crate::internal::server::registry::RequestRegistry;
use crate::internal::server::request::{ManagedRequest, ManagedRequestRef, RequestState};
use crate::inventory::{InventorySink, ResourceInventory, ResourceState};
use crate::request::ResourceRequest;
use crate::{Error, RequestId, ResourceId, Set};

/// Counters describing the current load of the broker.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerOverview {
    pub waiting_requests: usize,
    pub ready_requests: usize,
    pub working_requests: usize,
    pub finished_requests: usize,
    pub orphaned_requests: usize,
    pub cancelled_requests: usize,
    /// Resources in READY state that nobody holds.
    pub idle_resources: usize,
    pub total_resources: usize,
}

#[derive(Clone)]
struct Channels {
    inventory: Arc<dyn ResourceInventory>,
    to_assigner: UnboundedSender<ToAssigner>,
    events: Option<UnboundedSender<BrokerEvent>>,
}

struct RunningBroker {
    channels: Channels,
    token: CancellationToken,
    assigner: JoinHandle<()>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Admits resource requests and hands them to the assigner.
///
/// The manager is an explicit instance; share it behind an `Arc` with everything
/// that needs to submit or inspect requests. [`ResourceManager::start`] has to be
/// called from within a tokio runtime.
pub struct ResourceManager {
    config: BrokerConfig,
    auth_store: Arc<dyn AuthorizationStore>,
    event_processor: Option<Arc<dyn EventProcessor>>,
    registry: Arc<RequestRegistry>,
    request_id_counter: AtomicU64,
    running: Mutex<Option<RunningBroker>>,
}

impl ResourceManager {
    pub fn new(config: BrokerConfig, auth_store: Arc<dyn AuthorizationStore>) -> Self {
        ResourceManager {
            config,
            auth_store,
            event_processor: None,
            registry: Default::default(),
            request_id_counter: AtomicU64::new(0),
            running: Mutex::new(None),
        }
    }

    pub fn set_event_processor(&mut self, processor: Arc<dyn EventProcessor>) {
        self.event_processor = Some(processor);
    }

    #[inline]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Subscribes to the inventory and spawns the assigner.
    pub fn start(&self, inventory: Arc<dyn ResourceInventory>) -> crate::Result<()> {
        self.config.validate()?;
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let (event_sender, resource_events) = channel(self.config.event_channel_capacity);
        let overflow = Arc::new(AtomicBool::new(false));
        let wakeup = Arc::new(Notify::new());
        inventory.subscribe(InventorySink::new(
            event_sender,
            overflow.clone(),
            wakeup.clone(),
        ));

        let (to_assigner, messages) = unbounded_channel();
        let (events, dispatcher) = match &self.event_processor {
            Some(processor) => {
                let (sender, receiver) = unbounded_channel();
                let handle = tokio::spawn(event_dispatch_loop(receiver, processor.clone()));
                (Some(sender), Some(handle))
            }
            None => (None, None),
        };

        let core = Core::new(self.registry.clone(), self.auth_store.clone());
        let assigner = Assigner::new(
            core,
            CommSender::new(events.clone()),
            inventory.clone(),
            self.config.clone(),
        );
        let token = CancellationToken::new();
        let inputs = AssignerInputs {
            resource_events,
            messages,
            overflow,
            wakeup,
        };
        let assigner = tokio::spawn(assigner.run(inputs, token.clone()));

        *running = Some(RunningBroker {
            channels: Channels {
                inventory,
                to_assigner,
                events,
            },
            token,
            assigner,
            dispatcher,
        });
        log::info!("Resource broker started");
        Ok(())
    }

    /// Stops the assigner; all requests still waiting fail with [`Error::Shutdown`].
    pub async fn shutdown(&self) -> crate::Result<()> {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return Err(Error::NotRunning);
        };
        log::info!("Resource broker is shutting down");
        running.token.cancel();
        if let Err(error) = running.assigner.await {
            log::error!("Assigner task failed: {error}");
        }
        for request in self.registry.all() {
            request.resolve_shutdown();
        }
        drop(running.channels);
        if let Some(dispatcher) = running.dispatcher {
            if let Err(error) = dispatcher.await {
                log::error!("Event dispatcher failed: {error}");
            }
        }
        log::info!("Resource broker stopped");
        Ok(())
    }

    /// Admits a request.
    ///
    /// Fails with [`Error::NoMatchingResourceType`] when the inventory has no
    /// resource of the requested type and with [`Error::InsufficientPrivileges`]
    /// when the user has no quota for it or the authorizations cannot be read.
    pub fn submit(&self, request: ResourceRequest) -> crate::Result<ManagedRequestRef> {
        let channels = self.channels()?;
        let resource_type = &request.resource_type;

        if channels.inventory.count_resources(resource_type) == 0 {
            return Err(Error::NoMatchingResourceType(resource_type.clone()));
        }
        let authorizations = self.auth_store.load(resource_type).map_err(|error| {
            log::warn!("Could not load authorizations for {resource_type}: {error}");
            Error::InsufficientPrivileges(format!(
                "authorizations for resource type {resource_type} are not available"
            ))
        })?;
        let has_access = authorizations
            .as_ref()
            .and_then(|auths| auths.get(&request.user))
            .is_some_and(|auth| auth.grants_access());
        if !has_access {
            return Err(Error::InsufficientPrivileges(format!(
                "user {} cannot use resources of type {resource_type}",
                request.user
            )));
        }

        let request_id = RequestId::new(self.request_id_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let managed = ManagedRequest::new(
            request_id,
            request,
            Instant::now(),
            Some(channels.to_assigner.clone()),
        );
        log::debug!(
            "Request id={request_id} user={} type={} admitted",
            managed.user(),
            managed.resource_type()
        );
        self.registry.insert(managed.clone());
        if let Some(events) = &channels.events {
            let _ = events.send(BrokerEvent::RequestReceived(managed.clone()));
        }
        if channels
            .to_assigner
            .send(ToAssigner::NewRequest(managed.clone()))
            .is_err()
        {
            self.registry.remove(request_id);
            return Err(Error::NotRunning);
        }
        Ok(managed)
    }

    /// Cancels a request that has no resource yet. Returns `false` otherwise.
    ///
    /// A cancelled request leaves the live set at once instead of waiting for
    /// eviction, so `query` no longer finds it; the handle keeps reporting
    /// [`RequestState::Cancelled`].
    pub fn cancel(&self, request: &ManagedRequestRef) -> bool {
        if !request.cancel() {
            return false;
        }
        self.registry.remove(request.id());
        true
    }

    /// Ends the use of a granted resource.
    ///
    /// The resource goes through IN_USE back to READY, which finishes the
    /// request and offers the resource to others.
    pub fn release(&self, request: &ManagedRequestRef) -> bool {
        if !request.state().holds_resource() {
            return false;
        }
        let Some(resource) = request.resource() else {
            return false;
        };
        log::debug!(
            "Releasing resource id={} of request id={}",
            resource.id(),
            request.id()
        );
        if resource.state() == ResourceState::Ready {
            resource.start_using();
        }
        resource.stop_using();
        true
    }

    pub fn query(&self, request_id: RequestId) -> Option<ManagedRequestRef> {
        self.registry.get(request_id)
    }

    /// All live requests ordered by id.
    pub fn query_all(&self) -> Vec<ManagedRequestRef> {
        self.registry.all()
    }

    pub fn overview(&self) -> BrokerOverview {
        let requests = self.registry.all();
        let mut overview = BrokerOverview::default();
        let mut held: Set<ResourceId> = Set::new();
        for request in &requests {
            let state = request.state();
            match state {
                RequestState::Waiting => overview.waiting_requests += 1,
                RequestState::Ready => overview.ready_requests += 1,
                RequestState::Working => overview.working_requests += 1,
                RequestState::Finished => overview.finished_requests += 1,
                RequestState::Orphaned => overview.orphaned_requests += 1,
                RequestState::Cancelled => overview.cancelled_requests += 1,
            }
            if state.holds_resource() {
                if let Some(resource) = request.resource() {
                    held.insert(resource.id());
                }
            }
        }
        if let Ok(channels) = self.channels() {
            let resources = channels.inventory.resources();
            overview.total_resources = resources.len();
            overview.idle_resources = resources
                .iter()
                .filter(|r| r.state() == ResourceState::Ready && !held.contains(&r.id()))
                .count();
        }
        overview
    }

    fn channels(&self) -> crate::Result<Channels> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.channels.clone())
            .ok_or(Error::NotRunning)
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}
