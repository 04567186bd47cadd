//! Boundary towards the resource inventory.
//!
//! The broker never owns resources. It consumes an inventory that can enumerate
//! resource groups and their resources, and that reports changes through an
//! [`InventorySink`]. The sink feeds a bounded channel drained by the assigner,
//! so inventory callbacks never touch assignment state directly.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;

use crate::{GroupId, ResourceId, ResourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    Disconnected,
    Ready,
    InUse,
    Error,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Disconnected => write!(f, "DISCONNECTED"),
            ResourceState::Ready => write!(f, "READY"),
            ResourceState::InUse => write!(f, "IN_USE"),
            ResourceState::Error => write!(f, "ERROR"),
        }
    }
}

/// A unit of shared capacity. Implementations must be cheap to query, the
/// assigner re-reads `state()` right before it commits a grant.
pub trait Resource: Send + Sync + fmt::Debug {
    fn id(&self) -> ResourceId;
    fn resource_type(&self) -> &ResourceType;
    fn state(&self) -> ResourceState;

    /// Marks the resource as actively used by its holder.
    fn start_using(&self);

    /// Ends the active use; a healthy resource returns to `Ready`.
    fn stop_using(&self);
}

pub type ResourceRef = Arc<dyn Resource>;

pub trait ResourceGroup: Send + Sync {
    fn id(&self) -> GroupId;
    fn resource_type(&self) -> &ResourceType;
    fn resources(&self) -> Vec<ResourceRef>;
}

pub trait ResourceInventory: Send + Sync {
    fn groups(&self) -> Vec<Arc<dyn ResourceGroup>>;

    /// Registers a sink that receives every later change of the inventory.
    fn subscribe(&self, sink: InventorySink);

    fn resources(&self) -> Vec<ResourceRef> {
        self.groups()
            .iter()
            .flat_map(|group| group.resources())
            .collect()
    }

    fn count_resources(&self, resource_type: &ResourceType) -> usize {
        self.groups()
            .iter()
            .flat_map(|group| group.resources())
            .filter(|resource| resource.resource_type() == resource_type)
            .count()
    }
}

#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Added(ResourceRef),
    Removed(ResourceId),
    StateChanged {
        resource_id: ResourceId,
        previous: ResourceState,
        new: ResourceState,
    },
    /// The holder of the resource disappeared without releasing it.
    Orphaned(ResourceId),
}

/// Producer side of the assigner's resource event channel.
///
/// Sending never blocks. When the channel is full the event is dropped and the
/// assigner is told to resynchronize its view from the inventory.
#[derive(Clone)]
pub struct InventorySink {
    sender: Sender<ResourceEvent>,
    overflow: Arc<AtomicBool>,
    wakeup: Arc<Notify>,
}

impl InventorySink {
    pub(crate) fn new(
        sender: Sender<ResourceEvent>,
        overflow: Arc<AtomicBool>,
        wakeup: Arc<Notify>,
    ) -> Self {
        InventorySink {
            sender,
            overflow,
            wakeup,
        }
    }

    pub fn send(&self, event: ResourceEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Resource event channel is full, dropping {event:?}");
                self.overflow.store(true, Ordering::SeqCst);
                self.wakeup.notify_one();
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Resource event sent after the assigner stopped");
            }
        }
    }

    pub fn resource_added(&self, resource: ResourceRef) {
        self.send(ResourceEvent::Added(resource));
    }

    pub fn resource_removed(&self, resource_id: ResourceId) {
        self.send(ResourceEvent::Removed(resource_id));
    }

    pub fn state_changed(
        &self,
        resource_id: ResourceId,
        previous: ResourceState,
        new: ResourceState,
    ) {
        if previous != new {
            self.send(ResourceEvent::StateChanged {
                resource_id,
                previous,
                new,
            });
        }
    }

    pub fn orphaned(&self, resource_id: ResourceId) {
        self.send(ResourceEvent::Orphaned(resource_id));
    }

    pub fn group_added(&self, group: &dyn ResourceGroup) {
        for resource in group.resources() {
            self.resource_added(resource);
        }
    }

    pub fn group_removed(&self, group: &dyn ResourceGroup) {
        for resource in group.resources() {
            self.resource_removed(resource.id());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
