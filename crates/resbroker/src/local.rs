//! In-process inventory.
//!
//! Resources are plain state holders. Once their group is added to a
//! [`LocalInventory`], every state change and orphan notification is forwarded
//! to all sinks subscribed to that inventory.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::inventory::{
    InventorySink, Resource, ResourceGroup, ResourceInventory, ResourceRef, ResourceState,
};
use crate::{GroupId, ResourceId, ResourceType};

type SinkList = Arc<RwLock<Vec<InventorySink>>>;

fn broadcast(sinks: &Option<SinkList>, f: impl Fn(&InventorySink)) {
    if let Some(sinks) = sinks {
        for sink in sinks.read().iter() {
            f(sink);
        }
    }
}

pub struct LocalResource {
    id: ResourceId,
    resource_type: ResourceType,
    state: Mutex<ResourceState>,
    sinks: Mutex<Option<SinkList>>,
}

impl fmt::Debug for LocalResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LocalResource #{} ({}) [{}]",
            self.id,
            self.resource_type,
            self.state.lock()
        )
    }
}

impl LocalResource {
    /// Creates a new resource in the `Disconnected` state.
    pub fn new<I: Into<ResourceId>, T: Into<ResourceType>>(id: I, resource_type: T) -> Arc<Self> {
        Self::with_state(id, resource_type, ResourceState::Disconnected)
    }

    pub fn with_state<I: Into<ResourceId>, T: Into<ResourceType>>(
        id: I,
        resource_type: T,
        state: ResourceState,
    ) -> Arc<Self> {
        Arc::new(LocalResource {
            id: id.into(),
            resource_type: resource_type.into(),
            state: Mutex::new(state),
            sinks: Mutex::new(None),
        })
    }

    pub fn set_state(&self, new: ResourceState) {
        // The lock is held while notifying so that observers see changes in order.
        let mut state = self.state.lock();
        if *state == new {
            return;
        }
        let previous = std::mem::replace(&mut *state, new);
        broadcast(&self.sinks.lock(), |sink| {
            sink.state_changed(self.id, previous, new)
        });
    }

    /// Reports that the current holder vanished without releasing the resource.
    pub fn fire_orphaned(&self) {
        let _state = self.state.lock();
        broadcast(&self.sinks.lock(), |sink| sink.orphaned(self.id));
    }

    fn attach(&self, sinks: Option<SinkList>) {
        *self.sinks.lock() = sinks;
    }
}

impl Resource for LocalResource {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    fn start_using(&self) {
        self.set_state(ResourceState::InUse);
    }

    fn stop_using(&self) {
        if self.state() == ResourceState::InUse {
            self.set_state(ResourceState::Ready);
        }
    }
}

pub struct LocalResourceGroup {
    id: GroupId,
    resource_type: ResourceType,
    resources: RwLock<Vec<Arc<LocalResource>>>,
    sinks: Mutex<Option<SinkList>>,
}

impl LocalResourceGroup {
    pub fn new<I: Into<GroupId>, T: Into<ResourceType>>(id: I, resource_type: T) -> Arc<Self> {
        Arc::new(LocalResourceGroup {
            id: id.into(),
            resource_type: resource_type.into(),
            resources: Default::default(),
            sinks: Mutex::new(None),
        })
    }

    pub fn add_resource(&self, resource: Arc<LocalResource>) {
        assert_eq!(resource.resource_type, self.resource_type);
        let sinks = self.sinks.lock().clone();
        resource.attach(sinks.clone());
        self.resources.write().push(resource.clone());
        broadcast(&sinks, |sink| sink.resource_added(resource.clone()));
    }

    pub fn remove_resource(&self, resource_id: ResourceId) -> Option<Arc<LocalResource>> {
        let resource = {
            let mut resources = self.resources.write();
            let index = resources.iter().position(|r| r.id == resource_id)?;
            resources.remove(index)
        };
        let sinks = self.sinks.lock().clone();
        resource.attach(None);
        broadcast(&sinks, |sink| sink.resource_removed(resource_id));
        Some(resource)
    }

    pub fn local_resources(&self) -> Vec<Arc<LocalResource>> {
        self.resources.read().clone()
    }

    fn attach(&self, sinks: Option<SinkList>) {
        for resource in self.resources.read().iter() {
            resource.attach(sinks.clone());
        }
        *self.sinks.lock() = sinks;
    }
}

impl ResourceGroup for LocalResourceGroup {
    fn id(&self) -> GroupId {
        self.id
    }

    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn resources(&self) -> Vec<ResourceRef> {
        self.resources
            .read()
            .iter()
            .map(|r| r.clone() as ResourceRef)
            .collect()
    }
}

#[derive(Default)]
pub struct LocalInventory {
    groups: RwLock<Vec<Arc<LocalResourceGroup>>>,
    sinks: SinkList,
}

impl LocalInventory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_group(&self, group: Arc<LocalResourceGroup>) {
        group.attach(Some(self.sinks.clone()));
        self.groups.write().push(group.clone());
        for sink in self.sinks.read().iter() {
            sink.group_added(group.as_ref());
        }
    }

    pub fn remove_group(&self, group_id: GroupId) -> Option<Arc<LocalResourceGroup>> {
        let group = {
            let mut groups = self.groups.write();
            let index = groups.iter().position(|g| g.id == group_id)?;
            groups.remove(index)
        };
        for sink in self.sinks.read().iter() {
            sink.group_removed(group.as_ref());
        }
        group.attach(None);
        Some(group)
    }
}

impl ResourceInventory for LocalInventory {
    fn groups(&self) -> Vec<Arc<dyn ResourceGroup>> {
        self.groups
            .read()
            .iter()
            .map(|g| g.clone() as Arc<dyn ResourceGroup>)
            .collect()
    }

    fn subscribe(&self, sink: InventorySink) {
        let mut sinks = self.sinks.write();
        sinks.retain(|s| !s.is_closed());
        sinks.push(sink);
    }
}
