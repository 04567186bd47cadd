use crate::inventory::{ResourceRef, ResourceState};
use crate::{RequestId, ResourceId, ResourceType};

/// Assigner's view of one inventory resource.
pub(crate) struct ResourceEntry {
    pub resource: ResourceRef,
    /// Last state reported through the event channel.
    pub observed: ResourceState,
    /// Request currently holding the resource (READY or WORKING).
    pub holder: Option<RequestId>,
}

impl ResourceEntry {
    pub fn new(resource: ResourceRef) -> Self {
        let observed = resource.state();
        ResourceEntry {
            resource,
            observed,
            holder: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    #[inline]
    pub fn resource_type(&self) -> &ResourceType {
        self.resource.resource_type()
    }

    /// Ready according to the live state and not held by anyone.
    pub fn is_available(&self) -> bool {
        self.holder.is_none() && self.resource.state() == ResourceState::Ready
    }
}
