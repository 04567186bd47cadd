use std::sync::Arc;

use crate::auth::{AuthorizationStore, MemoryAuthorizationStore, TypeAuthorizations};
use crate::internal::common::error::StoreError;
use crate::inventory::ResourceState;
use crate::local::{LocalInventory, LocalResource, LocalResourceGroup};
use crate::ResourceType;

/// Store that cannot be read.
pub struct BrokenStore;

impl AuthorizationStore for BrokenStore {
    fn load(&self, _resource_type: &ResourceType) -> Result<Option<TypeAuthorizations>, StoreError> {
        Err(StoreError::Other("store is offline".to_string()))
    }
}

pub fn memory_store(records: &[(&str, &str, u32, i32)]) -> Arc<MemoryAuthorizationStore> {
    let store = MemoryAuthorizationStore::new();
    for (user, resource_type, max_resources, nice_level) in records {
        store.add_authorization(*user, *resource_type, *max_resources, *nice_level);
    }
    Arc::new(store)
}

/// Inventory with one group of `count` resources of the given type, ids starting at 1.
pub fn local_inventory(
    resource_type: &str,
    count: u64,
    state: ResourceState,
) -> (Arc<LocalInventory>, Arc<LocalResourceGroup>, Vec<Arc<LocalResource>>) {
    let inventory = LocalInventory::new();
    let group = LocalResourceGroup::new(1, resource_type);
    let resources: Vec<_> = (1..=count)
        .map(|id| LocalResource::with_state(id, resource_type, state))
        .collect();
    for resource in &resources {
        group.add_resource(resource.clone());
    }
    inventory.add_group(group.clone());
    (inventory, group, resources)
}
