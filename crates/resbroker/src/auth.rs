//! Per-resource-type authorization records.
//!
//! Each record grants a user a quota (maximum number of concurrently used
//! resources) and a nice level. A missing record or a zero quota means the user
//! cannot receive resources of that type.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::internal::common::error::StoreError;
use crate::{Map, ResourceType, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub max_resources: u32,
    pub nice_level: i32,
}

impl Authorization {
    pub fn new(max_resources: u32, nice_level: i32) -> Self {
        Authorization {
            max_resources,
            nice_level,
        }
    }

    #[inline]
    pub fn grants_access(&self) -> bool {
        self.max_resources > 0
    }
}

/// Authorization records of all users for a single resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeAuthorizations {
    users: Map<UserId, Authorization>,
}

impl TypeAuthorizations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &UserId) -> Option<&Authorization> {
        self.users.get(user)
    }

    pub fn set(&mut self, user: UserId, authorization: Authorization) {
        self.users.insert(user, authorization);
    }

    pub fn remove(&mut self, user: &UserId) -> Option<Authorization> {
        self.users.remove(user)
    }

    pub fn users(&self) -> impl Iterator<Item = (&UserId, &Authorization)> {
        self.users.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<(UserId, Authorization)> for TypeAuthorizations {
    fn from_iter<I: IntoIterator<Item = (UserId, Authorization)>>(iter: I) -> Self {
        TypeAuthorizations {
            users: iter.into_iter().collect(),
        }
    }
}

pub trait AuthorizationStore: Send + Sync {
    /// Returns `Ok(None)` when no records exist for the resource type at all.
    fn load(&self, resource_type: &ResourceType) -> Result<Option<TypeAuthorizations>, StoreError>;
}

#[derive(Default)]
pub struct MemoryAuthorizationStore {
    types: RwLock<Map<ResourceType, TypeAuthorizations>>,
}

impl MemoryAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_authorization<U: Into<UserId>, T: Into<ResourceType>>(
        &self,
        user: U,
        resource_type: T,
        max_resources: u32,
        nice_level: i32,
    ) {
        self.types
            .write()
            .entry(resource_type.into())
            .or_default()
            .set(user.into(), Authorization::new(max_resources, nice_level));
    }

    pub fn remove_authorization(&self, user: &UserId, resource_type: &ResourceType) {
        if let Some(auths) = self.types.write().get_mut(resource_type) {
            auths.remove(user);
        }
    }
}

impl AuthorizationStore for MemoryAuthorizationStore {
    fn load(&self, resource_type: &ResourceType) -> Result<Option<TypeAuthorizations>, StoreError> {
        Ok(self.types.read().get(resource_type).cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonAuthorizationEntry {
    user_name: UserId,
    #[serde(default)]
    max_resources: u32,
    #[serde(default)]
    nice_level: i32,
}

type JsonAuthorizationFile = std::collections::BTreeMap<String, Vec<JsonAuthorizationEntry>>;

/// Authorization store backed by a JSON file.
///
/// The file maps resource type names to arrays of
/// `{ "userName": ..., "maxResources": ..., "niceLevel": ... }` entries.
/// A missing file contains no records.
pub struct JsonAuthorizationStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl JsonAuthorizationStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        JsonAuthorizationStore {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(
        &self,
        resource_type: &ResourceType,
        authorizations: &TypeAuthorizations,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        let mut file = self.read_file()?;
        let mut entries: Vec<JsonAuthorizationEntry> = authorizations
            .users()
            .map(|(user, auth)| JsonAuthorizationEntry {
                user_name: user.clone(),
                max_resources: auth.max_resources,
                nice_level: auth.nice_level,
            })
            .collect();
        entries.sort_by(|a, b| a.user_name.cmp(&b.user_name));
        file.insert(resource_type.as_str().to_string(), entries);
        let data = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }

    fn read_file(&self) -> Result<JsonAuthorizationFile, StoreError> {
        if !self.path.exists() {
            return Ok(Default::default());
        }
        let data = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

impl AuthorizationStore for JsonAuthorizationStore {
    fn load(&self, resource_type: &ResourceType) -> Result<Option<TypeAuthorizations>, StoreError> {
        let _guard = self.lock.read();
        let mut file = self.read_file()?;
        Ok(file.remove(resource_type.as_str()).map(|entries| {
            entries
                .into_iter()
                .map(|e| {
                    (
                        e.user_name,
                        Authorization::new(e.max_resources, e.nice_level),
                    )
                })
                .collect()
        }))
    }
}
