use serde::{Deserialize, Serialize};

use crate::{Map, ResourceType, UserId};

pub const DEFAULT_JOB_NAME: &str = "unnamed job";

/// An authenticated request for one resource of a given type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub user: UserId,
    pub resource_type: ResourceType,
    pub job_name: String,
    /// Lower values mean higher priority; fine-tunes the user's own nice level.
    pub nice_level: i32,
    pub attributes: Map<String, String>,
}

impl ResourceRequest {
    pub fn new<U: Into<UserId>, T: Into<ResourceType>>(user: U, resource_type: T) -> Self {
        ResourceRequest {
            user: user.into(),
            resource_type: resource_type.into(),
            job_name: DEFAULT_JOB_NAME.to_string(),
            nice_level: 0,
            attributes: Default::default(),
        }
    }

    pub fn with_job_name<S: Into<String>>(mut self, job_name: S) -> Self {
        self.job_name = job_name.into();
        self
    }

    pub fn with_nice_level(mut self, nice_level: i32) -> Self {
        self.nice_level = nice_level;
        self
    }

    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
