//! Brokering of a shared, dynamically changing pool of resources among
//! concurrent requesters.
//!
//! Requests are admitted by the [`ResourceManager`], which checks the
//! inventory and the user's authorization, and are then matched against
//! available resources by a single assigner task. Among the eligible waiting
//! requests for a resource, the one with the lowest score wins; the score
//! combines the user's nice level, their current usage and the wait time.

#[macro_use]
pub(crate) mod internal;

pub mod auth;
pub mod common;
pub mod config;
pub mod events;
pub mod inventory;
pub mod local;
pub mod manager;
pub mod request;

pub use crate::internal::common::ids::{GroupId, RequestId, ResourceId, ResourceType, UserId};
pub use crate::internal::common::{Map, Set};

pub use crate::config::{BrokerConfig, BrokerConfigBuilder};
pub use crate::manager::{BrokerOverview, ResourceManager};
pub use crate::request::ResourceRequest;

pub type Error = internal::common::error::BrokerError;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::internal::common::error::StoreError;

pub mod requests {
    pub use crate::internal::server::request::{
        ManagedRequest, ManagedRequestRef, RequestState, StateLogEntry, WaitOutcome,
    };
}

pub mod scoring {
    pub use crate::internal::scheduler::score::{
        MIN_WAIT_MS, NICE_LEVEL_SHIFT, REQUEST_NICE_WEIGHT, ScoreInput, compute_score,
    };
}
