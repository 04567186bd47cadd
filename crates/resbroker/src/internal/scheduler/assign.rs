use std::time::Instant;

use crate::internal::scheduler::score::{ScoreInput, compute_score};
use crate::internal::server::comm::Comm;
use crate::internal::server::core::Core;
use crate::internal::server::request::{ManagedRequestRef, RequestState};
use crate::inventory::ResourceState;
use crate::{ResourceId, ResourceType};

/// Offers the resource to the best eligible waiting request of its type.
///
/// Returns `true` when the resource was granted. A resource nobody can take
/// stays idle until the next event or backlog scan.
pub(crate) fn try_assign_resource(
    core: &mut Core,
    comm: &mut impl Comm,
    resource_id: ResourceId,
    now: Instant,
) -> bool {
    let Some(entry) = core.get_resource(resource_id) else {
        return false;
    };
    if entry.holder.is_some() {
        return false;
    }
    let resource = entry.resource.clone();
    let state = resource.state();
    if state != ResourceState::Ready {
        log::debug!("Resource id={resource_id} is {state}, not offering it");
        return false;
    }
    let resource_type = resource.resource_type().clone();

    let candidates = rank_candidates(core, &resource_type, now);
    for request in candidates {
        if request.grant(resource.clone(), now) {
            log::debug!(
                "Resource id={resource_id} granted to request id={} user={} score={:?}",
                request.id(),
                request.user(),
                request.score()
            );
            core.remove_from_backlog(request.id());
            if let Some(entry) = core.get_resource_mut(resource_id) {
                entry.holder = Some(request.id());
            }
            comm.request_state_changed(&request, RequestState::Waiting, RequestState::Ready);
            return true;
        }
        log::debug!("Request id={} is no longer waiting", request.id());
    }
    false
}

/// Eligible waiting requests of the type, best first.
///
/// A request is eligible when its user has an authorization record and holds
/// fewer resources of the type than the quota allows.
fn rank_candidates(
    core: &Core,
    resource_type: &ResourceType,
    now: Instant,
) -> Vec<ManagedRequestRef> {
    let waiting = core.waiting_requests(resource_type);
    if waiting.is_empty() {
        return Vec::new();
    }
    let authorizations = match core.auth_store().load(resource_type) {
        Ok(Some(authorizations)) => authorizations,
        Ok(None) => {
            log::debug!("No authorizations for resource type {resource_type}");
            return Vec::new();
        }
        Err(error) => {
            log::error!("Could not load authorizations for resource type {resource_type}: {error}");
            return Vec::new();
        }
    };
    let loads = core.user_loads(resource_type);
    let total_resources = core.count_resources(resource_type);

    let mut scored: Vec<(i64, ManagedRequestRef)> = waiting
        .into_iter()
        .filter_map(|request| {
            let auth = authorizations.get(request.user())?;
            let load = loads.get(request.user()).copied().unwrap_or_default();
            if load.holding >= auth.max_resources {
                return None;
            }
            let score = compute_score(&ScoreInput {
                user_nice_level: auth.nice_level,
                request_nice_level: request.request().nice_level,
                user_quota: auth.max_resources,
                total_resources,
                working: load.working,
                waited: now.saturating_duration_since(request.created()),
            });
            request.set_score(score);
            Some((score, request))
        })
        .collect();
    scored.sort_by_key(|(score, request)| (*score, request.created(), request.id()));
    scored.into_iter().map(|(_, request)| request).collect()
}

/// Offers all idle resources that some waiting request asks for.
///
/// Returns the number of grants. Asks for a delayed rescan while requests remain waiting.
pub(crate) fn run_backlog_scan(core: &mut Core, comm: &mut impl Comm, now: Instant) -> usize {
    let mut granted = 0;
    for resource_id in core.resource_ids() {
        let wanted = core
            .get_resource(resource_id)
            .is_some_and(|e| e.is_available() && core.has_demand_for(e.resource_type()));
        if wanted && try_assign_resource(core, comm, resource_id, now) {
            granted += 1;
        }
    }
    if core.backlog_len() > 0 {
        log::debug!(
            "Backlog scan granted {granted} resources, {} requests still waiting",
            core.backlog_len()
        );
        comm.ask_for_rescan();
    }
    granted
}
