use std::time::{Duration, Instant};

use crate::events::BrokerEvent;
use crate::internal::server::comm::Comm;
use crate::internal::server::core::Core;
use crate::internal::server::request::{ManagedRequestRef, RequestState};
use crate::inventory::{ResourceEvent, ResourceRef, ResourceState};
use crate::{RequestId, ResourceId, Set};

pub(crate) fn on_new_request(core: &mut Core, request: ManagedRequestRef) {
    log::debug!(
        "New request id={} user={} type={}",
        request.id(),
        request.user(),
        request.resource_type()
    );
    if core.get_request(request.id()).is_some() {
        log::debug!("Request id={} is already known", request.id());
        return;
    }
    core.add_request(request);
}

/// Finishes a cancellation performed on the request handle.
pub(crate) fn on_cancel_request(core: &mut Core, comm: &mut impl Comm, request_id: RequestId) {
    let Some(request) = core.get_request(request_id).cloned() else {
        log::debug!("Cancelled request id={request_id} is not here");
        core.registry().remove(request_id);
        return;
    };
    if request.state() != RequestState::Cancelled {
        log::debug!(
            "Ignoring cancel of request id={request_id} in state {}",
            request.state()
        );
        return;
    }
    log::debug!("Request id={request_id} cancelled");
    core.remove_request(request_id);
    comm.publish(BrokerEvent::RequestCancelled(request.clone()));
    comm.request_state_changed(&request, RequestState::Waiting, RequestState::Cancelled);
}

pub(crate) fn on_resource_event(core: &mut Core, comm: &mut impl Comm, event: ResourceEvent) {
    match event {
        ResourceEvent::Added(resource) => on_resource_added(core, resource),
        ResourceEvent::Removed(resource_id) => on_resource_removed(core, comm, resource_id),
        ResourceEvent::StateChanged {
            resource_id,
            previous,
            new,
        } => on_resource_state_changed(core, comm, resource_id, previous, new),
        ResourceEvent::Orphaned(resource_id) => on_resource_orphaned(core, comm, resource_id),
    }
}

pub(crate) fn on_resource_added(core: &mut Core, resource: ResourceRef) {
    log::debug!(
        "Resource id={} type={} added in state {}",
        resource.id(),
        resource.resource_type(),
        resource.state()
    );
    let entry = core.add_resource(resource);
    if entry.holder.is_none() && entry.observed == ResourceState::Ready {
        let resource_id = entry.id();
        core.queue_resource(resource_id);
    }
}

pub(crate) fn on_resource_removed(core: &mut Core, comm: &mut impl Comm, resource_id: ResourceId) {
    let Some(entry) = core.remove_resource(resource_id) else {
        log::debug!("Unknown resource id={resource_id} removed");
        return;
    };
    log::debug!("Resource id={resource_id} removed");
    if let Some(holder) = entry.holder {
        lose_resource(core, comm, holder, resource_id);
    }
}

pub(crate) fn on_resource_state_changed(
    core: &mut Core,
    comm: &mut impl Comm,
    resource_id: ResourceId,
    previous: ResourceState,
    new: ResourceState,
) {
    let Some(entry) = core.get_resource_mut(resource_id) else {
        log::debug!("State change of unknown resource id={resource_id}");
        return;
    };
    log::debug!("Resource id={resource_id} changed state {previous} -> {new}");
    entry.observed = new;

    if let Some(holder) = entry.holder {
        match core.get_request(holder).cloned() {
            None => {
                log::debug!("Holder id={holder} of resource id={resource_id} is gone");
                clear_holder(core, resource_id);
            }
            Some(request) => {
                if previous != ResourceState::InUse && new == ResourceState::InUse {
                    if request.start_working() {
                        comm.request_state_changed(
                            &request,
                            RequestState::Ready,
                            RequestState::Working,
                        );
                    }
                } else if previous == ResourceState::InUse && new != ResourceState::InUse {
                    if let Some(old) = request.release_with(RequestState::Finished) {
                        log::debug!("Request id={holder} finished");
                        comm.request_state_changed(&request, old, RequestState::Finished);
                    }
                    clear_holder(core, resource_id);
                    comm.schedule_eviction(holder);
                } else if matches!(new, ResourceState::Disconnected | ResourceState::Error) {
                    lose_resource(core, comm, holder, resource_id);
                    clear_holder(core, resource_id);
                }
            }
        }
    }

    if new == ResourceState::Ready
        && core
            .get_resource(resource_id)
            .is_some_and(|e| e.holder.is_none())
    {
        core.queue_resource(resource_id);
    }
}

pub(crate) fn on_resource_orphaned(core: &mut Core, comm: &mut impl Comm, resource_id: ResourceId) {
    let Some(entry) = core.get_resource_mut(resource_id) else {
        log::debug!("Orphan notification for unknown resource id={resource_id}");
        return;
    };
    let Some(holder) = entry.holder.take() else {
        log::debug!("Resource id={resource_id} orphaned without a holder");
        return;
    };
    let resource = entry.resource.clone();
    let Some(request) = core.get_request(holder).cloned() else {
        return;
    };
    let Some(old) = request.release_with(RequestState::Orphaned) else {
        return;
    };
    log::info!(
        "Request id={holder} of user {} orphaned resource id={resource_id}",
        request.user()
    );
    comm.request_state_changed(&request, old, RequestState::Orphaned);
    comm.schedule_eviction(holder);

    if old == RequestState::Working {
        // The state change back to READY re-offers the resource
        resource.stop_using();
    } else if resource.state() == ResourceState::Ready {
        core.queue_resource(resource_id);
    }
}

/// Brings the resource view in line with a full inventory snapshot.
pub(crate) fn on_resync(core: &mut Core, comm: &mut impl Comm, snapshot: Vec<ResourceRef>) {
    log::debug!("Resynchronizing {} resources", snapshot.len());
    let present: Set<ResourceId> = snapshot.iter().map(|r| r.id()).collect();
    for resource_id in core.resource_ids() {
        if !present.contains(&resource_id) {
            on_resource_removed(core, comm, resource_id);
        }
    }
    for resource in snapshot {
        let resource_id = resource.id();
        let live = resource.state();
        match core.get_resource(resource_id).map(|e| e.observed) {
            None => on_resource_added(core, resource),
            Some(observed) if observed != live => {
                on_resource_state_changed(core, comm, resource_id, observed, live)
            }
            Some(_) => {
                if live == ResourceState::Ready
                    && core
                        .get_resource(resource_id)
                        .is_some_and(|e| e.holder.is_none())
                {
                    core.queue_resource(resource_id);
                }
            }
        }
    }
}

pub(crate) fn on_evict(core: &mut Core, request_id: RequestId) {
    let terminal = core
        .get_request(request_id)
        .is_some_and(|r| r.state().is_terminal());
    if terminal {
        log::debug!("Evicting request id={request_id}");
        core.remove_request(request_id);
    }
}

/// Cancels waiting requests whose owner stopped waiting on them.
pub(crate) fn reap_abandoned(
    core: &mut Core,
    comm: &mut impl Comm,
    now: Instant,
    timeout: Duration,
) {
    let abandoned: Vec<ManagedRequestRef> = core
        .requests()
        .filter(|r| core.is_in_backlog(r.id()) && r.idle_time_at(now) > timeout)
        .cloned()
        .collect();
    for request in abandoned {
        if request.mark_cancelled() {
            log::info!(
                "Request id={} of user {} was abandoned, cancelling",
                request.id(),
                request.user()
            );
            on_cancel_request(core, comm, request.id());
        }
    }
}

pub(crate) fn on_shutdown(core: &mut Core) {
    let requests = core.take_requests();
    log::debug!("Resolving {} requests on shutdown", requests.len());
    for request in requests {
        request.resolve_shutdown();
    }
    core.clear_resources();
}

fn clear_holder(core: &mut Core, resource_id: ResourceId) {
    if let Some(entry) = core.get_resource_mut(resource_id) {
        entry.holder = None;
    }
}

/// The holder lost its resource: a granted request goes back to the backlog,
/// a working one is finished.
fn lose_resource(
    core: &mut Core,
    comm: &mut impl Comm,
    request_id: RequestId,
    resource_id: ResourceId,
) {
    let Some(request) = core.get_request(request_id).cloned() else {
        return;
    };
    match request.state() {
        RequestState::Ready => {
            if request.revoke().is_some() {
                log::debug!(
                    "Request id={request_id} lost resource id={resource_id} before using it, requeueing"
                );
                comm.request_state_changed(&request, RequestState::Ready, RequestState::Waiting);
                core.add_to_backlog(request_id);
            }
        }
        RequestState::Working => {
            log::warn!(
                "Resource id={resource_id} disappeared while used by request id={request_id}"
            );
            if let Some(old) = request.release_with(RequestState::Finished) {
                comm.request_state_changed(&request, old, RequestState::Finished);
            }
            comm.schedule_eviction(request_id);
        }
        _ => {}
    }
}
