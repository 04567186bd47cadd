use std::time::{Duration, Instant};

use crate::internal::server::reactor::{on_evict, on_shutdown};
use crate::internal::server::request::RequestState;
use crate::internal::tests::utils::TestEnv;
use crate::inventory::{Resource, ResourceRef, ResourceState};
use crate::local::LocalResource;

const MS: Duration = Duration::from_millis(1);

#[test]
fn test_ready_resource_is_queued_on_add() {
    let mut env = TestEnv::new();
    env.new_resource(1, ResourceState::Ready);
    env.new_resource(2, ResourceState::Disconnected);
    assert_eq!(env.core().pop_queued_resource(), Some(1.into()));
    assert_eq!(env.core().pop_queued_resource(), None);
    env.comm.emptiness_check();
}

#[test]
fn test_disconnected_resource_granted_when_ready() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    let resource = env.new_resource(1, ResourceState::Disconnected);
    let rq = env.submit(env.request("alice"));
    assert!(env.offer_queued(MS).is_empty());
    assert_eq!(rq.state(), RequestState::Waiting);

    env.change_state(&resource, ResourceState::Ready);
    assert_eq!(env.offer_queued(MS), vec![1.into()]);
    assert_eq!(rq.state(), RequestState::Ready);
    assert_eq!(rq.resource().unwrap().id(), 1.into());
    assert_eq!(env.holder_of(1), Some(rq.id()));
    assert_eq!(
        env.comm.take_state_changes(),
        vec![(rq.id(), RequestState::Waiting, RequestState::Ready)]
    );
}

#[test]
fn test_full_lifecycle() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    let resource = env.new_resource(1, ResourceState::Ready);
    let rq = env.submit(env.request("alice"));
    env.offer_queued(MS);
    assert_eq!(rq.state(), RequestState::Ready);
    env.comm.take_state_changes();

    env.change_state(&resource, ResourceState::InUse);
    assert_eq!(rq.state(), RequestState::Working);
    assert_eq!(
        env.comm.take_state_changes(),
        vec![(rq.id(), RequestState::Ready, RequestState::Working)]
    );

    env.change_state(&resource, ResourceState::Ready);
    assert_eq!(rq.state(), RequestState::Finished);
    assert_eq!(
        env.comm.take_state_changes(),
        vec![(rq.id(), RequestState::Working, RequestState::Finished)]
    );
    assert_eq!(env.comm.take_evictions(1), vec![rq.id()]);
    assert_eq!(env.holder_of(1), None);
    // The resource is offered again
    assert_eq!(env.core().pop_queued_resource(), Some(1.into()));
    env.comm.emptiness_check();
}

#[test]
fn test_orphaned_ready_holder() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 2, 0);
    env.new_resource(1, ResourceState::Ready);
    let rq1 = env.submit(env.request("alice"));
    env.offer_queued(MS);
    let rq2 = env.submit(env.request("alice"));
    assert_eq!(rq1.state(), RequestState::Ready);
    assert_eq!(rq2.state(), RequestState::Waiting);
    env.comm.take_state_changes();

    env.orphan(1);
    assert_eq!(rq1.state(), RequestState::Orphaned);
    assert_eq!(
        env.comm.take_state_changes(),
        vec![(rq1.id(), RequestState::Ready, RequestState::Orphaned)]
    );
    assert_eq!(env.comm.take_evictions(1), vec![rq1.id()]);

    assert_eq!(env.offer_queued(2 * MS), vec![1.into()]);
    assert_eq!(rq2.state(), RequestState::Ready);
    assert_eq!(rq2.resource().unwrap().id(), 1.into());
    assert_eq!(env.holder_of(1), Some(rq2.id()));
}

#[test]
fn test_orphaned_working_holder() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 2, 0);
    let resource = env.new_resource(1, ResourceState::Ready);
    let rq1 = env.submit(env.request("alice"));
    env.offer_queued(MS);
    env.change_state(&resource, ResourceState::InUse);
    assert_eq!(rq1.state(), RequestState::Working);
    let rq2 = env.submit(env.request("alice"));
    env.comm.take_state_changes();

    env.orphan(1);
    assert_eq!(rq1.state(), RequestState::Orphaned);
    // The broker stopped the use itself
    assert_eq!(resource.state(), ResourceState::Ready);
    assert!(!env.core().has_queued_resources());

    // The state change event caused by stopping re-offers the resource
    env.resource_event(1, ResourceState::InUse, ResourceState::Ready);
    assert_eq!(env.offer_queued(2 * MS), vec![1.into()]);
    assert_eq!(rq2.state(), RequestState::Ready);
    assert_eq!(rq1.state(), RequestState::Orphaned);
}

#[test]
fn test_orphan_without_holder_is_ignored() {
    let mut env = TestEnv::new();
    env.new_resource(1, ResourceState::Ready);
    env.core().pop_queued_resource();
    env.orphan(1);
    env.orphan(2);
    env.comm.emptiness_check();
}

#[test]
fn test_removed_resource_requeues_ready_holder() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    env.new_resource(1, ResourceState::Ready);
    let rq = env.submit(env.request("alice"));
    assert!(env.core().take_backlog_grew());
    env.offer_queued(MS);
    env.comm.take_state_changes();
    assert!(!env.core().take_backlog_grew());

    env.remove_resource(1);
    assert!(env.core().take_backlog_grew());
    assert_eq!(rq.state(), RequestState::Waiting);
    assert!(rq.resource().is_none());
    assert!(!rq.is_resolved());
    assert!(env.core().is_in_backlog(rq.id()));
    assert_eq!(
        env.comm.take_state_changes(),
        vec![(rq.id(), RequestState::Ready, RequestState::Waiting)]
    );

    env.new_resource(2, ResourceState::Ready);
    assert_eq!(env.offer_queued(2 * MS), vec![2.into()]);
    assert_eq!(rq.resource().unwrap().id(), 2.into());
}

#[test]
fn test_removed_resource_finishes_working_holder() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    let resource = env.new_resource(1, ResourceState::Ready);
    let rq = env.submit(env.request("alice"));
    env.offer_queued(MS);
    env.change_state(&resource, ResourceState::InUse);
    env.comm.take_state_changes();

    env.remove_resource(1);
    assert_eq!(rq.state(), RequestState::Finished);
    assert_eq!(
        env.comm.take_state_changes(),
        vec![(rq.id(), RequestState::Working, RequestState::Finished)]
    );
    assert_eq!(env.comm.take_evictions(1), vec![rq.id()]);
    assert!(env.core().get_resource(1.into()).is_none());
}

#[test]
fn test_disconnect_before_use_requeues() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    let resource = env.new_resource(1, ResourceState::Ready);
    let rq = env.submit(env.request("alice"));
    env.offer_queued(MS);

    env.core().take_backlog_grew();
    env.change_state(&resource, ResourceState::Disconnected);
    assert_eq!(rq.state(), RequestState::Waiting);
    assert!(env.core().take_backlog_grew());
    assert_eq!(env.holder_of(1), None);
    assert!(!env.core().has_queued_resources());

    env.change_state(&resource, ResourceState::Ready);
    assert_eq!(env.offer_queued(2 * MS), vec![1.into()]);
    assert_eq!(rq.state(), RequestState::Ready);
}

#[test]
fn test_cancel_request() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    let rq = env.submit(env.request("alice"));
    assert!(rq.cancel());
    env.cancel_message(rq.id());

    assert!(env.core().get_request(rq.id()).is_none());
    assert!(env.core().registry().get(rq.id()).is_none());
    assert!(!env.core().is_in_backlog(rq.id()));
    assert_eq!(env.comm.take_cancelled(), vec![rq.id()]);
    assert_eq!(
        env.comm.take_state_changes(),
        vec![(rq.id(), RequestState::Waiting, RequestState::Cancelled)]
    );

    // Cancelled request is never matched
    env.new_resource(1, ResourceState::Ready);
    assert!(env.offer_queued(MS).is_empty());
    assert_eq!(rq.state(), RequestState::Cancelled);
    env.comm.emptiness_check();
}

#[test]
fn test_cancel_message_for_granted_request_is_ignored() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    env.new_resource(1, ResourceState::Ready);
    let rq = env.submit(env.request("alice"));
    env.offer_queued(MS);
    env.comm.take_state_changes();

    env.cancel_message(rq.id());
    assert!(env.core().get_request(rq.id()).is_some());
    assert_eq!(rq.state(), RequestState::Ready);
    env.comm.emptiness_check();
}

#[test]
fn test_evict_only_terminal_requests() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    let resource = env.new_resource(1, ResourceState::Ready);
    let rq = env.submit(env.request("alice"));
    env.offer_queued(MS);

    on_evict(env.core(), rq.id());
    assert!(env.core().get_request(rq.id()).is_some());

    env.change_state(&resource, ResourceState::InUse);
    env.change_state(&resource, ResourceState::Ready);
    on_evict(env.core(), rq.id());
    assert!(env.core().get_request(rq.id()).is_none());
    assert!(env.core().registry().get(rq.id()).is_none());
}

#[test]
fn test_reap_abandoned_requests() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    let rq = env.submit(env.request("alice"));
    let now = Instant::now();

    env.reap(now, Duration::from_secs(60));
    assert_eq!(rq.state(), RequestState::Waiting);
    env.comm.emptiness_check();

    env.reap(now + Duration::from_secs(120), Duration::from_secs(60));
    assert_eq!(rq.state(), RequestState::Cancelled);
    assert!(env.core().get_request(rq.id()).is_none());
    assert_eq!(env.comm.take_cancelled(), vec![rq.id()]);
}

#[test]
fn test_resync_with_inventory_snapshot() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 2, 0);
    let r1 = env.new_resource(1, ResourceState::Ready);
    let r2 = env.new_resource(2, ResourceState::Disconnected);
    env.new_resource(3, ResourceState::Ready);
    while env.core().pop_queued_resource().is_some() {}
    let rq = env.submit(env.request("alice"));
    assert!(env.assign(1, MS));

    // Changes that never reached the broker
    r1.set_state(ResourceState::InUse);
    r2.set_state(ResourceState::Ready);
    let r4 = LocalResource::with_state(4, "mock", ResourceState::Ready);
    env.resync(vec![r1.clone() as ResourceRef, r2.clone() as ResourceRef, r4]);

    assert_eq!(rq.state(), RequestState::Working);
    assert!(env.core().get_resource(3.into()).is_none());
    assert!(env.core().get_resource(4.into()).is_some());
    let mut queued = Vec::new();
    while let Some(id) = env.core().pop_queued_resource() {
        queued.push(id);
    }
    queued.sort();
    assert_eq!(queued, vec![2.into(), 4.into()]);
}

#[test]
fn test_shutdown_resolves_requests() {
    let mut env = TestEnv::new();
    env.authorize("alice", "mock", 1, 0);
    env.new_resource(1, ResourceState::Disconnected);
    let rq = env.submit(env.request("alice"));
    on_shutdown(env.core());
    assert!(rq.is_resolved());
    assert_eq!(rq.state(), RequestState::Waiting);
    assert!(env.core().get_request(rq.id()).is_none());
    assert!(env.core().get_resource(1.into()).is_none());
}
