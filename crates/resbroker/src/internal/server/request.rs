use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

use crate::internal::scheduler::main::ToAssigner;
use crate::inventory::ResourceRef;
use crate::request::ResourceRequest;
use crate::{Error, RequestId, ResourceType, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Waiting,
    Ready,
    Working,
    Finished,
    Orphaned,
    Cancelled,
}

impl RequestState {
    /// Terminal states can never receive or hold a resource again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Finished | RequestState::Orphaned | RequestState::Cancelled
        )
    }

    #[inline]
    pub fn holds_resource(&self) -> bool {
        matches!(self, RequestState::Ready | RequestState::Working)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Waiting => write!(f, "WAITING"),
            RequestState::Ready => write!(f, "READY"),
            RequestState::Working => write!(f, "WORKING"),
            RequestState::Finished => write!(f, "FINISHED"),
            RequestState::Orphaned => write!(f, "ORPHANED"),
            RequestState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateLogEntry {
    pub state: RequestState,
    pub timestamp: DateTime<Utc>,
}

/// Value of the single-assignment promise behind a request.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    Pending,
    Granted(ResourceRef),
    Cancelled,
    Shutdown,
}

/// Result of waiting on a request.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Granted(ResourceRef),
    /// The timeout elapsed; the broker keeps waiting on the caller's behalf.
    StillWaiting,
}

impl WaitOutcome {
    pub fn resource(&self) -> Option<&ResourceRef> {
        match self {
            WaitOutcome::Granted(resource) => Some(resource),
            WaitOutcome::StillWaiting => None,
        }
    }
}

struct RequestInner {
    state: RequestState,
    resource: Option<ResourceRef>,
    log: Vec<StateLogEntry>,
    score: Option<i64>,
    cancelled: bool,
    last_touch: Instant,
    granted: Option<Instant>,
}

impl RequestInner {
    fn set_state(&mut self, state: RequestState) -> RequestState {
        let old = self.state;
        if old != state {
            log::debug!("Request state {old} -> {state}");
            self.state = state;
            self.log.push(StateLogEntry {
                state,
                timestamp: Utc::now(),
            });
        }
        old
    }
}

/// One admitted resource request and its lifecycle.
///
/// State transitions are driven by the assigner. Callers observe the request
/// and wait on it; the only caller-side mutation is [`ManagedRequest::cancel`],
/// which succeeds only while no resource is assigned.
pub struct ManagedRequest {
    id: RequestId,
    request: ResourceRequest,
    created_at: DateTime<Utc>,
    created: Instant,
    inner: Mutex<RequestInner>,
    resolution: watch::Sender<Resolution>,
    assigner: Option<UnboundedSender<ToAssigner>>,
}

pub type ManagedRequestRef = Arc<ManagedRequest>;

impl fmt::Debug for ManagedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedRequest")
            .field("id", &self.id)
            .field("user", &self.request.user)
            .field("resource_type", &self.request.resource_type)
            .field("state", &self.state())
            .finish()
    }
}

impl ManagedRequest {
    pub(crate) fn new(
        id: RequestId,
        request: ResourceRequest,
        now: Instant,
        assigner: Option<UnboundedSender<ToAssigner>>,
    ) -> ManagedRequestRef {
        let created_at = Utc::now();
        let (resolution, _) = watch::channel(Resolution::Pending);
        Arc::new(ManagedRequest {
            id,
            request,
            created_at,
            created: now,
            inner: Mutex::new(RequestInner {
                state: RequestState::Waiting,
                resource: None,
                log: vec![StateLogEntry {
                    state: RequestState::Waiting,
                    timestamp: created_at,
                }],
                score: None,
                cancelled: false,
                last_touch: now,
                granted: None,
            }),
            resolution,
            assigner,
        })
    }

    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[inline]
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    #[inline]
    pub fn user(&self) -> &UserId {
        &self.request.user
    }

    #[inline]
    pub fn resource_type(&self) -> &ResourceType {
        &self.request.resource_type
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub(crate) fn created(&self) -> Instant {
        self.created
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    pub fn resource(&self) -> Option<ResourceRef> {
        self.inner.lock().resource.clone()
    }

    /// Score computed the last time this request competed for a resource.
    pub fn score(&self) -> Option<i64> {
        self.inner.lock().score
    }

    pub fn state_log(&self) -> Vec<StateLogEntry> {
        self.inner.lock().log.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// Time from creation until a resource was granted, or until now.
    pub fn wait_time(&self) -> Duration {
        let inner = self.inner.lock();
        match inner.granted {
            Some(granted) => granted - self.created,
            None => self.created.elapsed(),
        }
    }

    /// Time since the owner of the request last waited on it.
    pub fn idle_time(&self) -> Duration {
        self.idle_time_at(Instant::now())
    }

    pub(crate) fn idle_time_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inner.lock().last_touch)
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(*self.resolution.borrow(), Resolution::Pending)
    }

    /// Waits until a resource is granted.
    ///
    /// With a timeout, [`WaitOutcome::StillWaiting`] is returned when it elapses
    /// and the request stays queued. Fails with [`Error::Cancelled`] when the
    /// request was cancelled and with [`Error::Shutdown`] when the broker stopped.
    pub async fn wait(&self, timeout: Option<Duration>) -> crate::Result<WaitOutcome> {
        self.touch();
        let mut receiver = self.resolution.subscribe();
        let resolution = {
            let resolved = receiver.wait_for(|r| !matches!(r, Resolution::Pending));
            match timeout {
                Some(duration) => match tokio::time::timeout(duration, resolved).await {
                    Ok(result) => result.map(|r| (*r).clone()),
                    Err(_) => {
                        self.touch();
                        return Ok(WaitOutcome::StillWaiting);
                    }
                },
                None => resolved.await.map(|r| (*r).clone()),
            }
        };
        self.touch();
        match resolution {
            Ok(Resolution::Granted(resource)) => Ok(WaitOutcome::Granted(resource)),
            Ok(Resolution::Cancelled) => Err(Error::Cancelled),
            Ok(Resolution::Shutdown) | Ok(Resolution::Pending) | Err(_) => Err(Error::Shutdown),
        }
    }

    /// Cancels the request if no resource has been assigned to it yet.
    pub fn cancel(&self) -> bool {
        if !self.mark_cancelled() {
            return false;
        }
        if let Some(assigner) = &self.assigner {
            // The assigner may already be gone; the request is cancelled either way.
            let _ = assigner.send(ToAssigner::Cancelled(self.id));
        }
        true
    }

    fn touch(&self) {
        self.inner.lock().last_touch = Instant::now();
    }

    #[inline]
    pub(crate) fn is_waiting(&self) -> bool {
        self.state() == RequestState::Waiting
    }

    pub(crate) fn set_score(&self, score: i64) {
        self.inner.lock().score = Some(score);
    }

    pub(crate) fn mark_cancelled(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RequestState::Waiting || inner.resource.is_some() {
            return false;
        }
        inner.cancelled = true;
        inner.set_state(RequestState::Cancelled);
        self.resolution.send_replace(Resolution::Cancelled);
        true
    }

    /// Assigns the resource if the request is still waiting.
    pub(crate) fn grant(&self, resource: ResourceRef, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RequestState::Waiting || inner.cancelled {
            return false;
        }
        debug_assert!(inner.resource.is_none());
        debug_assert_eq!(resource.resource_type(), &self.request.resource_type);
        inner.resource = Some(resource.clone());
        inner.granted = Some(now);
        inner.set_state(RequestState::Ready);
        self.resolution.send_replace(Resolution::Granted(resource));
        true
    }

    /// Takes a granted but unused resource away and puts the request back to waiting.
    pub(crate) fn revoke(&self) -> Option<ResourceRef> {
        let mut inner = self.inner.lock();
        if inner.state != RequestState::Ready {
            return None;
        }
        let resource = inner.resource.take();
        inner.granted = None;
        inner.set_state(RequestState::Waiting);
        self.resolution.send_replace(Resolution::Pending);
        resource
    }

    pub(crate) fn start_working(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RequestState::Ready {
            return false;
        }
        inner.set_state(RequestState::Working);
        true
    }

    /// Moves a request holding a resource into `new_state`, returning the old state.
    pub(crate) fn release_with(&self, new_state: RequestState) -> Option<RequestState> {
        debug_assert!(matches!(
            new_state,
            RequestState::Finished | RequestState::Orphaned
        ));
        let mut inner = self.inner.lock();
        if !inner.state.holds_resource() {
            return None;
        }
        Some(inner.set_state(new_state))
    }

    pub(crate) fn resolve_shutdown(&self) {
        let _inner = self.inner.lock();
        self.resolution.send_if_modified(|r| {
            if matches!(r, Resolution::Pending) {
                *r = Resolution::Shutdown;
                true
            } else {
                false
            }
        });
    }
}
