use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::Notify;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver};
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use crate::RequestId;
use crate::config::BrokerConfig;
use crate::internal::scheduler::assign::{run_backlog_scan, try_assign_resource};
use crate::internal::server::comm::CommSender;
use crate::internal::server::core::Core;
use crate::internal::server::reactor;
use crate::internal::server::request::ManagedRequestRef;
use crate::inventory::{ResourceEvent, ResourceInventory};

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Messages from the admission path and request handles.
#[derive(Debug)]
pub(crate) enum ToAssigner {
    NewRequest(ManagedRequestRef),
    Cancelled(RequestId),
}

pub(crate) struct AssignerInputs {
    pub resource_events: Receiver<ResourceEvent>,
    pub messages: UnboundedReceiver<ToAssigner>,
    /// Set by the inventory sink when an event was dropped.
    pub overflow: Arc<AtomicBool>,
    pub wakeup: Arc<Notify>,
}

/// The single writer of assignment state.
pub(crate) struct Assigner {
    core: Core,
    comm: CommSender,
    inventory: Arc<dyn ResourceInventory>,
    config: BrokerConfig,
    evictions: DelayQueue<RequestId>,
    rescan_at: Option<tokio::time::Instant>,
    reap_at: Option<tokio::time::Instant>,
}

enum Wakeup {
    Shutdown,
    Overflow,
    ResourceEvent(ResourceEvent),
    ResourceEventsClosed,
    Message(ToAssigner),
    Evict(RequestId),
    Rescan,
    Reap,
}

impl Assigner {
    pub fn new(
        core: Core,
        comm: CommSender,
        inventory: Arc<dyn ResourceInventory>,
        config: BrokerConfig,
    ) -> Self {
        Assigner {
            core,
            comm,
            inventory,
            config,
            evictions: DelayQueue::new(),
            rescan_at: None,
            reap_at: None,
        }
    }

    pub async fn run(mut self, mut inputs: AssignerInputs, token: CancellationToken) {
        log::debug!("Assigner started");
        let snapshot = self.inventory.resources();
        reactor::on_resync(&mut self.core, &mut self.comm, snapshot);
        self.schedule_reap();

        let mut events_open = true;
        loop {
            let wakeup = tokio::select! {
                biased;
                _ = token.cancelled() => Wakeup::Shutdown,
                _ = inputs.wakeup.notified() => Wakeup::Overflow,
                event = inputs.resource_events.recv(), if events_open => match event {
                    Some(event) => Wakeup::ResourceEvent(event),
                    None => Wakeup::ResourceEventsClosed,
                },
                message = inputs.messages.recv() => match message {
                    Some(message) => Wakeup::Message(message),
                    None => Wakeup::Shutdown,
                },
                Some(expired) = self.evictions.next(), if !self.evictions.is_empty() => {
                    Wakeup::Evict(expired.into_inner())
                }
                _ = sleep_until_opt(self.rescan_at) => Wakeup::Rescan,
                _ = sleep_until_opt(self.reap_at) => Wakeup::Reap,
            };

            let now = Instant::now();
            let mut scan_backlog = false;
            match wakeup {
                Wakeup::Shutdown => break,
                Wakeup::Overflow => {}
                Wakeup::ResourceEvent(event) => {
                    reactor::on_resource_event(&mut self.core, &mut self.comm, event)
                }
                Wakeup::ResourceEventsClosed => {
                    log::warn!("Inventory dropped all event sinks");
                    events_open = false;
                }
                Wakeup::Message(message) => self.on_message(message),
                Wakeup::Evict(request_id) => reactor::on_evict(&mut self.core, request_id),
                Wakeup::Rescan => {
                    self.rescan_at = None;
                    scan_backlog = true;
                }
                Wakeup::Reap => {
                    if let Some(timeout) = self.config.abandon_timeout {
                        reactor::reap_abandoned(&mut self.core, &mut self.comm, now, timeout);
                    }
                    self.schedule_reap();
                }
            }
            if inputs.overflow.swap(false, Ordering::SeqCst) {
                log::warn!("Resource events were dropped, resynchronizing with the inventory");
                let snapshot = self.inventory.resources();
                reactor::on_resync(&mut self.core, &mut self.comm, snapshot);
                scan_backlog = true;
            }
            self.drain(&mut inputs, now);
            // New and requeued requests may fit resources that are already idle
            scan_backlog |= self.core.take_backlog_grew();
            if scan_backlog {
                run_backlog_scan(&mut self.core, &mut self.comm, now);
            }
            self.flush_comm();
        }

        reactor::on_shutdown(&mut self.core);
        log::debug!("Assigner stopped");
    }

    /// Processes everything that is already queued.
    ///
    /// Admitted requests and cancellations are read before any resource is
    /// offered, so every offer ranks all requests submitted so far. Resources
    /// made available by events are offered before the backlog scan.
    fn drain(&mut self, inputs: &mut AssignerInputs, now: Instant) {
        loop {
            let mut progress = false;
            while let Ok(event) = inputs.resource_events.try_recv() {
                reactor::on_resource_event(&mut self.core, &mut self.comm, event);
                progress = true;
            }
            while let Ok(message) = inputs.messages.try_recv() {
                self.on_message(message);
                progress = true;
            }
            while let Some(resource_id) = self.core.pop_queued_resource() {
                try_assign_resource(&mut self.core, &mut self.comm, resource_id, now);
            }
            if !progress {
                break;
            }
        }
    }

    fn on_message(&mut self, message: ToAssigner) {
        match message {
            ToAssigner::NewRequest(request) => reactor::on_new_request(&mut self.core, request),
            ToAssigner::Cancelled(request_id) => {
                reactor::on_cancel_request(&mut self.core, &mut self.comm, request_id)
            }
        }
    }

    fn flush_comm(&mut self) {
        for request_id in self.comm.take_evictions() {
            self.evictions.insert(request_id, self.config.eviction_grace);
        }
        if self.comm.take_rescan_flag() && self.rescan_at.is_none() {
            self.rescan_at = Some(tokio::time::Instant::now() + self.config.rescan_delay);
        }
    }

    fn schedule_reap(&mut self) {
        self.reap_at = self.config.abandon_timeout.map(|timeout| {
            tokio::time::Instant::now() + (timeout / 2).max(MIN_REAP_INTERVAL)
        });
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
