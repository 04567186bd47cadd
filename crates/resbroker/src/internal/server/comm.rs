use tokio::sync::mpsc::UnboundedSender;

use crate::RequestId;
use crate::events::BrokerEvent;
use crate::internal::server::request::{ManagedRequestRef, RequestState};

/// Outgoing side effects of the reactor.
pub(crate) trait Comm {
    fn publish(&mut self, event: BrokerEvent);
    /// Removes a terminal request from the live set after the eviction grace period.
    fn schedule_eviction(&mut self, request_id: RequestId);
    /// Asks for a delayed scan of the whole backlog.
    fn ask_for_rescan(&mut self);

    fn request_state_changed(
        &mut self,
        request: &ManagedRequestRef,
        previous: RequestState,
        new: RequestState,
    ) {
        if previous != new {
            self.publish(BrokerEvent::RequestStateChanged {
                request: request.clone(),
                previous,
                new,
            });
        }
    }
}

#[derive(Default)]
pub(crate) struct CommSender {
    events: Option<UnboundedSender<BrokerEvent>>,
    evictions: Vec<RequestId>,
    need_rescan: bool,
}

impl CommSender {
    pub fn new(events: Option<UnboundedSender<BrokerEvent>>) -> Self {
        CommSender {
            events,
            evictions: Vec::new(),
            need_rescan: false,
        }
    }

    pub fn take_evictions(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.evictions)
    }

    pub fn take_rescan_flag(&mut self) -> bool {
        std::mem::take(&mut self.need_rescan)
    }
}

impl Comm for CommSender {
    fn publish(&mut self, event: BrokerEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                log::debug!("Event dispatcher is gone, dropping event");
            }
        }
    }

    fn schedule_eviction(&mut self, request_id: RequestId) {
        self.evictions.push(request_id);
    }

    fn ask_for_rescan(&mut self) {
        self.need_rescan = true;
    }
}
