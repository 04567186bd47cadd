use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::internal::server::request::{ManagedRequestRef, RequestState};

/// Observer of request lifecycle notifications (audit logs, monitoring).
///
/// Callbacks run on a dedicated dispatcher task, never on the assigner.
pub trait EventProcessor: Send + Sync {
    fn on_request_received(&self, request: &ManagedRequestRef);
    fn on_request_state_changed(
        &self,
        request: &ManagedRequestRef,
        previous: RequestState,
        new: RequestState,
    );
    fn on_request_cancelled(&self, request: &ManagedRequestRef);
}

#[derive(Debug, Clone)]
pub enum BrokerEvent {
    RequestReceived(ManagedRequestRef),
    RequestStateChanged {
        request: ManagedRequestRef,
        previous: RequestState,
        new: RequestState,
    },
    RequestCancelled(ManagedRequestRef),
}

pub(crate) async fn event_dispatch_loop(
    mut receiver: UnboundedReceiver<BrokerEvent>,
    processor: Arc<dyn EventProcessor>,
) {
    while let Some(event) = receiver.recv().await {
        match event {
            BrokerEvent::RequestReceived(request) => processor.on_request_received(&request),
            BrokerEvent::RequestStateChanged {
                request,
                previous,
                new,
            } => processor.on_request_state_changed(&request, previous, new),
            BrokerEvent::RequestCancelled(request) => processor.on_request_cancelled(&request),
        }
    }
    log::debug!("Event dispatcher stopped");
}
