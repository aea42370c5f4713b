//! Routes inbound account events to the forwarding and admission workflows.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    admission::{AdmissionWorkflow, ConnectionRequest},
    classifier::classify,
    events::{ConnectionKind, InboundEvent, ScanStatus},
    forwarding::ForwardingEngine,
    logging::EventLog,
    scheduler::TaskScheduler,
    status::SessionStatus,
};

const SCOPE: &str = "session";

#[derive(Clone)]
pub struct EventDispatcher {
    forwarding: Arc<ForwardingEngine>,
    admission: Arc<AdmissionWorkflow>,
    status: Arc<SessionStatus>,
    log: Arc<dyn EventLog>,
    scheduler: TaskScheduler,
}

impl EventDispatcher {
    pub fn new(
        forwarding: Arc<ForwardingEngine>,
        admission: Arc<AdmissionWorkflow>,
        status: Arc<SessionStatus>,
        log: Arc<dyn EventLog>,
        scheduler: TaskScheduler,
    ) -> Self {
        Self {
            forwarding,
            admission,
            status,
            log,
            scheduler,
        }
    }

    /// Consume events in arrival order until the stream closes or shutdown
    /// starts. Returns the number of events dispatched.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) -> usize {
        let cancel = self.scheduler.cancellation();
        let mut dispatched = 0usize;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                ev = events.recv() => ev,
            };
            let Some(event) = event else {
                self.log
                    .warn(SCOPE, "account event stream closed".to_string());
                break;
            };
            self.dispatch(event);
            dispatched += 1;
        }
        dispatched
    }

    /// Route one event. Workflow handlers are spawned and never awaited here.
    pub fn dispatch(&self, event: InboundEvent) {
        match event {
            InboundEvent::Message(raw) => {
                let message = classify(raw);
                self.log.info(
                    SCOPE,
                    format!(
                        "message {} ({}) from {}{}",
                        message.id,
                        message.raw_kind,
                        message.sender.label(),
                        if message.is_group() { " in group" } else { "" }
                    ),
                );
                let engine = self.forwarding.clone();
                self.scheduler.spawn(async move {
                    engine.handle(&message).await;
                });
            }
            InboundEvent::ConnectionRequest(raw) => {
                if raw.kind != ConnectionKind::Receive {
                    self.log.info(
                        SCOPE,
                        format!(
                            "friendship notification {:?} from {}, nothing to do",
                            raw.kind, raw.contact.name
                        ),
                    );
                    return;
                }
                let request = ConnectionRequest::from(raw);
                let workflow = self.admission.clone();
                self.scheduler.spawn(async move {
                    workflow.handle(request).await;
                });
            }
            InboundEvent::ScanChallenge { code, status } => {
                self.status.on_scan(&code, status);
                if status == ScanStatus::Waiting {
                    self.log.info(
                        SCOPE,
                        "login QR code ready, open /qrcode to scan it".to_string(),
                    );
                } else {
                    self.log
                        .info(SCOPE, format!("login scan status: {status:?}"));
                }
            }
            InboundEvent::SessionStarted { user } => {
                self.status.on_login(&user);
                self.log.info(SCOPE, format!("user {user} logged in"));
            }
            InboundEvent::SessionEnded { user } => {
                self.status.on_logout();
                self.log.info(SCOPE, format!("user {user} logged out"));
            }
            InboundEvent::Error { message } => {
                self.log.error(SCOPE, format!("account error: {message}"));
            }
        }
    }
}
