//! Automatic acceptance of connection requests followed by delayed enrollment
//! into a designated destination.

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    domain::Contact,
    errors::Error,
    events::RawConnectionRequest,
    logging::EventLog,
    scheduler::TaskScheduler,
    session::AccountSession,
    Result,
};

const SCOPE: &str = "admission";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionState {
    Pending,
    Accepted,
    Enrolled,
    Failed(String),
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionState::Pending => f.write_str("pending"),
            AdmissionState::Accepted => f.write_str("accepted"),
            AdmissionState::Enrolled => f.write_str("enrolled"),
            AdmissionState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// An incoming request to become contacts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub id: String,
    pub contact: Contact,
    pub hello: Option<String>,
    state: AdmissionState,
}

impl ConnectionRequest {
    pub fn new(id: impl Into<String>, contact: Contact) -> Self {
        Self {
            id: id.into(),
            contact,
            hello: None,
            state: AdmissionState::Pending,
        }
    }

    pub fn state(&self) -> &AdmissionState {
        &self.state
    }

    /// Move to `next`. Only forward transitions are allowed; `Failed` and
    /// `Enrolled` are terminal.
    pub fn advance(&mut self, next: AdmissionState) -> Result<()> {
        use AdmissionState::*;
        let ok = matches!(
            (&self.state, &next),
            (Pending, Accepted) | (Accepted, Enrolled) | (Pending | Accepted, Failed(_))
        );
        if !ok {
            return Err(Error::Admission(format!(
                "illegal transition {} -> {next}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

impl From<RawConnectionRequest> for ConnectionRequest {
    fn from(raw: RawConnectionRequest) -> Self {
        Self {
            id: raw.id,
            contact: raw.contact,
            hello: raw.hello,
            state: AdmissionState::Pending,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    /// Destination new contacts are enrolled into.
    pub target: String,
    /// Wait before accepting.
    pub accept_delay: Duration,
    /// Wait between resolving the target and adding the contact.
    pub enroll_delay: Duration,
}

impl AdmissionConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            accept_delay: Duration::from_secs(4),
            enroll_delay: Duration::from_secs(3),
        }
    }
}

pub struct AdmissionWorkflow {
    session: Arc<dyn AccountSession>,
    log: Arc<dyn EventLog>,
    scheduler: TaskScheduler,
    cfg: AdmissionConfig,
}

impl AdmissionWorkflow {
    pub fn new(
        session: Arc<dyn AccountSession>,
        log: Arc<dyn EventLog>,
        scheduler: TaskScheduler,
        cfg: AdmissionConfig,
    ) -> Self {
        Self {
            session,
            log,
            scheduler,
            cfg,
        }
    }

    /// Drive `request` through accept and enroll. Returns the request in its
    /// final state; a shutdown during either wait leaves it where it was.
    pub async fn handle(&self, mut request: ConnectionRequest) -> ConnectionRequest {
        let name = request.contact.name.clone();
        let target = self.cfg.target.as_str();
        self.log.info(
            SCOPE,
            format!("connection request from {name}, accepting and inviting to {target}"),
        );

        if !self.scheduler.sleep(self.cfg.accept_delay).await {
            self.log
                .warn(SCOPE, format!("shutdown before accepting {name}"));
            return request;
        }

        if let Err(e) = self.session.accept(&request).await {
            self.fail(&mut request, format!("accept failed: {e}"));
            return request;
        }
        if !self.transition(&mut request, AdmissionState::Accepted) {
            return request;
        }
        self.log.info(SCOPE, format!("accepted {name}"));

        let dest = match self.session.resolve(target).await {
            Ok(Some(dest)) => dest,
            Ok(None) => {
                self.log
                    .warn(SCOPE, format!("enrollment target {target} not found"));
                return request;
            }
            Err(e) => {
                self.log
                    .warn(SCOPE, format!("lookup of enrollment target {target} failed: {e}"));
                return request;
            }
        };

        if !self.scheduler.sleep(self.cfg.enroll_delay).await {
            self.log
                .warn(SCOPE, format!("shutdown before inviting {name} to {target}"));
            return request;
        }

        if let Err(e) = dest.add_member(&request.contact).await {
            self.fail(&mut request, format!("invite to {target} failed: {e}"));
            return request;
        }
        if self.transition(&mut request, AdmissionState::Enrolled) {
            self.log
                .info(SCOPE, format!("invited {name} to {target}"));
        }
        request
    }

    fn fail(&self, request: &mut ConnectionRequest, reason: String) {
        self.log.error(
            SCOPE,
            format!("request from {}: {reason}", request.contact.name),
        );
        self.transition(request, AdmissionState::Failed(reason));
    }

    fn transition(&self, request: &mut ConnectionRequest, next: AdmissionState) -> bool {
        match request.advance(next) {
            Ok(()) => true,
            Err(e) => {
                self.log.error(SCOPE, e.to_string());
                false
            }
        }
    }
}
