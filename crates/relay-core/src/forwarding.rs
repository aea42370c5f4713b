//! Selective fan-out of direct messages from allow-listed senders.

use std::{collections::HashSet, sync::Arc};

use crate::{
    classifier::{Content, ContentKind, Message},
    errors::Error,
    logging::EventLog,
    media::image_payload,
    messaging::types::OutboundPayload,
    session::AccountSession,
    Result,
};

const SCOPE: &str = "forward";

/// Sender aliases allowed to trigger forwarding.
#[derive(Clone, Debug, Default)]
pub struct AllowList(HashSet<String>);

impl AllowList {
    pub fn new<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(aliases.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, alias: Option<&str>) -> bool {
        alias.is_some_and(|a| self.0.contains(a))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterReason {
    SenderNotAllowed,
    GroupContext,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    NotFound,
    LookupFailed(String),
    Failed(String),
    /// Not attempted because the payload could not be built.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationOutcome {
    pub name: String,
    pub outcome: DeliveryOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForwardReport {
    Filtered(FilterReason),
    Unsupported,
    Delivered(Vec<DestinationOutcome>),
}

impl ForwardReport {
    pub fn sent_count(&self) -> usize {
        match self {
            ForwardReport::Delivered(outcomes) => outcomes
                .iter()
                .filter(|o| o.outcome == DeliveryOutcome::Sent)
                .count(),
            _ => 0,
        }
    }
}

pub struct ForwardingEngine {
    session: Arc<dyn AccountSession>,
    log: Arc<dyn EventLog>,
    allow: AllowList,
    destinations: Vec<String>,
}

impl ForwardingEngine {
    pub fn new(
        session: Arc<dyn AccountSession>,
        log: Arc<dyn EventLog>,
        allow: AllowList,
        destinations: Vec<String>,
    ) -> Self {
        Self {
            session,
            log,
            allow,
            destinations,
        }
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    /// Forward `message` to every configured destination.
    ///
    /// Each destination is resolved and sent to independently; a missing or
    /// failing destination is logged and the loop moves on.
    pub async fn handle(&self, message: &Message) -> ForwardReport {
        if !self.allow.contains(message.sender_alias()) {
            return ForwardReport::Filtered(FilterReason::SenderNotAllowed);
        }
        if message.is_group() {
            return ForwardReport::Filtered(FilterReason::GroupContext);
        }

        let sender = message.sender.label().to_string();
        if message.kind == ContentKind::Unsupported {
            self.log.warn(
                SCOPE,
                format!(
                    "unsupported message type {} from {sender}, not forwarded",
                    message.raw_kind
                ),
            );
            return ForwardReport::Unsupported;
        }

        let kind = message.kind.as_str();
        self.log
            .info(SCOPE, format!("direct {kind} message from {sender}"));

        let mut outcomes = Vec::with_capacity(self.destinations.len());
        let mut payload: Option<OutboundPayload> = None;
        let mut conversion_failed = false;

        for name in &self.destinations {
            if conversion_failed {
                outcomes.push(outcome(name, DeliveryOutcome::Skipped));
                continue;
            }

            let dest = match self.session.resolve(name).await {
                Ok(Some(dest)) => dest,
                Ok(None) => {
                    self.log
                        .warn(SCOPE, format!("destination {name} not found"));
                    outcomes.push(outcome(name, DeliveryOutcome::NotFound));
                    continue;
                }
                Err(e) => {
                    self.log
                        .warn(SCOPE, format!("lookup of destination {name} failed: {e}"));
                    outcomes.push(outcome(name, DeliveryOutcome::LookupFailed(e.to_string())));
                    continue;
                }
            };

            // Built once, on the first destination that resolves.
            if payload.is_none() {
                match self.convert(message).await {
                    Ok(p) => payload = Some(p),
                    Err(e) => {
                        self.log.error(
                            SCOPE,
                            format!("could not convert {kind} from {sender}: {e}"),
                        );
                        conversion_failed = true;
                        outcomes.push(outcome(name, DeliveryOutcome::Skipped));
                        continue;
                    }
                }
            }
            let Some(p) = payload.as_ref() else {
                continue;
            };

            match dest.send(p).await {
                Ok(()) => {
                    self.log
                        .info(SCOPE, format!("forwarded {kind} from {sender} to {name}"));
                    outcomes.push(outcome(name, DeliveryOutcome::Sent));
                }
                Err(e) => {
                    self.log.error(
                        SCOPE,
                        format!("forwarding {kind} from {sender} to {name} failed: {e}"),
                    );
                    outcomes.push(outcome(name, DeliveryOutcome::Failed(e.to_string())));
                }
            }
        }

        ForwardReport::Delivered(outcomes)
    }

    async fn convert(&self, message: &Message) -> Result<OutboundPayload> {
        match &message.content {
            Content::Text(text) => Ok(OutboundPayload::Text { text: text.clone() }),
            Content::Link(link) => Ok(OutboundPayload::Url(link.clone())),
            Content::Media(media) => {
                let bytes = self.session.read_media(media).await?;
                Ok(image_payload(&bytes, media))
            }
            Content::Empty => Err(Error::Conversion("message has no content".to_string())),
        }
    }
}

fn outcome(name: &str, outcome: DeliveryOutcome) -> DestinationOutcome {
    DestinationOutcome {
        name: name.to_string(),
        outcome,
    }
}
