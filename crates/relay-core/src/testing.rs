//! In-memory account session used by the engine tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    admission::ConnectionRequest,
    directory::{ChannelDirectory, Destination},
    domain::{BlobSource, Contact, MediaRef},
    errors::Error,
    logging::{EventLog, LogEntry},
    media::decode_base64,
    messaging::types::OutboundPayload,
    session::AccountSession,
    Result,
};

#[derive(Default)]
struct FakeState {
    rooms: Mutex<Vec<String>>,
    failing_sends: Mutex<HashSet<String>>,
    failing_lookups: Mutex<HashSet<String>>,
    fail_accept: AtomicBool,
    fail_add: AtomicBool,
    resolve_delay: Mutex<Duration>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    sends: Mutex<Vec<(String, OutboundPayload)>>,
}

impl FakeState {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[derive(Clone, Default)]
pub struct FakeSession {
    state: Arc<FakeState>,
}

impl FakeSession {
    pub fn with_rooms(rooms: &[&str]) -> Self {
        let s = Self::default();
        *s.state.rooms.lock().unwrap() = rooms.iter().map(|r| r.to_string()).collect();
        s
    }

    pub fn fail_sends_to(&self, room: &str) {
        self.state.failing_sends.lock().unwrap().insert(room.to_string());
    }

    pub fn fail_resolve(&self, name: &str) {
        self.state
            .failing_lookups
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub fn fail_accept(&self) {
        self.state.fail_accept.store(true, Ordering::SeqCst);
    }

    pub fn fail_add(&self) {
        self.state.fail_add.store(true, Ordering::SeqCst);
    }

    pub fn set_resolve_delay(&self, d: Duration) {
        *self.state.resolve_delay.lock().unwrap() = d;
    }

    pub fn put_media(&self, message_id: &str, bytes: Vec<u8>) {
        self.state
            .media
            .lock()
            .unwrap()
            .insert(message_id.to_string(), bytes);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<(String, OutboundPayload)> {
        self.state.sends.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sends()
            .into_iter()
            .filter_map(|(room, p)| match p {
                OutboundPayload::Text { text } => Some((room, text)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChannelDirectory for FakeSession {
    async fn resolve(&self, name: &str) -> Result<Option<Arc<dyn Destination>>> {
        self.state.record(format!("resolve:{name}"));
        let delay = *self.state.resolve_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        if self.state.failing_lookups.lock().unwrap().contains(name) {
            return Err(Error::Lookup {
                name: name.to_string(),
                reason: "account offline".to_string(),
            });
        }
        let found = self.state.rooms.lock().unwrap().iter().any(|r| r == name);
        if !found {
            return Ok(None);
        }
        Ok(Some(Arc::new(FakeRoom {
            name: name.to_string(),
            state: self.state.clone(),
        })))
    }
}

#[async_trait]
impl AccountSession for FakeSession {
    async fn accept(&self, request: &ConnectionRequest) -> Result<()> {
        self.state.record(format!("accept:{}", request.id));
        if self.state.fail_accept.load(Ordering::SeqCst) {
            return Err(Error::Admission("request expired".to_string()));
        }
        Ok(())
    }

    async fn read_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        self.state.record("read_media".to_string());
        match &media.source {
            BlobSource::Inline { data } => decode_base64(data),
            BlobSource::Message { message_id } => self
                .state
                .media
                .lock()
                .unwrap()
                .get(message_id)
                .cloned()
                .ok_or_else(|| Error::Conversion(format!("no attachment for {message_id}"))),
            other => Err(Error::Conversion(format!("unsupported source {other:?}"))),
        }
    }
}

struct FakeRoom {
    name: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl Destination for FakeRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<()> {
        self.state
            .record(format!("send:{}:{}", self.name, payload.kind()));
        if self.state.failing_sends.lock().unwrap().contains(&self.name) {
            return Err(Error::Send {
                destination: self.name.clone(),
                reason: "room is muted".to_string(),
            });
        }
        self.state
            .sends
            .lock()
            .unwrap()
            .push((self.name.clone(), payload.clone()));
        Ok(())
    }

    async fn add_member(&self, contact: &Contact) -> Result<()> {
        self.state
            .record(format!("add:{}:{}", self.name, contact.id.0));
        if self.state.fail_add.load(Ordering::SeqCst) {
            return Err(Error::Admission("not allowed to invite".to_string()));
        }
        Ok(())
    }
}

/// Log sink that just keeps entries.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.message.contains(needle))
            .count()
    }
}

impl EventLog for MemoryLog {
    fn append(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
