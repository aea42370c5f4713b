//! Account session backed by a sidecar process speaking JSON lines on stdio.
//!
//! The sidecar owns the IM protocol. It prints events and command responses on
//! stdout and reads commands on stdin; see [`protocol`] for the wire format.

pub mod process;
pub mod protocol;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::Child,
    sync::{mpsc, oneshot, Mutex},
};

use relay_core::{
    admission::ConnectionRequest,
    directory::{ChannelDirectory, Destination},
    domain::{BlobSource, Contact, MediaRef},
    errors::Error,
    events::InboundEvent,
    media::{decode_base64, BlobLoader},
    messaging::types::OutboundPayload,
    session::AccountSession,
    Result,
};

use crate::{
    process::{reap, spawn_sidecar, SidecarConfig, StderrTail},
    protocol::{encode_command, parse_line, BridgeLine, Command, FileInfo, RoomInfo},
};

const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(2);

type Outcome = std::result::Result<Value, String>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub sidecar: SidecarConfig,
    pub request_timeout: Duration,
    pub event_buffer: usize,
}

impl BridgeConfig {
    pub fn new(sidecar: SidecarConfig) -> Self {
        Self {
            sidecar,
            request_timeout: Duration::from_secs(15),
            event_buffer: 256,
        }
    }
}

struct Inner {
    writer: Mutex<Option<Writer>>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Outcome>>>,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
    blobs: BlobLoader,
    request_timeout: Duration,
    stderr_tail: Option<Arc<Mutex<StderrTail>>>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fail_pending(&self, reason: &str) {
        for (_, tx) in self.pending().drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

struct PendingGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.id);
    }
}

/// Handle to a running sidecar. Cheap to clone.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<Inner>,
}

impl BridgeClient {
    /// Launch the sidecar and return the client plus its event stream.
    pub fn spawn(cfg: BridgeConfig) -> Result<(Self, mpsc::Receiver<InboundEvent>)> {
        let sidecar = spawn_sidecar(&cfg.sidecar)?;
        let (client, events) = Self::build(
            Box::new(sidecar.stdin),
            sidecar.stdout,
            Some(sidecar.child),
            Some(sidecar.stderr_tail),
            cfg.request_timeout,
            cfg.event_buffer,
        )?;
        Ok((client, events))
    }

    /// Drive the protocol over arbitrary pipes (no child process).
    pub fn from_io<W, R>(
        writer: W,
        reader: R,
        request_timeout: Duration,
        event_buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<InboundEvent>)>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::build(
            Box::new(writer),
            reader,
            None,
            None,
            request_timeout,
            event_buffer,
        )
    }

    fn build<R>(
        writer: Writer,
        reader: R,
        child: Option<Child>,
        stderr_tail: Option<Arc<Mutex<StderrTail>>>,
        request_timeout: Duration,
        event_buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<InboundEvent>)>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let inner = Arc::new(Inner {
            writer: Mutex::new(Some(writer)),
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            child: Mutex::new(child),
            closed: AtomicBool::new(false),
            blobs: BlobLoader::new()?,
            request_timeout,
            stderr_tail,
        });
        let (tx, rx) = mpsc::channel(event_buffer.max(1));
        tokio::spawn(read_loop(inner.clone(), reader, tx));
        Ok((Self { inner }, rx))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Send one command and wait for its response.
    pub async fn request(&self, cmd: Command) -> Result<Value> {
        let op = cmd.op();
        if self.is_closed() {
            return Err(Error::Bridge(format!("cannot {op}: bridge is closed")));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let line = encode_command(id, &cmd)?;
        let (tx, rx) = oneshot::channel();
        self.inner.pending().insert(id, tx);
        // Removes the entry however this future ends, including when a caller's
        // own timeout drops it.
        let _pending = PendingGuard {
            inner: &self.inner,
            id,
        };

        self.write_line(&line).await?;

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(Error::Bridge(format!("{op} failed: {reason}"))),
            Ok(Err(_)) => Err(Error::Bridge(format!("{op} dropped without a response"))),
            Err(_) => Err(Error::Timeout {
                op: op.to_string(),
                after: self.inner.request_timeout,
            }),
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending().len()
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(Error::Bridge("bridge stdin is closed".to_string()));
        };
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Bridge(format!("write to bridge failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Bridge(format!("flush to bridge failed: {e}")))?;
        Ok(())
    }

    /// Ask the sidecar to log out and exit; kill it if it is still running
    /// after `grace`.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        if !self.is_closed() {
            let ack = tokio::time::timeout(STOP_ACK_TIMEOUT.min(grace), self.request(Command::Stop));
            match ack.await {
                Ok(Ok(_)) => tracing::debug!("bridge acknowledged stop"),
                Ok(Err(e)) => tracing::warn!(error = %e, "bridge stop request failed"),
                Err(_) => tracing::warn!("bridge did not acknowledge stop"),
            }
        }

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        if let Some(child) = self.inner.child.lock().await.take() {
            reap(child, grace).await?;
        }
        Ok(())
    }
}

async fn read_loop<R>(inner: Arc<Inner>, reader: R, events: mpsc::Sender<InboundEvent>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "bridge stdout read failed");
                break;
            }
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(BridgeLine::Event(event))) => {
                tracing::debug!(kind = event.kind(), "bridge event");
                // Keep serving responses even when nobody listens for events.
                let _ = events.send(event).await;
            }
            Ok(Some(BridgeLine::Response { id, outcome })) => {
                let waiter = inner.pending().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => tracing::debug!(id, "response for unknown request"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "skipping malformed bridge line");
            }
        }
    }

    inner.closed.store(true, Ordering::SeqCst);
    inner.fail_pending("bridge closed");

    let tail = match &inner.stderr_tail {
        Some(tail) => tail.lock().await.snapshot(),
        None => String::new(),
    };
    if tail.is_empty() {
        tracing::info!("bridge stdout closed");
    } else {
        tracing::warn!(stderr = %tail, "bridge stdout closed");
    }
}

#[async_trait]
impl ChannelDirectory for BridgeClient {
    async fn resolve(&self, name: &str) -> Result<Option<Arc<dyn Destination>>> {
        let value = self
            .request(Command::FindRoom {
                topic: name.to_string(),
            })
            .await
            .map_err(|e| Error::Lookup {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if value.is_null() {
            return Ok(None);
        }
        let room: RoomInfo = serde_json::from_value(value)?;
        Ok(Some(Arc::new(BridgeRoom {
            client: self.clone(),
            id: room.id,
            name: name.to_string(),
        })))
    }
}

#[async_trait]
impl AccountSession for BridgeClient {
    async fn accept(&self, request: &ConnectionRequest) -> Result<()> {
        self.request(Command::AcceptFriendship {
            request_id: request.id.clone(),
        })
        .await
        .map_err(|e| Error::Admission(format!("accept {} failed: {e}", request.id)))?;
        Ok(())
    }

    async fn read_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        match &media.source {
            BlobSource::Message { message_id } => {
                let value = self
                    .request(Command::MessageFile {
                        message_id: message_id.clone(),
                    })
                    .await
                    .map_err(|e| Error::Conversion(e.to_string()))?;
                let file: FileInfo = serde_json::from_value(value)?;
                decode_base64(&file.data)
            }
            _ => self.inner.blobs.load(media).await,
        }
    }
}

/// A group resolved through the sidecar.
pub struct BridgeRoom {
    client: BridgeClient,
    id: String,
    name: String,
}

impl BridgeRoom {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Destination for BridgeRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<()> {
        self.client
            .request(Command::Say {
                room_id: self.id.clone(),
                payload: payload.clone(),
            })
            .await
            .map_err(|e| Error::Send {
                destination: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn add_member(&self, contact: &Contact) -> Result<()> {
        self.client
            .request(Command::AddMember {
                room_id: self.id.clone(),
                contact_id: contact.id.0.clone(),
            })
            .await
            .map_err(|e| Error::Admission(format!("add {contact} to {} failed: {e}", self.name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::events::ScanStatus;
    use tokio::io::{duplex, DuplexStream};

    /// Scripted sidecar end of the pipes.
    struct FakeSidecar {
        commands: tokio::io::Lines<BufReader<DuplexStream>>,
        out: DuplexStream,
    }

    impl FakeSidecar {
        async fn next_command(&mut self) -> Option<Value> {
            let line = self.commands.next_line().await.ok()??;
            serde_json::from_str(&line).ok()
        }

        async fn emit(&mut self, line: &str) {
            self.out.write_all(line.as_bytes()).await.unwrap();
            self.out.write_all(b"\n").await.unwrap();
            self.out.flush().await.unwrap();
        }

        async fn respond(&mut self, id: &Value, result: Value) {
            let line = serde_json::json!({"type": "response", "id": id, "ok": true, "result": result});
            self.emit(&line.to_string()).await;
        }

        async fn fail(&mut self, id: &Value, error: &str) {
            let line = serde_json::json!({"type": "response", "id": id, "ok": false, "error": error});
            self.emit(&line.to_string()).await;
        }
    }

    fn connect(timeout: Duration) -> (BridgeClient, mpsc::Receiver<InboundEvent>, FakeSidecar) {
        let (client_w, sidecar_r) = duplex(64 * 1024);
        let (sidecar_w, client_r) = duplex(64 * 1024);
        let (client, events) = BridgeClient::from_io(client_w, client_r, timeout, 16).unwrap();
        let sidecar = FakeSidecar {
            commands: BufReader::new(sidecar_r).lines(),
            out: sidecar_w,
        };
        (client, events, sidecar)
    }

    #[tokio::test]
    async fn events_reach_the_receiver_and_bad_lines_are_skipped() {
        let (_client, mut events, mut sidecar) = connect(Duration::from_secs(1));
        sidecar.emit("garbage").await;
        sidecar
            .emit(r#"{"type":"event","event":"scan","code":"qr-1","status":"waiting"}"#)
            .await;

        let ev = events.recv().await.unwrap();
        assert_eq!(
            ev,
            InboundEvent::ScanChallenge {
                code: "qr-1".to_string(),
                status: ScanStatus::Waiting
            }
        );
    }

    #[tokio::test]
    async fn resolve_finds_a_room_and_sends_through_it() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(1));

        let server = tokio::spawn(async move {
            let find = sidecar.next_command().await.unwrap();
            assert_eq!(find["op"], "room.find");
            assert_eq!(find["topic"], "Ops");
            sidecar
                .respond(&find["id"], serde_json::json!({"id": "room-7", "topic": "Ops"}))
                .await;

            let say = sidecar.next_command().await.unwrap();
            assert_eq!(say["op"], "room.say");
            assert_eq!(say["room_id"], "room-7");
            assert_eq!(say["payload"]["text"], "hello");
            sidecar.respond(&say["id"], Value::Null).await;
            sidecar
        });

        let room = client.resolve("Ops").await.unwrap().unwrap();
        assert_eq!(room.name(), "Ops");
        room.send(&OutboundPayload::Text {
            text: "hello".to_string(),
        })
        .await
        .unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_room_resolves_to_none() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(1));
        let server = tokio::spawn(async move {
            let find = sidecar.next_command().await.unwrap();
            sidecar.respond(&find["id"], Value::Null).await;
            sidecar
        });

        assert!(client.resolve("Nowhere").await.unwrap().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_send_is_a_send_error() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(1));
        let server = tokio::spawn(async move {
            let find = sidecar.next_command().await.unwrap();
            sidecar.respond(&find["id"], serde_json::json!({"id": "r1"})).await;
            let say = sidecar.next_command().await.unwrap();
            sidecar.fail(&say["id"], "muted").await;
            sidecar
        });

        let room = client.resolve("Ops").await.unwrap().unwrap();
        let err = room
            .send(&OutboundPayload::Text {
                text: "x".to_string(),
            })
            .await
            .unwrap_err();
        match err {
            Error::Send { destination, reason } => {
                assert_eq!(destination, "Ops");
                assert!(reason.contains("muted"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_sidecar_times_out() {
        let (client, _events, mut sidecar) = connect(Duration::from_millis(50));
        let server = tokio::spawn(async move {
            let cmd = sidecar.next_command().await.unwrap();
            assert_eq!(cmd["op"], "friendship.accept");
            sidecar
        });

        let req = ConnectionRequest::new("f1", Contact::new("c1", "Carol"));
        let err = client.accept(&req).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        let _sidecar = server.await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_request_leaves_no_pending_entry() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(30));
        let server = tokio::spawn(async move {
            let _ = sidecar.next_command().await.unwrap();
            sidecar
        });

        let outer = tokio::time::timeout(
            Duration::from_millis(50),
            client.request(Command::FindRoom {
                topic: "Ops".to_string(),
            }),
        )
        .await;
        assert!(outer.is_err());
        assert_eq!(client.pending_requests(), 0);
        let _sidecar = server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_stdout_fails_pending_and_later_requests() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(5));
        let server = tokio::spawn(async move {
            let _ = sidecar.next_command().await.unwrap();
            drop(sidecar);
        });

        let err = client.resolve("Ops").await.err().unwrap();
        assert!(matches!(err, Error::Lookup { .. }));
        server.await.unwrap();

        for _ in 0..50 {
            if client.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(client.is_closed());
        assert!(client
            .request(Command::FindRoom {
                topic: "Ops".to_string()
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn message_attachments_are_read_through_the_sidecar() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(1));
        let server = tokio::spawn(async move {
            let cmd = sidecar.next_command().await.unwrap();
            assert_eq!(cmd["op"], "message.file");
            assert_eq!(cmd["message_id"], "m-1");
            sidecar
                .respond(&cmd["id"], serde_json::json!({"data": "aGVsbG8="}))
                .await;
            sidecar
        });

        let media = MediaRef {
            name: Some("a.png".to_string()),
            mime: None,
            source: BlobSource::Message {
                message_id: "m-1".to_string(),
            },
        };
        assert_eq!(client.read_media(&media).await.unwrap(), b"hello".to_vec());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn add_member_targets_the_room_id() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(1));
        let server = tokio::spawn(async move {
            let find = sidecar.next_command().await.unwrap();
            sidecar.respond(&find["id"], serde_json::json!({"id": "room-9"})).await;
            let add = sidecar.next_command().await.unwrap();
            assert_eq!(add["op"], "room.add");
            assert_eq!(add["room_id"], "room-9");
            assert_eq!(add["contact_id"], "c9");
            sidecar.respond(&add["id"], Value::Null).await;
            sidecar
        });

        let room = client.resolve("Welcome").await.unwrap().unwrap();
        room.add_member(&Contact::new("c9", "Dan")).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stop_sends_stop_and_closes_stdin() {
        let (client, _events, mut sidecar) = connect(Duration::from_secs(1));
        let server = tokio::spawn(async move {
            let cmd = sidecar.next_command().await.unwrap();
            assert_eq!(cmd["op"], "stop");
            sidecar.respond(&cmd["id"], Value::Null).await;
            // stdin reaches EOF once the client shuts its writer.
            assert!(sidecar.next_command().await.is_none());
        });

        client.stop(Duration::from_secs(1)).await.unwrap();
        server.await.unwrap();
    }
}
