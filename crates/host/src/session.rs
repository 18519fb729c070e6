//! Client session registry
//!
//! The registry is the single source of truth for which clients exist and
//! whether they are waiting for a decision or connected. A session owns its
//! transport exclusively: the raw handshake materials while pending, the
//! live socket handle once connected, never both.
//!
//! All mutation happens under one lock, so each create/promote/remove is
//! atomic with respect to every other component. Socket teardown always
//! runs after the lock is released.
//!
//! While a session waits for its decision, a watcher task owns the raw
//! connection. It buffers whatever the client sends early and evicts the
//! session as soon as the peer hangs up.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wsgate_protocol::{ClientId, UrlComponents};

use crate::error::RegistryError;

/// Early bytes buffered per pending client; past this the watcher stops reading
const MAX_EARLY_BYTES: usize = 64 * 1024;

/// Generate a new unique client ID
pub fn generate_client_id() -> ClientId {
    Uuid::new_v4().to_string()
}

/// Raw upgrade materials held while a decision is pending
#[derive(Debug)]
pub struct PendingHandshake {
    pub request: http::Request<()>,
    pub stream: TcpStream,
    /// Bytes read past the end of the request head
    pub head: Vec<u8>,
}

/// A pending handshake parked behind its disconnect watcher
///
/// Dropping the handle aborts the watcher, which drops the connection.
#[derive(Debug)]
pub struct HeldHandshake {
    release: CancellationToken,
    watcher: Option<JoinHandle<Option<PendingHandshake>>>,
}

impl HeldHandshake {
    fn watch(
        registry: Weak<SessionRegistry>,
        id: ClientId,
        handshake: PendingHandshake,
    ) -> Self {
        let release = CancellationToken::new();
        let watcher = tokio::spawn(watch_pending(registry, id, handshake, release.clone()));
        Self {
            release,
            watcher: Some(watcher),
        }
    }

    /// Abortive close: the connection is dropped without any response
    pub fn destroy(self) {
        drop(self);
    }

    /// Stop watching and take the materials back
    ///
    /// Returns `None` if the peer hung up first.
    pub async fn reclaim(mut self) -> Option<PendingHandshake> {
        let watcher = self.watcher.take()?;
        self.release.cancel();
        watcher.await.ok().flatten()
    }
}

impl Drop for HeldHandshake {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

async fn watch_pending(
    registry: Weak<SessionRegistry>,
    id: ClientId,
    mut handshake: PendingHandshake,
    release: CancellationToken,
) -> Option<PendingHandshake> {
    loop {
        if handshake.head.len() >= MAX_EARLY_BYTES {
            release.cancelled().await;
            return Some(handshake);
        }
        let read = tokio::select! {
            biased;
            () = release.cancelled() => None,
            read = handshake.stream.read_buf(&mut handshake.head) => Some(read),
        };
        match read {
            None => return Some(handshake),
            Some(Ok(0)) => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(client_id = %id, error = %e, "Pending connection failed");
                break;
            }
        }
    }

    if let Some(registry) = registry.upgrade() {
        if registry.remove_held(&id) {
            tracing::info!(client_id = %id, "Pending client disconnected");
        }
    }
    None
}

/// Request details captured once at upgrade time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub headers: BTreeMap<String, String>,
    pub url: UrlComponents,
}

/// Instructions for the task that owns a live WebSocket
#[derive(Debug)]
pub enum SocketCommand {
    Send(Message),
    /// Drop the socket without a close handshake
    Terminate,
}

/// Session-side handle to a live WebSocket
///
/// The socket itself is owned by its connection task; this handle is the
/// only way to reach it, and it is only reachable through the registry.
#[derive(Debug)]
pub struct LiveSocket {
    commands: mpsc::UnboundedSender<SocketCommand>,
    open: Arc<AtomicBool>,
}

/// Connection-task side of a [`LiveSocket`]
#[derive(Debug)]
pub struct SocketEndpoint {
    pub commands: mpsc::UnboundedReceiver<SocketCommand>,
    open: Arc<AtomicBool>,
}

impl LiveSocket {
    pub fn channel() -> (Self, SocketEndpoint) {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        (
            Self {
                commands: tx,
                open: open.clone(),
            },
            SocketEndpoint { commands: rx, open },
        )
    }

    /// Ready state: true until the socket closes or is terminated
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.commands.is_closed()
    }

    /// Queue a frame. Returns `false` if the socket is no longer open.
    pub fn send(&self, message: Message) -> bool {
        self.is_open() && self.commands.send(SocketCommand::Send(message)).is_ok()
    }

    /// Safe to call on an already-dead socket
    pub fn terminate(self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.commands.send(SocketCommand::Terminate);
    }
}

impl SocketEndpoint {
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Externally visible session state
///
/// `Closed` has no variant: closed sessions are absent from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Connected,
}

#[derive(Debug)]
enum Handshake {
    Held(HeldHandshake),
    /// Materials taken by the decision router; the token aborts it
    InFlight(CancellationToken),
}

#[derive(Debug)]
enum Phase {
    Pending(Handshake),
    Connected(LiveSocket),
}

/// One candidate-or-live WebSocket connection
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    phase: Phase,
    metadata: RequestMetadata,
}

impl ClientSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn state(&self) -> SessionState {
        match self.phase {
            Phase::Pending(_) => SessionState::Pending,
            Phase::Connected(_) => SessionState::Connected,
        }
    }

    pub const fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub const fn holds_handshake(&self) -> bool {
        matches!(self.phase, Phase::Pending(Handshake::Held(_)))
    }

    pub const fn holds_live_socket(&self) -> bool {
        matches!(self.phase, Phase::Connected(_))
    }

    fn live_socket(&self) -> Option<&LiveSocket> {
        match &self.phase {
            Phase::Connected(live) => Some(live),
            Phase::Pending(_) => None,
        }
    }

    /// Release whatever transport the session holds
    ///
    /// Connected sockets are terminated, held handshakes destroyed and
    /// in-flight handshakes cancelled. Never fails.
    pub fn teardown(self) {
        match self.phase {
            Phase::Pending(Handshake::Held(held)) => held.destroy(),
            Phase::Pending(Handshake::InFlight(cancel)) => cancel.cancel(),
            Phase::Connected(live) => live.terminate(),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: ClientId,
    pub state: SessionState,
    pub metadata: RequestMetadata,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<ClientId, ClientSession>,
    closed: bool,
}

/// Shared map from client ID to session
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending session and start watching its connection
    ///
    /// Fails once the registry is closed; the handshake is destroyed then.
    pub fn create(
        self: &Arc<Self>,
        id: ClientId,
        handshake: PendingHandshake,
        metadata: RequestMetadata,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        match inner.sessions.entry(id) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateClient(entry.key().clone())),
            Entry::Vacant(entry) => {
                let id = entry.key().clone();
                let held = HeldHandshake::watch(Arc::downgrade(self), id.clone(), handshake);
                entry.insert(ClientSession {
                    id,
                    phase: Phase::Pending(Handshake::Held(held)),
                    metadata,
                });
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<SessionInfo, RegistryError> {
        self.inner
            .lock()
            .sessions
            .get(id)
            .map(|session| SessionInfo {
                id: session.id.clone(),
                state: session.state(),
                metadata: session.metadata.clone(),
            })
            .ok_or_else(|| RegistryError::UnknownClient(id.to_string()))
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.inner.lock().sessions.get(id).map(ClientSession::state)
    }

    /// Check a session's transport ownership without exposing it
    pub fn inspect<R>(&self, id: &str, f: impl FnOnce(&ClientSession) -> R) -> Option<R> {
        self.inner.lock().sessions.get(id).map(f)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Remove a pending session and hand back its handshake materials
    ///
    /// Only succeeds while the materials are still held, so a session whose
    /// handshake is already in flight cannot be resolved a second time.
    pub fn take_pending(&self, id: &str) -> Result<HeldHandshake, RegistryError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get(id).map(ClientSession::holds_handshake) {
            None => Err(RegistryError::UnknownClient(id.to_string())),
            Some(false) => Err(RegistryError::InvalidState(id.to_string())),
            Some(true) => match inner.sessions.remove(id).map(|session| session.phase) {
                Some(Phase::Pending(Handshake::Held(held))) => Ok(held),
                _ => Err(RegistryError::InvalidState(id.to_string())),
            },
        }
    }

    /// Take the handshake materials of a pending session for completion
    ///
    /// The session stays registered as pending with an in-flight marker;
    /// the returned token is cancelled if the session is torn down first.
    pub fn begin_upgrade(
        &self,
        id: &str,
    ) -> Result<(HeldHandshake, CancellationToken), RegistryError> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownClient(id.to_string()))?;
        if !session.holds_handshake() {
            return Err(RegistryError::InvalidState(id.to_string()));
        }
        let cancel = CancellationToken::new();
        let previous = std::mem::replace(
            &mut session.phase,
            Phase::Pending(Handshake::InFlight(cancel.clone())),
        );
        match previous {
            Phase::Pending(Handshake::Held(held)) => Ok((held, cancel)),
            other => {
                session.phase = other;
                Err(RegistryError::InvalidState(id.to_string()))
            }
        }
    }

    /// Transition Pending -> Connected
    ///
    /// Only a session whose handshake was taken by [`Self::begin_upgrade`]
    /// can be promoted.
    pub fn promote(&self, id: &str, live: LiveSocket) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(session) if matches!(session.phase, Phase::Pending(Handshake::InFlight(_))) => {
                session.phase = Phase::Connected(live);
                Ok(())
            }
            _ => Err(RegistryError::InvalidState(id.to_string())),
        }
    }

    /// Evict a session regardless of state, tearing down its transport
    ///
    /// Returns `false` if the session was already gone.
    pub fn remove(&self, id: &str) -> bool {
        let session = self.inner.lock().sessions.remove(id);
        match session {
            Some(session) => {
                session.teardown();
                true
            }
            None => false,
        }
    }

    /// Evict a session only while its handshake is still held
    fn remove_held(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let held = inner
                .sessions
                .get(id)
                .is_some_and(ClientSession::holds_handshake);
            if held {
                inner.sessions.remove(id)
            } else {
                None
            }
        };
        removed.is_some()
    }

    /// Run `f` against the live socket if the session is connected and open
    pub fn with_open_socket<R>(&self, id: &str, f: impl FnOnce(&LiveSocket) -> R) -> Option<R> {
        let inner = self.inner.lock();
        inner
            .sessions
            .get(id)
            .and_then(ClientSession::live_socket)
            .filter(|live| live.is_open())
            .map(f)
    }

    /// Remove a session only if it is connected with an open socket
    pub fn remove_open(&self, id: &str) -> Option<ClientSession> {
        let mut inner = self.inner.lock();
        let open = inner
            .sessions
            .get(id)
            .and_then(ClientSession::live_socket)
            .is_some_and(LiveSocket::is_open);
        if open {
            inner.sessions.remove(id)
        } else {
            None
        }
    }

    /// Refuse new sessions and hand back every existing one
    pub fn close(&self) -> Vec<ClientSession> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.sessions.drain().map(|(_, session)| session).collect()
    }
}
