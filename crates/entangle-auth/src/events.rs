//! Per-session lifecycle events
//!
//! Every pairing session owns its own [`EventEmitter`]; nothing is shared
//! between sessions. Listeners can be registered as callbacks (`on`/`once`) or
//! consumed as a broadcast stream (`subscribe`).

use entangle_core::{Credential, PeerAddress, Rejection};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

const EVENT_CAPACITY: usize = 32;

/// Errors reported to the caller through the `error` event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Rejected by issuer: {0}")]
    Rejected(Rejection),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// The rejection carried by this error, if any
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            SessionError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Lifecycle events emitted by a pairing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Requester received the credential
    Authorized(Credential),
    /// Issuer released the credential to `peer`
    Accepted { peer: PeerAddress },
    /// Issuer refused a challenge from `peer`
    Rejected { peer: PeerAddress, rejection: Rejection },
    /// Something went wrong; the session may or may not continue
    Error(SessionError),
    /// The session has been torn down
    Closed,
}

/// Discriminant used to register listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Authorized,
    Accepted,
    Rejected,
    Error,
    Closed,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Authorized(_) => EventKind::Authorized,
            SessionEvent::Accepted { .. } => EventKind::Accepted,
            SessionEvent::Rejected { .. } => EventKind::Rejected,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::Closed => EventKind::Closed,
        }
    }
}

type Handler = Arc<Mutex<dyn FnMut(&SessionEvent) + Send>>;

struct Listener {
    kind: EventKind,
    once: bool,
    handler: Handler,
}

/// Event fan-out owned by one session.
///
/// Handlers run synchronously inside `emit`, outside the listener lock, so a
/// handler may register further listeners. A handler must not emit an event
/// of its own kind. A panicking handler is reported and does not affect the
/// other listeners.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<Mutex<Vec<Listener>>>,
    tx: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            tx,
        }
    }

    /// Call `handler` for every event of `kind`
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.add(kind, false, Arc::new(Mutex::new(handler)));
    }

    /// Call `handler` for the next event of `kind` only
    pub fn once<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.add(kind, true, Arc::new(Mutex::new(handler)));
    }

    fn add(&self, kind: EventKind, once: bool, handler: Handler) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                kind,
                once,
                handler,
            });
    }

    /// Stream of all events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let mut listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let handlers = listeners
                .iter()
                .filter(|listener| listener.kind == kind)
                .map(|listener| listener.handler.clone())
                .collect();
            listeners.retain(|listener| !(listener.once && listener.kind == kind));
            handlers
        };

        for handler in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut handler = handler.lock().unwrap_or_else(PoisonError::into_inner);
                (&mut *handler)(&event)
            }));
            if outcome.is_err() {
                warn!("Listener for {:?} events panicked", kind);
                let _ = self.tx.send(SessionEvent::Error(SessionError::Protocol(format!(
                    "listener for {:?} events panicked",
                    kind
                ))));
            }
        }

        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
