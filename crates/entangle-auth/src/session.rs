//! Pairing session: the issuer/requester protocol engine
//!
//! A session is created in exactly one role:
//!
//! - **Issuer** holds the credential and the TOTP secret. It joins the
//!   rendezvous channel at the hash of its public key and answers every
//!   `challenge` with `accepted` (releasing the credential) or `rejected`.
//! - **Requester** resolves the issuer's identity to the same address, joins
//!   with a throwaway keypair, and challenges every peer it sees with the
//!   passcode supplied through [`PairingSession::verify`].
//!
//! Each session runs as one task that owns all protocol state, so per-peer
//! bookkeeping needs no locking. The task ends on a terminal outcome, on
//! [`PairingSession::close`], or when the handle is dropped; the rendezvous
//! channel and any token tickers are released together at that point.
//!
//! Issuer state per peer:
//!
//! | state | challenge | result |
//! |-------|-----------|--------|
//! | idle | window elapsed | `rejected 408` |
//! | idle | attempts used up | `rejected 403` |
//! | idle | passcode matches | `accepted`, session ends |
//! | idle | mismatch, attempts remain | `rejected 401`, count + 1 |
//! | idle | mismatch, last attempt | `rejected 403`, count + 1 |

use crate::credential::{CredentialSuite, Ed25519Suite};
use crate::events::{EventEmitter, SessionError, SessionEvent};
use crate::identity::{address_for_key, resolve, Directory, Identity};
use crate::ledger::AttemptLedger;
use crate::provisioning::ProvisioningInfo;
use crate::secret::{decode_passcode, encode_passcode, TokenProvider};
use crate::ticker::TokenTicker;
use entangle_core::{
    Credential, Error, MatchRule, Message, PeerAddress, Rejection, RendezvousAddress, Result,
    SessionConfig,
};
use entangle_rendezvous::{
    Channel, Rendezvous, RendezvousError, RendezvousResult, Transport, TransportEvent,
};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMMAND_CAPACITY: usize = 8;

/// Identifier used to tell sessions apart in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the ceremony a session plays
#[derive(Debug, Clone)]
pub enum Role {
    /// Device that wants the credential
    Requester(Identity),
    /// Holder of the credential and the shared secret
    Issuer {
        credential: Credential,
        config: SessionConfig,
    },
}

/// External services a session delegates to
#[derive(Clone)]
pub struct Collaborators {
    pub rendezvous: Arc<dyn Rendezvous>,
    pub directory: Arc<dyn Directory>,
    pub suite: Arc<dyn CredentialSuite>,
}

impl Collaborators {
    /// Collaborators using Ed25519 keypairs
    pub fn new(rendezvous: Arc<dyn Rendezvous>, directory: Arc<dyn Directory>) -> Self {
        Self {
            rendezvous,
            directory,
            suite: Arc::new(Ed25519Suite),
        }
    }

    /// Builder pattern: set credential suite
    pub fn with_suite(mut self, suite: Arc<dyn CredentialSuite>) -> Self {
        self.suite = suite;
        self
    }
}

/// Outcome of checking one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject(Rejection),
}

/// Issuer-side challenge evaluation with per-peer timeout and lockout
#[derive(Debug)]
struct Verifier {
    pin: String,
    timeout: Duration,
    max_attempts: u32,
    rule: MatchRule,
    ledger: AttemptLedger,
}

impl Verifier {
    fn new(config: &SessionConfig) -> Self {
        Self {
            pin: config.pin.clone(),
            timeout: config.timeout(),
            max_attempts: config.max_attempts,
            rule: config.match_rule,
            ledger: AttemptLedger::new(),
        }
    }

    fn contact(&mut self, peer: &PeerAddress, now: Instant) {
        self.ledger.record_contact(peer, now);
    }

    /// Judge an encoded passcode from `peer`. `token` is only called when
    /// the peer is still allowed to guess.
    fn evaluate<F>(
        &mut self,
        peer: &PeerAddress,
        encoded: &str,
        now: Instant,
        token: F,
    ) -> Result<Verdict>
    where
        F: FnOnce() -> Result<String>,
    {
        self.ledger.record_contact(peer, now);

        if self.ledger.is_timed_out(peer, self.timeout, now) {
            return Ok(Verdict::Reject(Rejection::timed_out()));
        }
        if self.ledger.is_locked_out(peer, self.max_attempts) {
            return Ok(Verdict::Reject(Rejection::locked_out()));
        }

        let token = token()?;
        let matched = match decode_passcode(encoded) {
            Ok(guess) => self.rule.matches(&guess, &self.pin, &token),
            Err(e) => {
                debug!("Undecodable passcode from {}: {}", short(peer.as_str()), e);
                false
            }
        };
        if matched {
            return Ok(Verdict::Accept);
        }

        let failures = self.ledger.record_failure(peer, now);
        if failures >= self.max_attempts {
            Ok(Verdict::Reject(Rejection::locked_out()))
        } else {
            Ok(Verdict::Reject(Rejection::unauthorized()))
        }
    }
}

enum Command {
    Verify(String),
    Close,
}

/// Protocol state owned by the session task
enum DriverRole {
    Issuer {
        credential: Credential,
        provider: TokenProvider,
        verifier: Verifier,
    },
    Requester {
        /// Encoded passcode waiting to be sent; cleared after every reply
        pending: Option<String>,
        peers: BTreeSet<PeerAddress>,
    },
}

type Tickers = Arc<Mutex<Option<Vec<TokenTicker>>>>;

struct Driver {
    id: SessionId,
    transport: Arc<dyn Transport>,
    events: EventEmitter,
    tickers: Tickers,
    role: DriverRole,
}

impl Driver {
    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        loop {
            let flow = tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.events.emit(SessionEvent::Error(SessionError::Transport(
                            "rendezvous channel closed".into(),
                        )));
                        ControlFlow::Break(())
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Verify(encoded)) => self.handle_verify(encoded).await,
                    Some(Command::Close) | None => ControlFlow::Break(()),
                },
            };
            if flow.is_break() {
                break;
            }
        }
        // Refuse further verify calls before anyone can observe `Closed`
        commands.close();
        self.teardown().await;
    }

    async fn handle_event(&mut self, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::PeerSeen(peer) => self.on_peer_seen(peer).await,
            TransportEvent::Message { from, message } => self.on_message(from, message).await,
            TransportEvent::Error(e) => {
                warn!("Session {}: transport error: {}", self.id, e);
                self.events
                    .emit(SessionEvent::Error(SessionError::Transport(e)));
                ControlFlow::Continue(())
            }
        }
    }

    async fn on_peer_seen(&mut self, peer: PeerAddress) -> ControlFlow<()> {
        debug!("Session {}: peer {} seen", self.id, short(peer.as_str()));
        match &mut self.role {
            DriverRole::Issuer { verifier, .. } => {
                verifier.contact(&peer, Instant::now());
            }
            DriverRole::Requester { pending, peers } => {
                peers.insert(peer.clone());
                if let Some(passcode) = pending.clone() {
                    let result = send(
                        self.transport.as_ref(),
                        &self.events,
                        &peer,
                        Message::Challenge { passcode },
                    )
                    .await;
                    if let Err(RendezvousError::PeerNotFound(_)) = result {
                        peers.remove(&peer);
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_message(&mut self, from: PeerAddress, message: Message) -> ControlFlow<()> {
        match (&mut self.role, message) {
            (
                DriverRole::Issuer {
                    credential,
                    provider,
                    verifier,
                },
                Message::Challenge { passcode },
            ) => {
                let verdict = verifier.evaluate(&from, &passcode, Instant::now(), || {
                    provider.current()
                });
                match verdict {
                    Ok(Verdict::Accept) => {
                        info!(
                            "Session {}: challenge from {} accepted",
                            self.id,
                            short(from.as_str())
                        );
                        let reply = Message::Accepted {
                            credential: credential.clone(),
                        };
                        let result = send(self.transport.as_ref(), &self.events, &from, reply).await;
                        if result.is_ok() {
                            self.events.emit(SessionEvent::Accepted { peer: from });
                            return ControlFlow::Break(());
                        }
                    }
                    Ok(Verdict::Reject(rejection)) => {
                        info!(
                            "Session {}: challenge from {} rejected ({})",
                            self.id,
                            short(from.as_str()),
                            rejection
                        );
                        let reply = Message::Rejected {
                            rejection: rejection.clone(),
                        };
                        let _ = send(self.transport.as_ref(), &self.events, &from, reply).await;
                        self.events
                            .emit(SessionEvent::Rejected { peer: from, rejection });
                    }
                    Err(e) => {
                        warn!("Session {}: could not evaluate challenge: {}", self.id, e);
                        self.events
                            .emit(SessionEvent::Error(SessionError::Protocol(e.to_string())));
                    }
                }
                ControlFlow::Continue(())
            }
            (DriverRole::Requester { pending, .. }, Message::Accepted { credential }) => {
                *pending = None;
                info!("Session {}: authorized by {}", self.id, short(from.as_str()));
                self.events.emit(SessionEvent::Authorized(credential));
                ControlFlow::Break(())
            }
            (DriverRole::Requester { pending, .. }, Message::Rejected { rejection }) => {
                *pending = None;
                let terminal = rejection.is_terminal();
                warn!("Session {}: passcode rejected ({})", self.id, rejection);
                self.events
                    .emit(SessionEvent::Error(SessionError::Rejected(rejection)));
                if terminal {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
            (_, message) => {
                debug!(
                    "Session {}: ignoring {} from {}",
                    self.id,
                    message.name(),
                    short(from.as_str())
                );
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle_verify(&mut self, encoded: String) -> ControlFlow<()> {
        if let DriverRole::Requester { pending, peers } = &mut self.role {
            *pending = Some(encoded.clone());
            let mut departed = Vec::new();
            for peer in peers.iter() {
                let result = send(
                    self.transport.as_ref(),
                    &self.events,
                    peer,
                    Message::Challenge {
                        passcode: encoded.clone(),
                    },
                )
                .await;
                if let Err(RendezvousError::PeerNotFound(_)) = result {
                    departed.push(peer.clone());
                }
            }
            for peer in departed {
                debug!("Session {}: forgetting departed peer {}", self.id, short(peer.as_str()));
                peers.remove(&peer);
            }
        }
        ControlFlow::Continue(())
    }

    async fn teardown(self) {
        let tickers = self
            .tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(tickers);
        self.transport.destroy().await;
        info!("Session {}: closed", self.id);
        self.events.emit(SessionEvent::Closed);
    }
}

/// Send a message, reporting failures as `error` events
async fn send(
    transport: &dyn Transport,
    events: &EventEmitter,
    peer: &PeerAddress,
    message: Message,
) -> RendezvousResult<()> {
    let result = transport.rpc(peer, message).await;
    if let Err(e) = &result {
        warn!("Failed to reach {}: {}", short(peer.as_str()), e);
        events.emit(SessionEvent::Error(SessionError::Transport(e.to_string())));
    }
    result
}

/// Role-specific data readable through the handle
enum RoleView {
    Issuer {
        provisioning: ProvisioningInfo,
        provider: TokenProvider,
    },
    Requester {
        identity: Identity,
    },
}

/// Handle onto a running pairing session
pub struct PairingSession {
    id: SessionId,
    address: RendezvousAddress,
    local_peer: PeerAddress,
    events: EventEmitter,
    commands: mpsc::Sender<Command>,
    view: RoleView,
    tickers: Tickers,
    driver: JoinHandle<()>,
}

impl PairingSession {
    /// Start a session in `role`, joining its rendezvous channel
    pub async fn start(role: Role, collaborators: &Collaborators) -> Result<Self> {
        Self::start_with_events(role, collaborators, EventEmitter::new()).await
    }

    /// Start a session that reports through a caller-supplied emitter, so
    /// listeners can be attached before anything happens
    pub async fn start_with_events(
        role: Role,
        collaborators: &Collaborators,
        events: EventEmitter,
    ) -> Result<Self> {
        match role {
            Role::Issuer { credential, config } => {
                Self::start_issuer(credential, config, collaborators, events).await
            }
            Role::Requester(identity) => {
                Self::start_requester(identity, collaborators, events).await
            }
        }
    }

    async fn start_issuer(
        credential: Credential,
        config: SessionConfig,
        collaborators: &Collaborators,
        events: EventEmitter,
    ) -> Result<Self> {
        config.validate()?;

        let address = config
            .address
            .clone()
            .map(RendezvousAddress::new)
            .unwrap_or_else(|| address_for_key(credential.public_key()));
        let provisioning = ProvisioningInfo::build(address.clone(), &config);
        let provider = TokenProvider::new(
            &provisioning.secret,
            config.period,
            config.digits,
            config.algorithm,
        )?;

        let channel = collaborators.rendezvous.join(&address, &credential).await?;

        let id = SessionId::new();
        info!("Session {}: issuing on {}", id, short(address.as_str()));

        let role = DriverRole::Issuer {
            credential,
            provider: provider.clone(),
            verifier: Verifier::new(&config),
        };
        let view = RoleView::Issuer {
            provisioning,
            provider,
        };
        Ok(Self::spawn(id, address, channel, role, view, events))
    }

    async fn start_requester(
        identity: Identity,
        collaborators: &Collaborators,
        events: EventEmitter,
    ) -> Result<Self> {
        let address = resolve(&identity, collaborators.directory.as_ref()).await?;
        // Only authenticates the channel; never the credential being obtained
        let ephemeral = collaborators.suite.generate_keypair()?;

        let channel = collaborators.rendezvous.join(&address, &ephemeral).await?;

        let id = SessionId::new();
        info!(
            "Session {}: requesting from {} on {}",
            id,
            identity,
            short(address.as_str())
        );

        let role = DriverRole::Requester {
            pending: None,
            peers: BTreeSet::new(),
        };
        let view = RoleView::Requester { identity };
        Ok(Self::spawn(id, address, channel, role, view, events))
    }

    fn spawn(
        id: SessionId,
        address: RendezvousAddress,
        channel: Channel,
        role: DriverRole,
        view: RoleView,
        events: EventEmitter,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let tickers: Tickers = Arc::new(Mutex::new(Some(Vec::new())));
        let local_peer = channel.transport.local_peer().clone();

        let driver = Driver {
            id,
            transport: channel.transport,
            events: events.clone(),
            tickers: tickers.clone(),
            role,
        };
        let driver = tokio::spawn(driver.run(channel.events, commands_rx));

        Self {
            id,
            address,
            local_peer,
            events,
            commands,
            view,
            tickers,
            driver,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Rendezvous address this session joined
    pub fn address(&self) -> &RendezvousAddress {
        &self.address
    }

    /// This session's own address on the rendezvous channel
    pub fn local_peer(&self) -> &PeerAddress {
        &self.local_peer
    }

    pub fn role_name(&self) -> &'static str {
        match self.view {
            RoleView::Issuer { .. } => "issuer",
            RoleView::Requester { .. } => "requester",
        }
    }

    /// Identity the requester resolved, if this is a requester
    pub fn identity(&self) -> Option<&Identity> {
        match &self.view {
            RoleView::Requester { identity } => Some(identity),
            RoleView::Issuer { .. } => None,
        }
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Stream of this session's events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether the session has reached a terminal state or been closed
    pub fn is_closed(&self) -> bool {
        self.driver.is_finished()
    }

    /// Submit `pin + token` as typed by the user (requester only).
    ///
    /// The passcode is sent to every issuer already seen and to any seen
    /// later, until a reply arrives. After a 401 call again with a new
    /// passcode; after a 403/408 or success the session is closed and this
    /// returns [`Error::SessionClosed`].
    pub async fn verify(&self, passcode: &str) -> Result<()> {
        if let RoleView::Issuer { .. } = self.view {
            return Err(Error::WrongRole("issuer"));
        }
        self.commands
            .send(Command::Verify(encode_passcode(passcode)))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Enrollment descriptor (issuer only)
    pub fn provisioning_info(&self) -> Option<&ProvisioningInfo> {
        match &self.view {
            RoleView::Issuer { provisioning, .. } => Some(provisioning),
            RoleView::Requester { .. } => None,
        }
    }

    /// Token valid right now (issuer only)
    pub fn current_token(&self) -> Result<String> {
        match &self.view {
            RoleView::Issuer { provider, .. } => provider.current(),
            RoleView::Requester { .. } => Err(Error::WrongRole("requester")),
        }
    }

    /// Call `callback` with each new token as periods roll over (issuer only).
    /// Stops when the session closes.
    pub fn tokens<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(String) + Send + 'static,
    {
        let RoleView::Issuer { provider, .. } = &self.view else {
            return Err(Error::WrongRole("requester"));
        };
        let mut tickers = self.tickers.lock().unwrap_or_else(PoisonError::into_inner);
        match tickers.as_mut() {
            Some(tickers) => {
                tickers.push(TokenTicker::spawn(provider.clone(), callback));
                Ok(())
            }
            None => Err(Error::SessionClosed),
        }
    }

    /// Leave the rendezvous channel and stop all tickers
    pub async fn close(self) {
        // The driver may already be gone after a terminal outcome
        let _ = self.commands.send(Command::Close).await;
        if let Err(e) = self.driver.await {
            warn!("Session {}: task ended abnormally: {}", self.id, e);
        }
    }
}

fn short(s: &str) -> &str {
    s.get(..12).unwrap_or(s)
}
