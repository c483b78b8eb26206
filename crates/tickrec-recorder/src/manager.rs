//! Connection manager.
//!
//! Owns the recorded accounts and drives each one through discovery on every
//! connection: app authorization, account id lookup, account authorization,
//! symbol list, spot subscriptions. Inbound messages are applied through the
//! per-account transition table; out-of-phase responses are logged and
//! ignored.

use chrono::Utc;
use std::sync::Arc;
use tickrec_core::{AccountId, EventBus, RecorderEvent, Side, Symbol, Tick};
use tickrec_persistence::{AccountRegistry, TickWriter, WriterConfig};
use tickrec_telemetry::Metrics;
use tickrec_wire::{
    Connection, ConnectionSettings, InboundMessage, LostSignal, OutboundQueue, OutboundRequest,
    SpotUpdate,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accounts::AccountArena;
use crate::error::AppResult;
use crate::state::{AccountEvent, AccountPhase, ConnectionState, Step};

/// Application credentials sent in the app authorization request.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Why `run_session` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The connection failed; reconnect.
    Lost,
    /// Shutdown was requested.
    Stopped,
}

/// Handles bound to the current connection.
struct Session {
    outbound: OutboundQueue,
    shutdown: CancellationToken,
    lost: LostSignal,
    connection: Option<Connection>,
}

pub struct ConnectionManager {
    credentials: ApiCredentials,
    writer_config: WriterConfig,
    accounts: AccountArena,
    registry: Arc<dyn AccountRegistry>,
    events: EventBus,
    state: ConnectionState,
    session: Option<Session>,
    writers: Vec<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        credentials: ApiCredentials,
        writer_config: WriterConfig,
        accounts: AccountArena,
        registry: Arc<dyn AccountRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            credentials,
            writer_config,
            accounts,
            registry,
            events,
            state: ConnectionState::Disconnected,
            session: None,
            writers: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn accounts(&self) -> &AccountArena {
        &self.accounts
    }

    /// Open a fresh connection and start the handshake on it.
    pub async fn open_connection(
        &mut self,
        settings: &ConnectionSettings,
    ) -> AppResult<mpsc::UnboundedReceiver<InboundMessage>> {
        self.events.message("Opening API connection.");
        let (connection, inbound) = Connection::open(settings, self.events.clone()).await?;
        self.attach(connection);
        Ok(inbound)
    }

    /// Take ownership of a started connection and begin the handshake.
    pub fn attach(&mut self, connection: Connection) {
        self.begin_session(
            connection.outbound(),
            connection.shutdown_token(),
            connection.lost_signal(),
        );
        if let Some(session) = self.session.as_mut() {
            session.connection = Some(connection);
        }
    }

    /// Reset every account and queue app authorization on the given handles.
    pub fn begin_session(
        &mut self,
        outbound: OutboundQueue,
        shutdown: CancellationToken,
        lost: LostSignal,
    ) {
        self.accounts.reset_phases();
        self.session = Some(Session {
            outbound,
            shutdown,
            lost,
            connection: None,
        });
        self.state = ConnectionState::AppAuthPending;
        self.enqueue(OutboundRequest::app_auth(
            &self.credentials.client_id,
            &self.credentials.client_secret,
        ));
    }

    /// Apply inbound messages until the connection is lost or `stop` fires.
    pub async fn run_session(
        &mut self,
        inbound: &mut mpsc::UnboundedReceiver<InboundMessage>,
        stop: &CancellationToken,
    ) -> SessionEnd {
        let Some(lost) = self.session.as_ref().map(|s| s.lost.clone()) else {
            return SessionEnd::Lost;
        };

        loop {
            tokio::select! {
                _ = stop.cancelled() => return SessionEnd::Stopped,
                _ = lost.wait() => return SessionEnd::Lost,
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => return SessionEnd::Lost,
                },
            }
        }
    }

    /// Stop the connection workers and the writers started on it.
    pub async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown.cancel();
            if let Some(connection) = session.connection {
                let liveness = connection.liveness().stats();
                info!(
                    messages = liveness.message_count,
                    last_message = %liveness.last_message,
                    idle_ms = liveness.time_since_last_message_ms,
                    "Closing connection"
                );
                connection.close().await;
            }
        }
        for writer in self.writers.drain(..) {
            let _ = writer.await;
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Write out whatever is still buffered. Used on shutdown.
    pub fn flush_buffers(&self) {
        for slot in self.accounts.iter() {
            if slot.buffer.is_empty() {
                continue;
            }
            let writer = TickWriter::new(
                slot.account.account_id,
                slot.account.data_path.clone(),
                Arc::new(slot.account.symbols.clone()),
                slot.buffer.clone(),
                self.events.clone(),
                self.writer_config.clone(),
            );
            loop {
                match writer.write_once() {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        error!(account = %slot.account.account_id, error = %e, "Final flush failed");
                        break;
                    }
                }
            }
        }
    }

    pub fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::AppAuthorized => self.on_app_authorized(),
            InboundMessage::AccountList {
                access_token,
                account_ids,
            } => self.on_account_list(&access_token, &account_ids),
            InboundMessage::AccountAuthorized { account_id } => self.on_account_authorized(account_id),
            InboundMessage::SymbolsList {
                account_id,
                symbols,
            } => self.on_symbols_list(account_id, symbols),
            InboundMessage::SpotsSubscribed { account_id } => {
                debug!(%account_id, "Spot subscription confirmed");
            }
            InboundMessage::Spot(update) => self.on_spot(update),
            InboundMessage::VendorError {
                account_id,
                code,
                description,
            } => {
                warn!(?account_id, %code, ?description, "Error response received");
                self.events.error(format!(
                    "Proto message error {code} {}",
                    description.unwrap_or_default()
                ));
            }
            InboundMessage::CommonError { code, description } => {
                warn!(%code, ?description, "Common error received");
                self.events.error(format!(
                    "Proto message error {code} {}",
                    description.unwrap_or_default()
                ));
            }
            InboundMessage::ClientDisconnect { reason } => {
                let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                warn!(%reason, "Server disconnected client");
                self.events
                    .error(format!("Server closed the session: {reason}"));
                if let Some(session) = &self.session {
                    session.lost.trip();
                }
            }
            InboundMessage::Heartbeat
            | InboundMessage::PingReq { .. }
            | InboundMessage::PingRes { .. } => {},
            InboundMessage::Unhandled { payload_type } => {
                warn!(payload_type, "Unhandled message");
                self.events
                    .error(format!("{payload_type} message not handled."));
            }
        }
    }

    fn on_app_authorized(&mut self) {
        info!("Application authorized");
        self.state = ConnectionState::Authorized;
        self.events.message("App authorised.");

        for index in 0..self.accounts.len() {
            if let Some(step) = self.advance(index, AccountEvent::AppAuthorized) {
                self.execute(index, step);
            }
        }
    }

    fn on_account_list(&mut self, access_token: &str, account_ids: &[AccountId]) {
        let Some(index) = self.accounts.find_by_token(access_token) else {
            warn!("Account list for unknown token");
            self.events
                .error("Received an account list for a token that is not configured.");
            return;
        };
        let Some(&account_id) = account_ids.first() else {
            self.events
                .error("There are no trading accounts associated with this token.");
            return;
        };

        let Some(step) = self.advance(index, AccountEvent::AccountResolved) else {
            return;
        };
        self.accounts.resolve(index, account_id);
        info!(%account_id, "Account resolved");
        self.events.message(format!("Account selected: {account_id}."));
        self.persist(index, "account id");
        self.execute(index, step);
    }

    fn on_account_authorized(&mut self, account_id: AccountId) {
        let Some(index) = self.accounts.find_by_id(account_id) else {
            self.events.error(format!(
                "Could not find account {account_id}. Ticks will not be recorded for this account."
            ));
            return;
        };
        info!(%account_id, "Account authorized");
        if let Some(step) = self.advance(index, AccountEvent::AccountAuthorized) {
            self.execute(index, step);
        }
    }

    fn on_symbols_list(&mut self, account_id: AccountId, symbols: Vec<Symbol>) {
        let Some(index) = self.accounts.find_by_id(account_id) else {
            warn!(%account_id, "Symbol list for unknown account");
            return;
        };
        if symbols.is_empty() {
            self.events.error(format!(
                "No symbols returned for account {account_id}. Ticks will not be recorded for this account."
            ));
            return;
        }
        if self.accounts.get(index).phase != AccountPhase::SymbolsLoading {
            warn!(%account_id, phase = ?self.accounts.get(index).phase, "Ignoring unexpected symbol list");
            return;
        }

        let added = self.accounts.add_symbols(index, symbols);
        info!(%account_id, added, "Symbol list loaded");
        self.persist(index, "symbol list");
        if let Some(step) = self.advance(index, AccountEvent::SymbolsLoaded) {
            self.execute(index, step);
        }
    }

    fn on_spot(&mut self, update: SpotUpdate) {
        let Some(index) = self.accounts.find_by_id(update.account_id) else {
            warn!(account = %update.account_id, "Spot event for unknown account");
            Metrics::ticks_dropped(
                "unknown_account",
                u64::from(update.bid.is_some()) + u64::from(update.ask.is_some()),
            );
            return;
        };

        let time = Utc::now();
        let buffer = self.accounts.get(index).buffer.clone();
        for (side, value) in [(Side::Bid, update.bid), (Side::Ask, update.ask)] {
            let Some(value) = value else { continue };
            buffer.push(Tick::new(update.symbol_id, time, side, value));
            Metrics::tick_received(side.as_str());
            self.events.emit(RecorderEvent::TickObserved {
                symbol_id: update.symbol_id,
                side,
                value,
                time,
            });
        }
    }

    /// Run the transition table for one account. Invalid transitions are
    /// logged and yield `None`.
    fn advance(&mut self, index: usize, event: AccountEvent) -> Option<Step> {
        let slot = self.accounts.get_mut(index);
        match slot.phase.next(event, slot.context()) {
            Ok((phase, step)) => {
                debug!(token = %slot.account.token_hint(), from = ?slot.phase, to = ?phase, "Account phase changed");
                slot.phase = phase;
                Some(step)
            }
            Err(e) => {
                warn!(token = %slot.account.token_hint(), error = %e, "Ignoring out-of-phase response");
                None
            }
        }
    }

    fn execute(&mut self, index: usize, step: Step) {
        let account = &self.accounts.get(index).account;
        let account_id = account.account_id;
        match step {
            Step::RequestAccountList => {
                let request = OutboundRequest::account_list(&account.token);
                self.enqueue(request);
            }
            Step::RequestAccountAuth => {
                let request = OutboundRequest::account_auth(&account.token, account_id);
                self.enqueue(request);
            }
            Step::RequestSymbols => self.enqueue(OutboundRequest::symbols_list(account_id)),
            Step::Subscribe => {
                let requests: Vec<OutboundRequest> = account
                    .symbols
                    .iter()
                    .map(|symbol| OutboundRequest::subscribe_spots(account_id, symbol.id()))
                    .collect();
                info!(%account_id, symbols = requests.len(), "Queueing spot subscriptions");
                for request in requests {
                    self.enqueue(request);
                }
                if let Some(next) = self.advance(index, AccountEvent::SubscriptionsQueued) {
                    self.execute(index, next);
                }
            }
            Step::StartWriter => self.start_writer(index),
        }
    }

    fn start_writer(&mut self, index: usize) {
        let Some(shutdown) = self.session.as_ref().map(|s| s.shutdown.clone()) else {
            warn!("No active session, writer not started");
            return;
        };
        let slot = self.accounts.get(index);
        let writer = TickWriter::new(
            slot.account.account_id,
            slot.account.data_path.clone(),
            Arc::new(slot.account.symbols.clone()),
            slot.buffer.clone(),
            self.events.clone(),
            self.writer_config.clone(),
        );
        info!(account = %slot.account.account_id, "Starting tick writer");
        self.writers.push(tokio::spawn(writer.run(shutdown)));
    }

    fn persist(&self, index: usize, what: &str) {
        let account = &self.accounts.get(index).account;
        if let Err(e) = self.registry.save_account(account) {
            error!(account = %account.account_id, error = %e, "Failed to save account file");
            self.events.error(format!(
                "Could not save account file with updated {what}: {e}"
            ));
        }
    }

    fn enqueue(&self, request: OutboundRequest) {
        let Some(session) = &self.session else {
            warn!(kind = ?request.kind(), "No active session, request dropped");
            return;
        };
        if session.outbound.push(request).is_err() {
            warn!("Outbound queue closed, request dropped");
        }
    }
}
