//! Server state management for the pairing server
//!
//! This module owns the waiting pool, the session registry and the presence
//! counter behind a single mutex, and implements every mutation on them:
//! searching, pairing, teardown, relay and the periodic sweep. Events are
//! pushed to clients through the [`Connections`] seam while the lock is held,
//! so a client never observes events out of order with the mutations that
//! produced them.

use crate::config::PairingPolicy;
use crate::connections::{Connections, EventReceiver};
use crate::pool::{SelectionPolicy, WaitingPool};
use crate::presence::PresenceCounter;
use crate::protocol::{ConnectionId, Payload, Preferences, ServerEvent, SessionId};
use crate::sessions::{Session, SessionRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outcome of one janitor sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Waiting entries whose connection had closed
    pub evicted: Vec<ConnectionId>,
    /// Entries removed to restore pool/session exclusivity
    pub healed: usize,
    /// Sessions formed by the sweep itself
    pub force_matched: usize,
    /// New presence count, if it had drifted
    pub presence_corrected: Option<usize>,
}

/// Point-in-time copy of the registries
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Waiting connections, oldest first
    pub waiting: Vec<ConnectionId>,
    pub sessions: Vec<Session>,
    pub online: usize,
}

#[derive(Debug, Default)]
struct Registries {
    pool: WaitingPool,
    sessions: SessionRegistry,
    presence: PresenceCounter,
    /// Preferences from each connection's latest search, reused on requeue
    preferences: HashMap<ConnectionId, Preferences>,
}

impl Registries {
    /// Tear down the session of `id`, notifying the partner. Returns the
    /// partner's id.
    fn leave_session(&mut self, id: ConnectionId, conns: &dyn Connections) -> Option<ConnectionId> {
        let session = self.sessions.remove_by_member(id)?;
        let partner = session.partner_of(id)?;
        conns.send(partner, ServerEvent::PartnerLeft);
        tracing::info!(
            session = %session.session_id,
            connection = %id,
            partner = %partner,
            "session ended"
        );
        Some(partner)
    }

    fn search(
        &mut self,
        id: ConnectionId,
        preferences: Preferences,
        conns: &dyn Connections,
        selection: SelectionPolicy,
    ) {
        if let Some(partner) = self.leave_session(id, conns) {
            tracing::debug!(connection = %id, partner = %partner, "left previous session to search");
        }
        self.pool.dequeue_if_present(id);

        if !conns.is_open(id) {
            tracing::debug!(connection = %id, "ignoring search from closed connection");
            return;
        }
        self.preferences.insert(id, preferences.clone());

        if self.try_pair(id, &preferences, conns, selection).is_some() {
            return;
        }
        if !conns.is_open(id) {
            tracing::debug!(connection = %id, "searcher closed while pairing");
            return;
        }
        self.pool.enqueue(id, preferences);
        conns.send(id, ServerEvent::Waiting);
        tracing::info!(connection = %id, waiting = self.pool.len(), "waiting for partner");
    }

    /// Pair `searcher` with a waiting candidate, if any.
    ///
    /// This is the only place sessions are created; both the interactive
    /// search and the janitor's force-match go through it. A candidate whose
    /// connection closed after selection is evicted and selection is retried;
    /// a searcher that closed leaves the pool and nothing is committed. A
    /// session is never committed with a member known to be gone.
    fn try_pair(
        &mut self,
        searcher: ConnectionId,
        preferences: &Preferences,
        conns: &dyn Connections,
        selection: SelectionPolicy,
    ) -> Option<Session> {
        loop {
            let candidate =
                selection.select(self.pool.candidates(searcher, preferences, |c| conns.is_open(c)))?;

            if !conns.is_open(searcher) {
                self.pool.dequeue_if_present(searcher);
                tracing::debug!(searcher = %searcher, "searcher closed before commit");
                return None;
            }

            // Every path below removes `candidate` from the pool, so the loop
            // terminates.
            self.pool.dequeue_if_present(candidate);
            if !conns.is_open(candidate) {
                tracing::debug!(candidate = %candidate, "candidate closed before commit, retrying");
                continue;
            }
            if self.sessions.contains_member(candidate) {
                tracing::error!(connection = %candidate, "connection was both waiting and paired");
                continue;
            }

            self.pool.dequeue_if_present(searcher);
            let session = self.sessions.create(candidate, searcher);
            conns.send(
                searcher,
                ServerEvent::SessionStarted {
                    session_id: session.session_id,
                    is_initiator: true,
                },
            );
            conns.send(
                candidate,
                ServerEvent::SessionStarted {
                    session_id: session.session_id,
                    is_initiator: false,
                },
            );
            tracing::info!(
                session = %session.session_id,
                initiator = %searcher,
                waiter = %candidate,
                "paired"
            );
            return Some(session);
        }
    }

    fn relay(
        &self,
        sender: ConnectionId,
        session_id: SessionId,
        conns: &dyn Connections,
        make_event: impl FnOnce(ConnectionId) -> ServerEvent,
    ) -> bool {
        match self.sessions.validate(sender, session_id) {
            Some(partner) => {
                conns.send(partner, make_event(sender));
                true
            }
            None => {
                tracing::debug!(
                    connection = %sender,
                    session = %session_id,
                    "dropping relay for a session the sender is not in"
                );
                false
            }
        }
    }

    fn sweep(&mut self, conns: &dyn Connections, policy: &PairingPolicy) -> SweepReport {
        let mut report = SweepReport {
            evicted: self.pool.retain_live(|id| conns.is_open(id)),
            ..SweepReport::default()
        };
        for id in &report.evicted {
            self.preferences.remove(id);
        }

        for id in self.pool.ids() {
            if self.sessions.contains_member(id) {
                tracing::error!(connection = %id, "connection was both waiting and paired");
                self.pool.dequeue_if_present(id);
                report.healed += 1;
            }
        }
        for orphan in self.sessions.repair() {
            conns.send(orphan, ServerEvent::PartnerLeft);
            report.healed += 1;
        }

        if policy.force_match {
            for id in self.pool.ids() {
                // Already taken as someone else's candidate this sweep.
                if !self.pool.contains(id) {
                    continue;
                }
                let preferences = self.preferences.get(&id).cloned().unwrap_or_default();
                if self.try_pair(id, &preferences, conns, policy.selection).is_some() {
                    report.force_matched += 1;
                }
            }
        }

        if let Some(count) = self.presence.reconcile(conns.open_count()) {
            conns.broadcast(ServerEvent::PresenceCount(count));
            report.presence_corrected = Some(count);
        }

        if !report.evicted.is_empty() || report.healed > 0 || report.force_matched > 0 {
            tracing::info!(
                evicted = report.evicted.len(),
                healed = report.healed,
                force_matched = report.force_matched,
                "janitor sweep"
            );
        }
        report
    }
}

/// Clears the `sweeping` flag when a sweep ends, even by panic
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    registries: Mutex<Registries>,
    connections: Arc<dyn Connections>,
    policy: PairingPolicy,
    sweeping: AtomicBool,
}

/// The pairing coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ServerState {
    shared: Arc<Shared>,
}

impl ServerState {
    pub fn new(connections: Arc<dyn Connections>, policy: PairingPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                registries: Mutex::new(Registries::default()),
                connections,
                policy,
                sweeping: AtomicBool::new(false),
            }),
        }
    }

    pub fn policy(&self) -> &PairingPolicy {
        &self.shared.policy
    }

    fn lock(&self) -> MutexGuard<'_, Registries> {
        self.shared
            .registries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn conns(&self) -> &dyn Connections {
        self.shared.connections.as_ref()
    }

    /// Register a new connection, tell it its id and broadcast the new online
    /// count. Returns the id and the connection's outbound event stream.
    pub fn connect(&self) -> (ConnectionId, EventReceiver) {
        let mut registries = self.lock();
        let (id, events) = self.conns().open();
        let count = registries.presence.on_connect();
        self.conns().send(id, ServerEvent::IdAssigned(id));
        self.conns().broadcast(ServerEvent::PresenceCount(count));
        tracing::info!(connection = %id, online = count, "connected");
        (id, events)
    }

    /// A connection closed: unregister it, drop it from the pool, end its
    /// session and broadcast the new online count, as one unit. The partner
    /// is notified but not put back in the pool.
    pub fn disconnect(&self, id: ConnectionId) {
        let mut registries = self.lock();
        // Dropping the sender ends the connection's writer.
        let registered = self.conns().close(id);
        registries.pool.dequeue_if_present(id);
        registries.preferences.remove(&id);
        registries.leave_session(id, self.conns());
        if !registered {
            tracing::debug!(connection = %id, "disconnect of an unregistered connection");
            return;
        }
        let count = registries.presence.on_disconnect();
        self.conns().broadcast(ServerEvent::PresenceCount(count));
        tracing::info!(connection = %id, online = count, "disconnected");
    }

    /// Find a partner for `id`, or enqueue it and reply `waiting`
    pub fn search(&self, id: ConnectionId, preferences: Preferences) {
        let mut registries = self.lock();
        registries.search(id, preferences, self.conns(), self.shared.policy.selection);
    }

    /// End the session of `id`, if any. Returns the former partner.
    pub fn leave_session(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.lock().leave_session(id, self.conns())
    }

    /// Stop whatever `id` is doing: leave its session and stop waiting
    pub fn leave(&self, id: ConnectionId) {
        let mut registries = self.lock();
        registries.pool.dequeue_if_present(id);
        registries.leave_session(id, self.conns());
    }

    /// Leave the current session and search again.
    ///
    /// Runs under a single lock acquisition, so when the ex-partner is put
    /// back in the pool the follow-up search already sees it.
    pub fn next_partner(&self, id: ConnectionId) {
        let conns = self.conns();
        let policy = &self.shared.policy;
        let mut registries = self.lock();
        let preferences = registries.preferences.get(&id).cloned().unwrap_or_default();

        if let Some(partner) = registries.leave_session(id, conns) {
            conns.send(id, ServerEvent::SearchingNewPartner);
            conns.send(partner, ServerEvent::SearchingNewPartner);

            if policy.requeue_partner_on_next && conns.is_open(partner) {
                let partner_preferences = registries
                    .preferences
                    .get(&partner)
                    .cloned()
                    .unwrap_or_default();
                registries.pool.enqueue(partner, partner_preferences);
                conns.send(partner, ServerEvent::Waiting);
            }
        }

        registries.search(id, preferences, conns, policy.selection);
    }

    /// Forward an opaque signaling payload to the sender's partner
    pub fn relay_signal(&self, sender: ConnectionId, session_id: SessionId, signal: Payload) -> bool {
        self.lock()
            .relay(sender, session_id, self.conns(), |from| ServerEvent::Signal { from, signal })
    }

    /// Forward a chat payload to the sender's partner
    pub fn relay_message(&self, sender: ConnectionId, session_id: SessionId, text: Payload) -> bool {
        self.lock()
            .relay(sender, session_id, self.conns(), |from| ServerEvent::Message { from, text })
    }

    /// Reconcile the registries with connection liveness.
    ///
    /// Returns `None` without doing anything if another sweep is running.
    pub fn sweep(&self) -> Option<SweepReport> {
        if self.shared.sweeping.swap(true, Ordering::AcqRel) {
            tracing::debug!("previous sweep still running, skipping");
            return None;
        }
        let _guard = SweepGuard(&self.shared.sweeping);
        Some(self.lock().sweep(self.conns(), &self.shared.policy))
    }

    pub fn session_of(&self, id: ConnectionId) -> Option<Session> {
        self.lock().sessions.session_of(id).cloned()
    }

    pub fn is_waiting(&self, id: ConnectionId) -> bool {
        self.lock().pool.contains(id)
    }

    pub fn online_count(&self) -> usize {
        self.lock().presence.get()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let registries = self.lock();
        StateSnapshot {
            waiting: registries.pool.ids(),
            sessions: registries.sessions.sessions().cloned().collect(),
            online: registries.presence.get(),
        }
    }
}
