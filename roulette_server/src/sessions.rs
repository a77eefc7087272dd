//! Registry of active two-party sessions

use crate::protocol::{ConnectionId, SessionId};
use std::collections::HashMap;
use std::time::Instant;

/// An established pairing.
///
/// `member_a` was waiting when the pair formed; `member_b` is the searcher
/// that found it and acts as the signaling initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: SessionId,
    pub member_a: ConnectionId,
    pub member_b: ConnectionId,
    pub created_at: Instant,
}

impl Session {
    pub fn has_member(&self, id: ConnectionId) -> bool {
        self.member_a == id || self.member_b == id
    }

    /// The member that is not `id`, if `id` belongs to this session
    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        if self.member_a == id {
            Some(self.member_b)
        } else if self.member_b == id {
            Some(self.member_a)
        } else {
            None
        }
    }
}

/// Sessions keyed by id, plus the member -> session index
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    by_member: HashMap<ConnectionId, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session between `waiter` and `initiator`.
    ///
    /// Callers must have torn down any existing session of either member.
    pub fn create(&mut self, waiter: ConnectionId, initiator: ConnectionId) -> Session {
        debug_assert_ne!(waiter, initiator);
        debug_assert!(!self.by_member.contains_key(&waiter));
        debug_assert!(!self.by_member.contains_key(&initiator));

        let session = Session {
            session_id: SessionId::new(),
            member_a: waiter,
            member_b: initiator,
            created_at: Instant::now(),
        };
        self.by_member.insert(waiter, session.session_id);
        self.by_member.insert(initiator, session.session_id);
        self.sessions.insert(session.session_id, session.clone());
        session
    }

    pub fn session_of(&self, id: ConnectionId) -> Option<&Session> {
        let session_id = self.by_member.get(&id)?;
        self.sessions.get(session_id)
    }

    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.session_of(id)?.partner_of(id)
    }

    pub fn contains_member(&self, id: ConnectionId) -> bool {
        self.by_member.contains_key(&id)
    }

    /// The partner of `sender` if `sender` currently belongs to `session_id`
    pub fn validate(&self, sender: ConnectionId, session_id: SessionId) -> Option<ConnectionId> {
        match self.by_member.get(&sender) {
            Some(current) if *current == session_id => self.sessions.get(current)?.partner_of(sender),
            _ => None,
        }
    }

    /// Remove the session `id` belongs to, unmapping both members
    pub fn remove_by_member(&mut self, id: ConnectionId) -> Option<Session> {
        let session_id = self.by_member.remove(&id)?;
        let session = self.sessions.remove(&session_id)?;
        if let Some(partner) = session.partner_of(id) {
            if self.by_member.get(&partner) == Some(&session_id) {
                self.by_member.remove(&partner);
            }
        }
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Drop index entries and sessions that disagree with each other.
    ///
    /// Returns the members that were left holding a broken session, so the
    /// caller can notify them.
    pub(crate) fn repair(&mut self) -> Vec<ConnectionId> {
        let mut orphaned = Vec::new();

        let dangling: Vec<ConnectionId> = self
            .by_member
            .iter()
            .filter(|(member, session_id)| {
                !self
                    .sessions
                    .get(*session_id)
                    .is_some_and(|session| session.has_member(**member))
            })
            .map(|(member, _)| *member)
            .collect();
        for member in dangling {
            tracing::error!(connection = %member, "member indexed against a missing session");
            self.by_member.remove(&member);
            orphaned.push(member);
        }

        let broken: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| {
                session.member_a == session.member_b
                    || self.by_member.get(&session.member_a) != Some(&session.session_id)
                    || self.by_member.get(&session.member_b) != Some(&session.session_id)
            })
            .map(|session| session.session_id)
            .collect();
        for session_id in broken {
            let Some(session) = self.sessions.remove(&session_id) else {
                continue;
            };
            tracing::error!(session = %session_id, "session with a missing member");
            for member in [session.member_a, session.member_b] {
                if self.by_member.get(&member) == Some(&session_id) {
                    self.by_member.remove(&member);
                    if !orphaned.contains(&member) {
                        orphaned.push(member);
                    }
                }
            }
        }

        orphaned
    }

    #[cfg(test)]
    pub(crate) fn corrupt_unmap(&mut self, id: ConnectionId) {
        self.by_member.remove(&id);
    }
}
