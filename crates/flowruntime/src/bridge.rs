//! Correlation of engine requests with host replies.
//!
//! Every request the isolated engine cannot serve itself (hardware command,
//! device connection, host-bound component message) gets a correlation id and
//! a deadline. Replies may come back in any order; a reply for an id that is
//! unknown or already settled is reported and dropped.

use crate::component::ActivationId;
use flowcore::CorrelationId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Hardware,
    Connect,
    HostMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub activation: ActivationId,
    pub kind: RequestKind,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct CorrelationTable {
    next_id: CorrelationId,
    timeout: Duration,
    pending: HashMap<CorrelationId, PendingRequest>,
}

impl CorrelationTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 1,
            timeout,
            pending: HashMap::new(),
        }
    }

    pub fn register(&mut self, activation: ActivationId, kind: RequestKind, now: Instant) -> CorrelationId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingRequest {
                activation,
                kind,
                deadline: now + self.timeout,
            },
        );
        id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Settle a request. Returns `None` for unknown or already settled ids.
    pub fn take(&mut self, id: CorrelationId) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    /// Accept one part of a multi-part reply, keeping the request open
    pub fn touch(&mut self, id: CorrelationId, now: Instant) -> Option<PendingRequest> {
        let timeout = self.timeout;
        self.pending.get_mut(&id).map(|request| {
            request.deadline = now + timeout;
            *request
        })
    }

    /// Remove and return every request whose deadline has passed, oldest id first
    pub fn expire(&mut self, now: Instant) -> Vec<(CorrelationId, PendingRequest)> {
        let mut expired: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(id, request)| (*id, *request))
            .collect();
        expired.sort_by_key(|(id, _)| *id);

        for (id, _) in &expired {
            self.pending.remove(id);
        }
        expired
    }

    /// Drop requests owned by an activation that has ended
    pub fn forget_activation(&mut self, activation: ActivationId) {
        self.pending
            .retain(|_, request| request.activation != activation);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
