//! Correlation of command requests with their asynchronous responses.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use gate_protocol::GateAction;

use crate::types::CommandOutcome;

/// A published command awaiting its correlated response.
#[derive(Debug)]
pub struct PendingCommand {
    pub token: String,
    pub action: GateAction,
    pub issued_at: Instant,
    reply: oneshot::Sender<CommandOutcome>,
}

/// Maps correlation tokens to pending commands.
///
/// Tokens are never reused for the lifetime of the registry. Responses are
/// matched by token only, so they may arrive in any order.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: HashMap<String, PendingCommand>,
    next_seq: u64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new pending command and returns its token and outcome receiver.
    pub fn issue(&mut self, action: GateAction) -> (String, oneshot::Receiver<CommandOutcome>) {
        self.next_seq += 1;
        let token = format!("{}-{}", self.next_seq, uuid::Uuid::new_v4().simple());
        let (reply, rx) = oneshot::channel();
        self.pending.insert(
            token.clone(),
            PendingCommand {
                token: token.clone(),
                action,
                issued_at: Instant::now(),
                reply,
            },
        );
        (token, rx)
    }

    /// Resolves a pending command and returns its action.
    ///
    /// Unknown or already resolved tokens return `None`.
    pub fn resolve(&mut self, token: &str, outcome: CommandOutcome) -> Option<GateAction> {
        let pending = self.pending.remove(token)?;
        // The caller may have dropped its ticket.
        let _ = pending.reply.send(outcome);
        Some(pending.action)
    }

    /// Removes a command without resolving it, e.g. after its publish failed.
    pub fn discard(&mut self, token: &str) -> bool {
        self.pending.remove(token).is_some()
    }

    /// Discards every pending command without resolving any.
    pub fn drop_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Removes commands issued more than `ttl` before `now`.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<(String, GateAction)> {
        let expired: Vec<String> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.issued_at) >= ttl)
            .map(|p| p.token.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|token| self.pending.remove(&token))
            .map(|p| (p.token, p.action))
            .collect()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.pending.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
