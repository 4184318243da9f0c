//! Connection state machine.

use shoaldb_protocol::{ParsedEnvelope, Verb};

/// Where a connection is in its lifecycle.
///
/// ```text
/// Ready ──begin_tx──▶ InTx ──commit_tx / rollback_tx──▶ Ready
///   │                  │
///   └──── I/O failure ─┴──▶ Broken        close ──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, no transaction open.
    Ready,
    /// Connected, a transaction is open on the server session.
    InTx,
    /// A transport failure occurred; only closing is possible.
    Broken,
    /// Closed by the caller.
    Closed,
}

impl ConnectionState {
    /// Returns true if requests may be sent.
    pub fn is_usable(self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::InTx)
    }

    /// Returns true if a transaction is open.
    pub fn in_transaction(self) -> bool {
        self == ConnectionState::InTx
    }

    /// Next state after `verb` received `response`.
    pub(crate) fn after(self, verb: Verb, response: &str) -> ConnectionState {
        if !self.is_usable() {
            return self;
        }
        let ok = ParsedEnvelope::parse(response.as_bytes())
            .map(|env| env.is_ok())
            .unwrap_or(false);
        match verb {
            Verb::BeginTx if ok => ConnectionState::InTx,
            // A failed commit still ends the server-side transaction.
            Verb::CommitTx => ConnectionState::Ready,
            Verb::RollbackTx if ok => ConnectionState::Ready,
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK: &str = r#"{"ok":true}"#;
    const CONFLICT: &str = r#"{"ok":false,"error":{"kind":"conflict","message":"lost"}}"#;

    #[test]
    fn transaction_transitions() {
        let state = ConnectionState::Ready.after(Verb::BeginTx, r#"{"ok":true,"tx_id":1}"#);
        assert_eq!(state, ConnectionState::InTx);
        assert!(state.in_transaction());

        assert_eq!(state.after(Verb::Insert, OK), ConnectionState::InTx);
        assert_eq!(state.after(Verb::RollbackTx, OK), ConnectionState::Ready);
        assert_eq!(state.after(Verb::CommitTx, CONFLICT), ConnectionState::Ready);
    }

    #[test]
    fn failed_begin_keeps_state() {
        let err = r#"{"ok":false,"error":{"kind":"validation","message":"nested"}}"#;
        assert_eq!(
            ConnectionState::InTx.after(Verb::BeginTx, err),
            ConnectionState::InTx
        );
        assert_eq!(
            ConnectionState::Ready.after(Verb::BeginTx, err),
            ConnectionState::Ready
        );
    }

    #[test]
    fn terminal_states_stick() {
        assert_eq!(
            ConnectionState::Broken.after(Verb::BeginTx, OK),
            ConnectionState::Broken
        );
        assert!(!ConnectionState::Closed.is_usable());
    }
}
