//! Connection and per-account state machines.

use std::fmt;
use thiserror::Error;

/// Application-level state of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    AppAuthPending,
    Authorized,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::AppAuthPending => "app_auth_pending",
            Self::Authorized => "authorized",
        };
        f.write_str(s)
    }
}

/// Discovery progress of one account on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountPhase {
    #[default]
    Idle,
    AccountResolving,
    AccountAuthPending,
    SymbolsLoading,
    Subscribing,
    Streaming,
}

/// Server response (or local milestone) that moves an account forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEvent {
    AppAuthorized,
    AccountResolved,
    AccountAuthorized,
    SymbolsLoaded,
    SubscriptionsQueued,
}

/// Work to perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RequestAccountList,
    RequestAccountAuth,
    RequestSymbols,
    Subscribe,
    StartWriter,
}

/// Account facts the guards look at.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseContext {
    pub account_resolved: bool,
    pub has_symbols: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{event:?} is not valid in phase {phase:?}")]
    Invalid {
        phase: AccountPhase,
        event: AccountEvent,
    },
}

impl AccountPhase {
    /// Apply `event`, returning the new phase and the step to run.
    pub fn next(
        self,
        event: AccountEvent,
        ctx: PhaseContext,
    ) -> Result<(AccountPhase, Step), TransitionError> {
        use AccountEvent as E;
        use AccountPhase as P;

        let transition = match (self, event) {
            (P::Idle, E::AppAuthorized) if !ctx.account_resolved => {
                (P::AccountResolving, Step::RequestAccountList)
            }
            (P::Idle, E::AppAuthorized) => (P::AccountAuthPending, Step::RequestAccountAuth),
            (P::AccountResolving, E::AccountResolved) => {
                (P::AccountAuthPending, Step::RequestAccountAuth)
            }
            (P::AccountAuthPending, E::AccountAuthorized) if !ctx.has_symbols => {
                (P::SymbolsLoading, Step::RequestSymbols)
            }
            (P::AccountAuthPending, E::AccountAuthorized) => (P::Subscribing, Step::Subscribe),
            (P::SymbolsLoading, E::SymbolsLoaded) if ctx.has_symbols => {
                (P::Subscribing, Step::Subscribe)
            }
            (P::Subscribing, E::SubscriptionsQueued) => (P::Streaming, Step::StartWriter),
            (phase, event) => return Err(TransitionError::Invalid { phase, event }),
        };
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNRESOLVED: PhaseContext = PhaseContext {
        account_resolved: false,
        has_symbols: false,
    };
    const RESOLVED: PhaseContext = PhaseContext {
        account_resolved: true,
        has_symbols: false,
    };
    const CACHED: PhaseContext = PhaseContext {
        account_resolved: true,
        has_symbols: true,
    };

    #[test]
    fn test_full_discovery_path() {
        let (phase, step) = AccountPhase::Idle
            .next(AccountEvent::AppAuthorized, UNRESOLVED)
            .unwrap();
        assert_eq!((phase, step), (AccountPhase::AccountResolving, Step::RequestAccountList));

        let (phase, step) = phase.next(AccountEvent::AccountResolved, RESOLVED).unwrap();
        assert_eq!((phase, step), (AccountPhase::AccountAuthPending, Step::RequestAccountAuth));

        let (phase, step) = phase.next(AccountEvent::AccountAuthorized, RESOLVED).unwrap();
        assert_eq!((phase, step), (AccountPhase::SymbolsLoading, Step::RequestSymbols));

        let (phase, step) = phase.next(AccountEvent::SymbolsLoaded, CACHED).unwrap();
        assert_eq!((phase, step), (AccountPhase::Subscribing, Step::Subscribe));

        let (phase, step) = phase.next(AccountEvent::SubscriptionsQueued, CACHED).unwrap();
        assert_eq!((phase, step), (AccountPhase::Streaming, Step::StartWriter));
    }

    #[test]
    fn test_cached_account_skips_discovery() {
        let (phase, step) = AccountPhase::Idle
            .next(AccountEvent::AppAuthorized, CACHED)
            .unwrap();
        assert_eq!((phase, step), (AccountPhase::AccountAuthPending, Step::RequestAccountAuth));

        let (phase, step) = phase.next(AccountEvent::AccountAuthorized, CACHED).unwrap();
        assert_eq!((phase, step), (AccountPhase::Subscribing, Step::Subscribe));
    }

    #[test]
    fn test_duplicate_response_rejected() {
        let err = AccountPhase::Streaming
            .next(AccountEvent::AccountAuthorized, CACHED)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                phase: AccountPhase::Streaming,
                event: AccountEvent::AccountAuthorized
            }
        );
    }

    #[test]
    fn test_out_of_order_response_rejected() {
        assert!(AccountPhase::Idle
            .next(AccountEvent::SymbolsLoaded, CACHED)
            .is_err());
        assert!(AccountPhase::AccountResolving
            .next(AccountEvent::AccountAuthorized, RESOLVED)
            .is_err());
    }

    #[test]
    fn test_empty_symbol_list_does_not_subscribe() {
        assert!(AccountPhase::SymbolsLoading
            .next(AccountEvent::SymbolsLoaded, RESOLVED)
            .is_err());
    }
}
