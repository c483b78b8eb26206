//! Account slots for the connection manager.

use std::collections::HashMap;
use std::sync::Arc;
use tickrec_core::{Account, AccountId, Symbol};
use tickrec_persistence::TickBuffer;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::state::{AccountPhase, PhaseContext};

/// One recorded account with its per-connection phase and tick buffer.
#[derive(Debug)]
pub struct AccountSlot {
    pub account: Account,
    pub phase: AccountPhase,
    /// Survives reconnects so queued ticks are not lost.
    pub buffer: Arc<TickBuffer>,
}

impl AccountSlot {
    pub fn context(&self) -> PhaseContext {
        PhaseContext {
            account_resolved: self.account.account_id.is_resolved(),
            has_symbols: !self.account.symbols.is_empty(),
        }
    }
}

/// Accounts indexed by access token and by resolved id.
#[derive(Debug, Default)]
pub struct AccountArena {
    slots: Vec<AccountSlot>,
    by_token: HashMap<String, usize>,
    by_id: HashMap<AccountId, usize>,
}

impl AccountArena {
    pub fn new(accounts: Vec<Account>) -> AppResult<Self> {
        let mut arena = Self::default();
        for account in accounts {
            let index = arena.slots.len();
            if arena.by_token.insert(account.token.clone(), index).is_some() {
                return Err(AppError::Config(format!(
                    "Token {} configured for more than one account",
                    account.token_hint()
                )));
            }
            if account.account_id.is_resolved() {
                arena.by_id.insert(account.account_id, index);
            }
            arena.slots.push(AccountSlot {
                account,
                phase: AccountPhase::Idle,
                buffer: Arc::new(TickBuffer::new()),
            });
        }
        Ok(arena)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> &AccountSlot {
        &self.slots[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut AccountSlot {
        &mut self.slots[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountSlot> {
        self.slots.iter()
    }

    pub fn find_by_token(&self, token: &str) -> Option<usize> {
        self.by_token.get(token).copied()
    }

    pub fn find_by_id(&self, account_id: AccountId) -> Option<usize> {
        self.by_id.get(&account_id).copied()
    }

    /// Store a discovered account id and index it.
    pub fn resolve(&mut self, index: usize, account_id: AccountId) {
        let previous = self.slots[index].account.account_id;
        if previous.is_resolved() {
            self.by_id.remove(&previous);
        }
        if let Some(other) = self.by_id.insert(account_id, index) {
            if other != index {
                warn!(%account_id, "Account id already belonged to another token");
            }
        }
        self.slots[index].account.account_id = account_id;
    }

    /// Merge symbols into the catalog. Returns how many were new.
    pub fn add_symbols(&mut self, index: usize, symbols: Vec<Symbol>) -> usize {
        let catalog = &mut self.slots[index].account.symbols;
        symbols
            .into_iter()
            .filter(|symbol| catalog.insert(symbol.clone()))
            .count()
    }

    /// Return every account to `Idle` for a fresh connection.
    pub fn reset_phases(&mut self) {
        for slot in &mut self.slots {
            slot.phase = AccountPhase::Idle;
        }
    }
}
