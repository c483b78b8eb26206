//! Account identification and per-account state.
//!
//! An account is one authorized context on the vendor API: a user token plus
//! the numeric trading account id the token resolves to. Each account owns the
//! catalog of symbols it records and the root directory its tick files go to.

use crate::error::CoreError;
use crate::symbol::SymbolCatalog;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Vendor-assigned trading account id.
///
/// Zero is reserved for "not resolved yet"; a token with an unresolved id
/// has to go through the account-list lookup before it can be authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Placeholder for an account whose id has not been looked up.
    pub const UNRESOLVED: Self = Self(0);

    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_resolved(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| CoreError::InvalidAccountId(format!("{s}: {e}")))
    }
}

/// One recorded account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Access token the account was authorized with.
    pub token: String,
    /// Refresh token, kept so it survives a rewrite of the account file.
    pub refresh_token: String,
    /// Resolved trading account id (`AccountId::UNRESOLVED` until discovery).
    pub account_id: AccountId,
    /// Root directory for this account's tick files.
    pub data_path: PathBuf,
    /// Symbols recorded for this account.
    pub symbols: SymbolCatalog,
}

impl Account {
    pub fn new(
        token: impl Into<String>,
        refresh_token: impl Into<String>,
        data_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            token: token.into(),
            refresh_token: refresh_token.into(),
            account_id: AccountId::UNRESOLVED,
            data_path: data_path.into(),
            symbols: SymbolCatalog::new(),
        }
    }

    /// Builder-style setter for a previously resolved id.
    pub fn with_account_id(mut self, account_id: AccountId) -> Self {
        self.account_id = account_id;
        self
    }

    /// Builder-style setter for a cached symbol catalog.
    pub fn with_symbols(mut self, symbols: SymbolCatalog) -> Self {
        self.symbols = symbols;
        self
    }

    /// Token shortened for log output.
    pub fn token_hint(&self) -> String {
        let prefix: String = self.token.chars().take(6).collect();
        format!("{prefix}...")
    }
}
