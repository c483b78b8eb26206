//! Core domain types for the tick recorder.
//!
//! This crate provides the types shared by every other crate in the workspace:
//! - `AccountId`, `Account`: one authorized connection context
//! - `SymbolId`, `Symbol`, `SymbolCatalog`: tradable instruments per account
//! - `Tick`, `Side`: one received price update
//! - `RecorderEvent`, `EventBus`: upward notifications to front ends

pub mod account;
pub mod error;
pub mod event;
pub mod symbol;
pub mod tick;

pub use account::{Account, AccountId};
pub use error::{CoreError, Result};
pub use event::{EventBus, RecorderEvent};
pub use symbol::{Symbol, SymbolCatalog, SymbolId};
pub use tick::{Side, Tick, PRICE_SCALE};
