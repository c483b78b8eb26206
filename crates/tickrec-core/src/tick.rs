//! Tick data: one price update for one symbol and side.

use crate::error::CoreError;
use crate::symbol::SymbolId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vendor spot prices are integers in units of 1/100000.
pub const PRICE_SCALE: f64 = 100_000.0;

/// Quote side. Bid and ask ticks always go to separate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn is_bid(&self) -> bool {
        matches!(self, Side::Bid)
    }

    /// File name suffix (`Bid` / `Ask`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "Bid",
            Side::Ask => "Ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bid" => Ok(Side::Bid),
            "ask" => Ok(Side::Ask),
            _ => Err(CoreError::InvalidSide(s.to_string())),
        }
    }
}

/// A received tick.
///
/// The timestamp is the local UTC receipt time; spot events carry no
/// usable exchange timestamp for this purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub symbol_id: SymbolId,
    pub time: DateTime<Utc>,
    pub side: Side,
    /// Raw scaled integer price as sent by the vendor.
    pub value: u64,
}

impl Tick {
    pub fn new(symbol_id: SymbolId, time: DateTime<Utc>, side: Side, value: u64) -> Self {
        Self {
            symbol_id,
            time,
            side,
            value,
        }
    }

    /// Price converted with `PRICE_SCALE`. Display only; files keep `value`.
    pub fn price(&self) -> f64 {
        self.value as f64 / PRICE_SCALE
    }

    /// Calendar day (UTC) of the tick, `yyyy-MM-dd`.
    pub fn date_string(&self) -> String {
        self.time.format("%Y-%m-%d").to_string()
    }

    /// One output line: `HH:mm:ss.fff,<value>\n`.
    pub fn to_line(&self) -> String {
        format!("{},{}\n", self.time.format("%H:%M:%S%.3f"), self.value)
    }
}
