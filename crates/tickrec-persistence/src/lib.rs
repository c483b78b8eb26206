//! Tick persistence for the recorder.
//!
//! Ticks are buffered per account and appended by a writer task to CSV day
//! files, one per symbol, side and UTC date:
//! `<data_path>/Tick/<symbol>/<yyyy-MM-dd>_<Bid|Ask>.csv`.
//! Account files are read and rewritten through `AccountRegistry`.

pub mod buffer;
pub mod error;
pub mod registry;
pub mod writer;

pub use buffer::TickBuffer;
pub use error::{PersistenceError, PersistenceResult};
pub use registry::{
    format_account, parse_account, parse_key_values, AccountRegistry, FileAccountRegistry,
    MemoryAccountRegistry,
};
pub use writer::{tick_file_path, TickWriter, WriterConfig};
