//! Write-ahead log: segmented writer, reader, and compactor.

mod compactor;
mod config;
mod reader;
mod writer;

pub use compactor::{CompactInfo, WalCompactor};
pub use config::{SyncMode, WalConfig};
pub use reader::WalReader;
pub use writer::WalWriter;
