//! Write-ahead journal core for a user-space, NVMe-oF-style storage array:
//! an in-memory ring of log groups, asynchronous flushing, checkpoint
//! coordination, and a multi-phase crash replay engine.
//!
//! The journal stores metadata intent only — it never rewrites host data.
//! Durability here means the metadata needed to reconstruct state after a
//! crash is on persistent media, not that a data block itself is durable.
//!
//! Everything the journal needs from the rest of the array (the block
//! allocator, the write-buffer, map persistence) is consumed through the
//! narrow collaborator traits in [`journal_vfs`], never called into
//! directly.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod journal;
pub mod log_buffer;
pub mod log_writer;
pub mod record;
pub mod releaser;
pub mod replay;

pub use checkpoint::{CheckpointManager, CheckpointState};
pub use config::{CheckpointPolicy, ConfigError, JournalConfig, JournalConfigBuilder};
pub use error::{JournalError, JournalResult};
pub use journal::{read_log_groups, recover, Journal};
pub use log_buffer::{GroupId, LogBuffer, LogGroupState, ReserveError, Reservation, RollOutcome};
pub use log_writer::LogWriter;
pub use record::{LogGroupFooter, LogRecord, LogRecordHeader, LogRecordPayload, RecordType};
pub use releaser::{LogGroupReleaser, ReleaserEvent, ReleaserInstruction};
pub use replay::{PendingStripe, ReplayEngine, ReplayOutcome, TornGroup};
