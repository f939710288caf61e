//! Durability layer for Polystore.
//!
//! Two building blocks shared by every engine:
//!
//! - [`Wal`]: append-only op journal, fsynced per record, replayed on
//!   startup and rotated once the snapshot is the new baseline.
//! - [`SnapshotStore`]: atomic full-state checkpoints published by rename.
//!
//! The crash-recovery contract: for every in-memory entry, either the
//! `latest` snapshot or a replayable WAL record reconstructs it.

pub mod snapshot;
pub mod wal;

pub use snapshot::SnapshotStore;
pub use wal::Wal;
