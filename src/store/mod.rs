// src/store/mod.rs
//! Relational store boundary. Persisted state is the source of truth for
//! what has been loaded.

pub mod sqlite;

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;

use crate::model::{ContactId, Scalar};
use crate::transform::Frame;

pub use sqlite::SqliteWarehouse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Contacts,
    Transcripts,
    EnhancedTranscripts,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Contacts => "contacts",
            Table::Transcripts => "transcripts",
            Table::EnhancedTranscripts => "enhanced_transcripts",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional rows; every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBatch {
    pub table: Table,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

impl LoadBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub trait Warehouse: Send + Sync {
    /// Distinct `load_file` values already in `contacts`.
    fn loaded_contact_files(&self) -> Result<BTreeSet<String>>;

    /// Distinct `contact_id` values already in `transcripts`.
    fn loaded_transcript_contacts(&self) -> Result<BTreeSet<ContactId>>;

    /// Contacts with an agent whose transcript has not been downloaded yet.
    fn contacts_missing_transcripts(&self) -> Result<Vec<ContactId>>;

    /// Flag the given contacts as downloaded in a single statement.
    fn mark_transcripts_downloaded(&self, contact_ids: &[ContactId]) -> Result<usize>;

    /// Contacts present in `transcripts` but not in `enhanced_transcripts`.
    fn unenhanced_contacts(&self) -> Result<Vec<ContactId>>;

    /// All transcript rows of one contact, ordered by `(contact_id, dt)`.
    fn transcript_frame(&self, contact_id: ContactId) -> Result<Frame>;

    /// Insert every row of the batch atomically. Returns the number of rows.
    fn load(&self, batch: &LoadBatch) -> Result<usize>;
}
