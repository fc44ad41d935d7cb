//! Replicated document storage.
//!
//! The sync protocol treats document payloads as opaque bytes; this module
//! is the only place that knows they are Yrs (Y-CRDT) updates. Everything
//! protocol-side goes through [`MergeableDocument`], so the CRDT engine
//! could be swapped without touching the session code.

use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update, WriteTxn};

#[derive(Debug, Error)]
pub enum DocError {
    #[error("malformed document update: {0}")]
    Malformed(String),
}

/// A document whose state converges when peers exchange updates.
///
/// `apply_update` must be commutative and idempotent over the update set:
/// any order of delivery, including duplicates, yields the same content.
pub trait MergeableDocument: Send {
    /// Encode the entire document for a full state transfer.
    fn full_state(&self) -> Vec<u8>;

    /// Merge a remote update (incremental or full state).
    fn apply_update(&mut self, update: &[u8]) -> Result<(), DocError>;

    /// Insert text locally; returns the incremental update to broadcast.
    fn insert(&mut self, index: u32, text: &str) -> Vec<u8>;

    /// Delete a range locally; returns the incremental update to broadcast.
    fn delete(&mut self, index: u32, len: u32) -> Vec<u8>;

    /// Current text content.
    fn contents(&self) -> String;

    /// Whether the document has never held content.
    fn is_empty(&self) -> bool;
}

/// [`MergeableDocument`] backed by a Yrs text document.
pub struct YrsDocument {
    doc: Doc,
}

const TEXT_NAME: &str = "content";

impl YrsDocument {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Run a local edit and encode only what it changed.
    fn edit<F>(&mut self, edit: F) -> Vec<u8>
    where
        F: FnOnce(&mut yrs::TransactionMut),
    {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            edit(&mut txn);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }
}

impl Default for YrsDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeableDocument for YrsDocument {
    fn full_state(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    fn apply_update(&mut self, update: &[u8]) -> Result<(), DocError> {
        let update = Update::decode_v1(update).map_err(|e| DocError::Malformed(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocError::Malformed(e.to_string()))?;
        Ok(())
    }

    fn insert(&mut self, index: u32, text: &str) -> Vec<u8> {
        let text = text.to_string();
        self.edit(move |txn| {
            let content = txn.get_or_insert_text(TEXT_NAME);
            let len = content.len(txn);
            content.insert(txn, index.min(len), &text);
        })
    }

    fn delete(&mut self, index: u32, len: u32) -> Vec<u8> {
        self.edit(move |txn| {
            let content = txn.get_or_insert_text(TEXT_NAME);
            let total = content.len(txn);
            if index < total {
                content.remove_range(txn, index, len.min(total - index));
            }
        })
    }

    fn contents(&self) -> String {
        let txn = self.doc.transact();
        match txn.get_text(TEXT_NAME) {
            Some(text) => text.get_string(&txn),
            None => String::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.contents().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_insert_and_delete() {
        let mut doc = YrsDocument::new();
        doc.insert(0, "hello world");
        doc.delete(5, 6);
        assert_eq!(doc.contents(), "hello");
    }

    #[test]
    fn test_incremental_update_replicates() {
        let mut a = YrsDocument::new();
        let mut b = YrsDocument::new();

        let update = a.insert(0, "shared text");
        b.apply_update(&update).unwrap();
        assert_eq!(b.contents(), "shared text");
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut a = YrsDocument::new();
        let mut b = YrsDocument::new();
        let ua = a.insert(0, "from-a ");
        let ub = b.insert(0, "from-b ");

        // Deliver in opposite orders to two fresh replicas.
        let mut x = YrsDocument::new();
        x.apply_update(&ua).unwrap();
        x.apply_update(&ub).unwrap();

        let mut y = YrsDocument::new();
        y.apply_update(&ub).unwrap();
        y.apply_update(&ua).unwrap();

        assert_eq!(x.contents(), y.contents());
    }

    #[test]
    fn test_duplicate_updates_are_idempotent() {
        let mut a = YrsDocument::new();
        let mut b = YrsDocument::new();

        let update = a.insert(0, "once");
        b.apply_update(&update).unwrap();
        b.apply_update(&update).unwrap();
        assert_eq!(b.contents(), "once");
    }

    #[test]
    fn test_full_state_transfer() {
        let mut a = YrsDocument::new();
        a.insert(0, "document body");
        a.insert(8, " full");

        let mut b = YrsDocument::new();
        b.apply_update(&a.full_state()).unwrap();
        assert_eq!(b.contents(), a.contents());
    }

    #[test]
    fn test_malformed_update_rejected() {
        let mut doc = YrsDocument::new();
        assert!(doc.apply_update(b"definitely not an update").is_err());
        assert!(doc.is_empty());
    }

    #[test]
    fn test_out_of_bounds_edits_clamped() {
        let mut doc = YrsDocument::new();
        doc.insert(100, "abc");
        assert_eq!(doc.contents(), "abc");
        doc.delete(1, 100);
        assert_eq!(doc.contents(), "a");
        doc.delete(50, 1);
        assert_eq!(doc.contents(), "a");
    }
}
