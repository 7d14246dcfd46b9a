// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! The transaction context is the piece of protocol state a transaction
//! carries across its round trips: the start timestamp pinning its logical
//! snapshot, the server's consistency hash, and the growing conflict
//! footprint (keys and predicates touched so far). The server returns a
//! context on every successful call and the driver folds it into the local
//! copy with [TxnContext::merge].
//!
//! The merge discipline matters:
//!
//!   - `start_ts` is write-once. Zero means "not yet assigned"; the first
//!     response assigns it, and any later response carrying a different
//!     value belongs to some other transaction, so the merge fails and the
//!     transaction is poisoned.
//!
//!   - `hash` is a freshness token. The latest response is authoritative
//!     and earlier values are discarded, never accumulated.
//!
//!   - `keys` and `preds` accumulate for the transaction's whole lifetime.
//!     They are what the server checks for write-write conflicts at commit
//!     time, so dropping or replacing them would silently disable conflict
//!     detection. Duplicates are tolerated; the server deduplicates.

use crate::Error;
use serde::{Deserialize, Serialize};

/// Mutable per-transaction protocol state, created empty when the
/// transaction is created and updated only by [TxnContext::merge] (plus one
/// final `aborted` flip just before a discard is sent). It is exclusively
/// owned by its transaction and echoed back to the server on every call.
#[derive(Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnContext {
    /// Logical start timestamp; 0 until the server assigns one.
    pub start_ts: u64,

    /// Opaque consistency token from the most recent response.
    pub hash: String,

    /// Keys touched so far, accumulated across calls.
    pub keys: Vec<String>,

    /// Schema predicates touched so far, accumulated across calls.
    pub preds: Vec<String>,

    /// Set just before the context is sent on a discard, telling the server
    /// to roll the transaction back rather than commit it.
    pub aborted: bool,
}

impl TxnContext {
    /// Folds a server-returned context into this one. Some calls
    /// legitimately return no context at all; that merge is a no-op.
    pub(crate) fn merge(&mut self, remote: Option<&TxnContext>) -> Result<(), Error> {
        let remote = match remote {
            None => return Ok(()),
            Some(r) => r,
        };
        if self.start_ts == 0 {
            self.start_ts = remote.start_ts;
        } else if self.start_ts != remote.start_ts {
            return Err(Error::StartTsMismatch {
                local: self.start_ts,
                remote: remote.start_ts,
            });
        }
        self.hash = remote.hash.clone();
        self.keys.extend_from_slice(&remote.keys);
        self.preds.extend_from_slice(&remote.preds);
        Ok(())
    }
}

#[test]
fn test_merge_assigns_start_ts_once() {
    let mut local = TxnContext::default();
    let remote = TxnContext {
        start_ts: 7,
        ..Default::default()
    };
    assert!(local.merge(Some(&remote)).is_ok());
    assert_eq!(local.start_ts, 7);

    // A context from some other transaction must not be folded in, and the
    // local timestamp must survive the attempt.
    let stranger = TxnContext {
        start_ts: 9,
        hash: "h9".into(),
        ..Default::default()
    };
    match local.merge(Some(&stranger)) {
        Err(Error::StartTsMismatch { local: 7, remote: 9 }) => (),
        other => panic!("unexpected merge result {:?}", other),
    }
    assert_eq!(local.start_ts, 7);
    assert_eq!(local.hash, "");
}

#[test]
fn test_merge_accumulates_footprint_but_not_hash() {
    let mut local = TxnContext::default();
    let first = TxnContext {
        start_ts: 7,
        hash: "h1".into(),
        keys: vec!["a".into()],
        preds: vec!["p".into()],
        aborted: false,
    };
    let second = TxnContext {
        start_ts: 7,
        hash: "h2".into(),
        keys: vec!["b".into()],
        preds: vec!["p".into(), "q".into()],
        aborted: false,
    };
    local.merge(Some(&first)).unwrap();
    assert_eq!(local.hash, "h1");
    local.merge(Some(&second)).unwrap();
    assert_eq!(local.hash, "h2");
    assert_eq!(local.keys, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        local.preds,
        vec!["p".to_string(), "p".to_string(), "q".to_string()]
    );
}

#[test]
fn test_merge_of_absent_context_is_a_noop() {
    let mut local = TxnContext {
        start_ts: 7,
        hash: "h1".into(),
        keys: vec!["a".into()],
        ..Default::default()
    };
    let before = local.clone();
    local.merge(None).unwrap();
    assert_eq!(local, before);
}
