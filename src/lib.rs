// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! # Overview
//!
//! This is a client-side driver for a distributed transactional database
//! that runs an optimistic concurrency-control protocol. The driver does
//! not execute, store, or replicate anything itself; the server group does
//! all of that. What the driver _does_ own is the client half of the
//! transaction protocol, which is fussier than it looks:
//!
//!   - Each transaction reads and writes against a fixed logical snapshot,
//!     identified by a start timestamp the server assigns on the
//!     transaction's first successful call.
//!
//!   - Every response carries a transaction context: the start timestamp, a
//!     consistency hash, and the accumulated sets of keys and predicates the
//!     transaction has touched (its conflict footprint). The driver must
//!     merge each returned context into its local copy deterministically:
//!     the hash is a freshness token and the latest one wins, while the
//!     footprint only ever grows. Confusing the two policies corrupts
//!     conflict detection at commit time.
//!
//!   - Transactions move through a strict state machine, [TxnState::Ok] to
//!     one of [TxnState::Committed], [TxnState::Aborted] or
//!     [TxnState::Error], and never leave a terminal state. Commit and
//!     discard must be safe to call repeatedly and from teardown paths.
//!
//!   - Calls are spread over a fixed set of backend connections
//!     round-robin, and every transport failure is caught at a single seam
//!     and turned into a typed result. No expected failure crosses the
//!     public API as a panic.
//!
//! The transport itself is deliberately out of scope. Connections are
//! whatever the embedder wants them to be; the driver talks to them through
//! the [Channel] trait, which exposes the five remote operations the
//! protocol needs (`query`, which also carries mutations, plus
//! `commit_or_abort`, `alter`, `check_version` and `login`). The tests in
//! this crate implement [Channel] with a small in-memory server.
//!
//! ## Notes
//!
//!  - A transaction handle is meant to be used sequentially from one task.
//!    The driver does not lock per-transaction state; the state checks
//!    catch some misuse but concurrent calls on one handle are not
//!    supported.
//!
//!  - There is no automatic retry anywhere in this crate. A transport
//!    failure during a mutation triggers exactly one best-effort discard
//!    (itself not retried) and then surfaces the original failure; whether
//!    to run the whole transaction again is the caller's decision.
//!
//!  - Client-side deadlines are imposed at the call seam. A call without a
//!    deadline falls back to the client-level default, and with neither set
//!    the connection's own behavior governs.

use futures::Future;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// A failure of the remote call itself: the network, the framing, or a
/// deadline. These are always recoverable at the call site and are never
/// allowed to escape the driver as panics; the call seam in [Client]
/// converts each one into [Error::Transport].
///
/// Logical, application-level rejections are _not_ transport errors; the
/// server expresses those inside an otherwise-successful response payload.
#[derive(Error, Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("call deadline exceeded")]
    Deadline,
    #[error("protocol violation: {0}")]
    Protocol(String),
}

#[derive(Error, Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Error {
    /// The remote call failed; see [TransportError].
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A query, mutation or commit was attempted on a transaction that has
    /// already reached a terminal state. Carries the offending state.
    #[error("transaction is {0:?}, not Ok")]
    TxnNotOk(TxnState),

    /// The server returned a context whose start timestamp does not belong
    /// to this transaction. This is a protocol-level inconsistency and the
    /// transaction must be treated as unusable afterward.
    #[error("server returned start_ts {remote}, transaction is at {local}")]
    StartTsMismatch { local: u64, remote: u64 },

    /// A mutation or commit was attempted on a read-only transaction.
    #[error("mutation on read-only transaction")]
    ReadOnlyTxn,

    /// An operation was attempted after [Client::close].
    #[error("client has been closed")]
    ClientDisposed,

    /// A mutation was applied remotely but the context it returned could
    /// not be merged, so the transaction's bookkeeping is broken. The
    /// server's response is preserved here for inspection even though the
    /// call as a whole failed.
    #[error("mutation applied but returned context unusable: {cause}")]
    MutatedButUnmerged {
        response: Box<Response>,
        cause: Box<Error>,
    },
}

mod channel;
mod client;
mod context;
mod txn;


// We define a BoxFuture-like wrapper type here and use it at the channel
// seam, for compilation and code footprint reasons: it costs an extra heap
// allocation per async call, but means the library compiles faster, can
// handle recursive futures, and doesn't require compiler pragmas to
// override the maximum allowed type size.
//
// We don't use the standard BoxFuture type because we want our boxed futures
// to also implement Sync, which the standard one doesn't.
pub type SyncBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static + Send + Sync>>;

pub use channel::{Channel, LoginCredentials, Mutation, Operation, Request, Response, Version};
pub use client::Client;
pub use context::TxnContext;
pub use txn::{Txn, TxnState};
