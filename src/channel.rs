// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! The shapes that cross the wire, and the [Channel] trait the driver uses
//! to cross it. The driver is transport-agnostic: a [Channel] might be a
//! gRPC stub, a TLS connection with hand-rolled framing, or (as in this
//! crate's tests) an in-memory fake. Channels are shared read-only handles;
//! many transactions use the same channel concurrently and nothing here is
//! mutated after pool construction.
//!
//! There is one request shape for both queries and mutations: a mutation is
//! a request whose `mutations` list is non-empty, possibly with `commit_now`
//! set. The server distinguishes by payload, not by verb. Mutation payloads
//! themselves are opaque blobs to the driver; the only question it ever asks
//! of one is whether it is empty.

use crate::{SyncBoxFuture, TransportError, TxnContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single mutation: an opaque set payload, an opaque delete payload, and
/// a flag asking the server to commit the transaction in the same round
/// trip. The payload encoding is between the embedder and the server.
#[derive(Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mutation {
    pub set: Vec<u8>,
    pub delete: Vec<u8>,
    pub commit_now: bool,
}

impl Mutation {
    pub fn with_set(set: impl Into<Vec<u8>>) -> Self {
        Mutation {
            set: set.into(),
            ..Default::default()
        }
    }

    pub fn with_delete(delete: impl Into<Vec<u8>>) -> Self {
        Mutation {
            delete: delete.into(),
            ..Default::default()
        }
    }

    pub fn commit_now(mut self) -> Self {
        self.commit_now = true;
        self
    }

    /// A mutation carrying no payload at all mutates nothing, and the
    /// driver never sends one.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }
}

/// The one request shape sent through [Channel::query], for plain queries
/// and mutations both. The transaction stamps it with its current
/// `start_ts` and `hash` so the server can serve the right snapshot and
/// check consistency.
#[derive(Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    pub text: String,
    pub vars: BTreeMap<String, String>,
    pub start_ts: u64,
    pub hash: String,
    pub read_only: bool,
    pub best_effort: bool,
    pub mutations: Vec<Mutation>,
    pub commit_now: bool,
}

impl Request {
    /// True when no mutation in the request actually mutates anything.
    pub fn mutates_nothing(&self) -> bool {
        self.mutations.iter().all(Mutation::is_empty)
    }
}

/// What comes back from [Channel::query]: an opaque result payload, any
/// server-assigned identifiers (for mutations), and usually an updated
/// transaction context to merge.
#[derive(Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Response {
    pub payload: Vec<u8>,
    pub uids: BTreeMap<String, String>,
    pub txn: Option<TxnContext>,
}

/// A schema-alteration operation, passed through to the server untouched.
#[derive(Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub schema: String,
    pub drop_attr: String,
    pub drop_all: bool,
}

/// Credentials for [Channel::login], passed through untouched.
#[derive(Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub userid: String,
    pub password: String,
}

/// The server's version tag, as returned by [Channel::check_version].
#[derive(Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(pub String);

/// One backend connection, as the driver sees it. Implementations perform
/// the actual remote procedure calls; the driver only ever reports failures
/// _of_ the call through [TransportError]. Failures _inside_ a successful
/// call (a rejected transaction, a bad query) belong in [Response] payloads
/// and are none of the driver's business.
///
/// Implementations own their default timeout behavior; when the caller
/// supplies an explicit deadline the driver enforces it on top, at the call
/// seam.
pub trait Channel: Send + Sync + 'static {
    /// Runs a query, or a mutation, or both at once. Used for every
    /// in-transaction round trip.
    fn query(&self, req: Request) -> SyncBoxFuture<Result<Response, TransportError>>;

    /// Finalizes a transaction one way or the other: the context's
    /// `aborted` flag selects rollback, otherwise the server attempts to
    /// commit against the accumulated conflict footprint.
    fn commit_or_abort(&self, ctx: TxnContext) -> SyncBoxFuture<Result<(), TransportError>>;

    fn alter(&self, op: Operation) -> SyncBoxFuture<Result<(), TransportError>>;

    fn check_version(&self) -> SyncBoxFuture<Result<Version, TransportError>>;

    fn login(&self, creds: LoginCredentials) -> SyncBoxFuture<Result<(), TransportError>>;
}
