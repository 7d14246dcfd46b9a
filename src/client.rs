// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Main object that clients instantiate. A [Client] owns a fixed, ordered
//! pool of backend connections (anything implementing [Channel]) and is the
//! factory for transactions. It is cheap to clone and the normal case is
//! many transactions sharing one client concurrently.
//!
//! Every remote call in the crate funnels through [Client::call]: the one
//! seam where a connection is selected round-robin, the per-call deadline
//! is imposed, and a transport failure becomes a typed [Error] instead of
//! anything resembling an exception. The administrative operations (alter,
//! check_version, login) are one-shot calls through the same seam with no
//! transaction context and no retry.

use crate::{
    channel::{LoginCredentials, Operation, Version},
    Channel, Error, SyncBoxFuture, TransportError, Txn,
};
use async_std::{future, sync::Arc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, debug_span, trace, Instrument};

pub struct Client<C: Channel> {
    /// The connection pool, immutable after construction.
    pub(crate) channels: Arc<Vec<C>>,

    /// Round-robin cursor over `channels`. Shared by every clone of the
    /// client; advanced relaxed, since occasional repeats or skips under
    /// races are acceptable. The modulo below keeps selection in range no
    /// matter what.
    pub(crate) cursor: Arc<AtomicUsize>,

    /// Monotonic disposed flag; once set, every call fails with
    /// [Error::ClientDisposed].
    pub(crate) closed: Arc<AtomicBool>,

    /// Deadline applied to calls that don't carry their own.
    pub(crate) default_deadline: Option<Duration>,
}

impl<C: Channel> Clone for Client<C> {
    fn clone(&self) -> Self {
        Client {
            channels: self.channels.clone(),
            cursor: self.cursor.clone(),
            closed: self.closed.clone(),
            default_deadline: self.default_deadline,
        }
    }
}

impl<C: Channel> Client<C> {
    /// Construct a new Client over a set of backend connections. Panics if
    /// the set is empty, which is a programmer error rather than a runtime
    /// condition.
    pub fn new(channels: Vec<C>) -> Self {
        Self::new_with_deadline(channels, None)
    }

    /// As [Client::new], with a default deadline for calls that don't
    /// supply one.
    pub fn new_with_deadline(channels: Vec<C>, default_deadline: Option<Duration>) -> Self {
        assert!(
            !channels.is_empty(),
            "client requires at least one backend connection"
        );
        Client {
            channels: Arc::new(channels),
            cursor: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            default_deadline,
        }
    }

    /// Marks the client disposed. Idempotent; tearing down the underlying
    /// connections is the embedder's job, so this only stops the driver
    /// from issuing further calls on them.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// New read-write transaction.
    pub fn new_txn(&self) -> Txn<C> {
        Txn::new(self.clone(), false, false)
    }

    /// New read-only transaction. `best_effort` lets the server skip a full
    /// consensus read for lower latency; it is passed through on every
    /// query the transaction makes.
    pub fn new_read_only_txn(&self, best_effort: bool) -> Txn<C> {
        Txn::new(self.clone(), true, best_effort)
    }

    /// The single seam through which every remote call passes. Picks the
    /// next connection round-robin, imposes the deadline (explicit, else
    /// the client default, else none) and converts any transport failure
    /// into a typed [Error]. Application-level failures don't pass through
    /// here; they ride inside successful responses.
    pub(crate) async fn call<T, F>(&self, deadline: Option<Duration>, op: F) -> Result<T, Error>
    where
        F: FnOnce(&C) -> SyncBoxFuture<Result<T, TransportError>>,
    {
        if self.is_closed() {
            return Err(Error::ClientDisposed);
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed) % self.channels.len();
        trace!("dispatching call on connection #{}", n);
        let fut = op(&self.channels[n]);
        let span = debug_span!("call", conn = n);
        let res = match deadline.or(self.default_deadline) {
            None => fut.instrument(span).await,
            Some(d) => match future::timeout(d, fut.instrument(span)).await {
                Ok(res) => res,
                Err(_) => Err(TransportError::Deadline),
            },
        };
        match res {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!("remote call on connection #{} failed: {}", n, e);
                Err(Error::Transport(e))
            }
        }
    }

    /// Applies a schema alteration. One-shot; no transaction context, no
    /// retry.
    pub async fn alter(&self, op: Operation, deadline: Option<Duration>) -> Result<(), Error> {
        self.call(deadline, move |c| c.alter(op)).await
    }

    /// Asks the server group for its version tag.
    pub async fn check_version(&self, deadline: Option<Duration>) -> Result<Version, Error> {
        self.call(deadline, |c| c.check_version()).await
    }

    /// Authenticates against the server group. Credentials are passed
    /// through untouched.
    pub async fn login(
        &self,
        creds: LoginCredentials,
        deadline: Option<Duration>,
    ) -> Result<(), Error> {
        self.call(deadline, move |c| c.login(creds)).await
    }
}
