// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Transactions. One shape serves the read-write, read-only and best-effort
//! variants: the capability flags are fixed at construction and gate which
//! operations are callable, while the merge and state machinery is shared.
//!
//! The state machine is `Ok` to exactly one of `Committed`, `Aborted` or
//! `Error`, and it never leaves a terminal state:
//!
//!   - `Committed` via [Txn::commit], or via a mutation sent with
//!     `commit_now`.
//!
//!   - `Aborted` via [Txn::discard], a clean deliberate rollback.
//!
//!   - `Error` only when a mutation's remote call itself fails. The driver
//!     fires one best-effort discard (whose outcome is ignored, and which
//!     briefly marks the transaction `Aborted` on the way through) and then
//!     forces `Error`, so the caller can distinguish "I rolled back" from
//!     "the write may or may not have landed".
//!
//! A read failure is not fatal: a query whose remote call fails leaves the
//! transaction in `Ok` and the caller decides whether to continue or
//! discard. This asymmetry is deliberate; a failed read has observed
//! nothing, while a failed mutation leaves the server in an unknown state.

use crate::{
    channel::{Mutation, Request, Response},
    Channel, Client, Error, TxnContext,
};
use async_std::task;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::mem;
use std::time::Duration;
use tracing::{debug, trace};

/// Where a transaction is in its lifecycle. `Ok` is the only state that
/// accepts work; the other three are terminal.
#[derive(
    Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum TxnState {
    Ok,
    Committed,
    Aborted,
    Error,
}

/// A transaction handle. Obtained from [Client::new_txn] or
/// [Client::new_read_only_txn]; meant to be driven sequentially from one
/// task. Dropping a handle that still holds unresolved mutations schedules
/// a best-effort discard in the background; callers who need the rollback
/// acknowledged should await [Txn::discard] instead.
pub struct Txn<C: Channel> {
    pub(crate) client: Client<C>,
    pub(crate) ctx: TxnContext,
    pub(crate) state: TxnState,
    pub(crate) read_only: bool,
    pub(crate) best_effort: bool,
    pub(crate) mutated: bool,
}

impl<C: Channel> Txn<C> {
    pub(crate) fn new(client: Client<C>, read_only: bool, best_effort: bool) -> Self {
        Txn {
            client,
            ctx: TxnContext::default(),
            state: TxnState::Ok,
            read_only,
            best_effort,
            mutated: false,
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    fn request(&self) -> Request {
        Request {
            text: String::new(),
            vars: BTreeMap::new(),
            start_ts: self.ctx.start_ts,
            hash: self.ctx.hash.clone(),
            read_only: self.read_only,
            best_effort: self.best_effort,
            mutations: Vec::new(),
            commit_now: false,
        }
    }

    /// Runs a query with no variable bindings and no explicit deadline.
    pub async fn query(&mut self, text: impl Into<String>) -> Result<Response, Error> {
        self.query_with_vars(text, BTreeMap::new(), None).await
    }

    /// Runs a query bound to the transaction's snapshot. On a transport
    /// failure the transaction state is left untouched. On success the
    /// returned context is merged; if that merge fails the merge failure is
    /// returned in place of the response, since the transaction's
    /// bookkeeping can no longer be trusted and neither can the data.
    pub async fn query_with_vars(
        &mut self,
        text: impl Into<String>,
        vars: BTreeMap<String, String>,
        deadline: Option<Duration>,
    ) -> Result<Response, Error> {
        if self.state != TxnState::Ok {
            return Err(Error::TxnNotOk(self.state));
        }
        let mut req = self.request();
        req.text = text.into();
        req.vars = vars;
        debug!("begin query at start_ts {}", req.start_ts);
        let resp = self.client.call(deadline, move |c| c.query(req)).await?;
        self.ctx.merge(resp.txn.as_ref())?;
        trace!("query merged context, now at start_ts {}", self.ctx.start_ts);
        Ok(resp)
    }

    /// Submits a mutation. An empty mutation is legal and free: it
    /// short-circuits to an empty response with no remote call. With
    /// `commit_now` set on the mutation, a successful round trip also
    /// commits the transaction, with no separate [Txn::commit] needed.
    ///
    /// A transport failure here is fatal to the transaction: one
    /// best-effort discard is fired (its outcome ignored), the state is
    /// forced to [TxnState::Error], and the original failure is returned.
    pub async fn mutate(
        &mut self,
        mu: Mutation,
        deadline: Option<Duration>,
    ) -> Result<Response, Error> {
        if self.state != TxnState::Ok {
            return Err(Error::TxnNotOk(self.state));
        }
        if self.read_only {
            return Err(Error::ReadOnlyTxn);
        }
        let commit_now = mu.commit_now;
        let mut req = self.request();
        req.commit_now = commit_now;
        req.mutations = vec![mu];
        if req.mutates_nothing() {
            trace!("empty mutation, nothing to send");
            return Ok(Response::default());
        }
        self.mutated = true;
        debug!("begin mutate at start_ts {}", req.start_ts);
        let resp = match self.client.call(deadline, move |c| c.query(req)).await {
            Ok(resp) => resp,
            Err(e) => {
                // The write may or may not have landed server-side. Try to
                // roll back, but the caller must see the original failure,
                // and the terminal state must say Error rather than the
                // Aborted the discard just set.
                debug!("mutate failed, attempting rollback: {}", e);
                let _ = self.discard(None).await;
                self.state = TxnState::Error;
                return Err(e);
            }
        };
        if commit_now {
            debug!("mutation committed in-band");
            self.state = TxnState::Committed;
        }
        match self.ctx.merge(resp.txn.as_ref()) {
            Ok(()) => Ok(resp),
            Err(cause) => Err(Error::MutatedButUnmerged {
                response: Box::new(resp),
                cause: Box::new(cause),
            }),
        }
    }

    /// Commits the transaction. The state moves to [TxnState::Committed]
    /// up front, declaring commit intent before the round trip the way the
    /// server expects. If the transaction never actually mutated anything
    /// there is nothing to commit server-side and no call is made.
    pub async fn commit(&mut self, deadline: Option<Duration>) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnlyTxn);
        }
        if self.state != TxnState::Ok {
            return Err(Error::TxnNotOk(self.state));
        }
        self.state = TxnState::Committed;
        if !self.mutated {
            trace!("commit of never-mutated transaction, nothing to send");
            return Ok(());
        }
        debug!("committing at start_ts {}", self.ctx.start_ts);
        let ctx = self.ctx.clone();
        self.client
            .call(deadline, move |c| c.commit_or_abort(ctx))
            .await
    }

    /// Rolls the transaction back. Safe to call any number of times and
    /// from teardown paths: once the transaction is in any terminal state
    /// this returns `Ok` without doing anything. As with commit, a
    /// transaction that never mutated has nothing to roll back server-side.
    pub async fn discard(&mut self, deadline: Option<Duration>) -> Result<(), Error> {
        if self.state != TxnState::Ok {
            return Ok(());
        }
        self.state = TxnState::Aborted;
        self.ctx.aborted = true;
        if !self.mutated {
            return Ok(());
        }
        debug!("discarding at start_ts {}", self.ctx.start_ts);
        let ctx = self.ctx.clone();
        self.client
            .call(deadline, move |c| c.commit_or_abort(ctx))
            .await
    }
}

impl<C: Channel> Drop for Txn<C> {
    /// Synchronous teardown can't await the rollback, so it schedules one:
    /// a best-effort discard on a background task, sharing the same
    /// idempotence gates as [Txn::discard]. Explicitly resolved
    /// transactions (committed, discarded, errored) drop without any work.
    fn drop(&mut self) {
        if self.state != TxnState::Ok || !self.mutated || self.read_only {
            return;
        }
        self.state = TxnState::Aborted;
        let mut ctx = mem::take(&mut self.ctx);
        ctx.aborted = true;
        let client = self.client.clone();
        trace!("scheduling background discard at start_ts {}", ctx.start_ts);
        task::spawn(async move {
            let _ = client.call(None, move |c| c.commit_or_abort(ctx)).await;
        });
    }
}
