//! # Transaction table
//!
//! A session owns every live transaction of one connection, keyed by
//! stream id. All events reach a transaction through the table, which then:
//!
//! 1. adopts push/extended transactions the handler created, and
//! 2. drops transactions that finalized, unlinking them from their parent.
//!
//! Single-threaded: a session and its transactions live on the connection's
//! event-loop thread.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::error::{ErrorCode, HttpError};
use crate::handler::Handler;
use crate::priority::PriorityUpdate;
use crate::time::Instant;
use crate::transaction::{ExAttributes, Transaction, TransactionContext};
use crate::types::{StreamId, TransportDirection};

pub struct TransactionTable {
    ctx: TransactionContext,
    direction: TransportDirection,
    transactions: HashMap<StreamId, Transaction>,
}

impl TransactionTable {
    pub fn new(ctx: TransactionContext, direction: TransportDirection) -> Self {
        Self {
            ctx,
            direction,
            transactions: HashMap::new(),
        }
    }

    pub fn context(&self) -> &TransactionContext {
        &self.ctx
    }

    pub fn direction(&self) -> TransportDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.transactions.contains_key(&id)
    }

    pub fn get(&self, id: StreamId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.transactions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Open a transaction on `id` and bind `handler` to it.
    ///
    /// Returns `None` if the stream is already in use.
    pub fn create(
        &mut self,
        id: StreamId,
        handler: Box<dyn Handler>,
        priority: PriorityUpdate,
    ) -> Option<&mut Transaction> {
        if self.transactions.contains_key(&id) {
            warn!(stream_id = %id, "stream already has a transaction");
            return None;
        }
        let mut txn = Transaction::new(&self.ctx, id, self.direction, priority);
        txn.set_handler(handler);
        self.transactions.insert(id, txn);
        self.transactions.get_mut(&id)
    }

    /// Run `f` against transaction `id`, then adopt anything it spawned and
    /// drop it if it finalized.
    pub fn with_transaction<R>(
        &mut self,
        id: StreamId,
        f: impl FnOnce(&mut Transaction) -> R,
    ) -> Option<R> {
        let txn = self.transactions.get_mut(&id)?;
        let out = f(txn);
        let spawned = txn.take_spawned();
        self.adopt(spawned);
        self.reap();
        Some(out)
    }

    /// The peer pushed stream `id` associated with `parent`. Returns
    /// whether the parent's handler accepted it.
    ///
    /// A push on a stream id that is still in use is ignored. Resetting it
    /// would tear down the live transaction on that stream.
    pub fn on_pushed_transaction(
        &mut self,
        parent: StreamId,
        id: StreamId,
        priority: PriorityUpdate,
    ) -> bool {
        if self.transactions.contains_key(&id) {
            warn!(parent = %parent, pushed = %id, "push on a stream already in use");
            return false;
        }
        let mut pushed = Transaction::new_pushed(&self.ctx, id, self.direction, parent, priority);
        let accepted = match self.transactions.get_mut(&parent) {
            Some(txn) => txn.on_pushed_transaction(&mut pushed),
            None => {
                debug!(parent = %parent, pushed = %id, "push for unknown parent");
                pushed.send_abort_with_code(ErrorCode::RefusedStream);
                false
            }
        };
        self.transactions.insert(id, pushed);
        self.reap();
        accepted
    }

    /// The peer opened extended transaction `id` on `control`.
    pub fn on_ex_transaction(&mut self, control: StreamId, id: StreamId, unidirectional: bool) -> bool {
        if self.transactions.contains_key(&id) {
            warn!(
                control = %control,
                ex = %id,
                "extended transaction on a stream already in use"
            );
            return false;
        }
        let attributes = ExAttributes {
            control_stream: control,
            unidirectional,
        };
        let mut ex = Transaction::new_ex(
            &self.ctx,
            id,
            self.direction,
            attributes,
            PriorityUpdate::default(),
        );
        let accepted = match self.transactions.get_mut(&control) {
            Some(txn) => txn.on_ex_transaction(&mut ex),
            None => {
                debug!(control = %control, ex = %id, "extended transaction on unknown stream");
                ex.send_abort_with_code(ErrorCode::RefusedStream);
                false
            }
        };
        self.transactions.insert(id, ex);
        self.reap();
        accepted
    }

    /// Earliest deadline across all transactions.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.transactions
            .values()
            .filter_map(Transaction::next_timeout)
            .min()
    }

    /// Fire every timer due at `now`.
    pub fn on_timeout(&mut self, now: Instant) {
        let due: Vec<StreamId> = self
            .transactions
            .iter()
            .filter(|(_, txn)| txn.next_timeout().is_some_and(|at| at <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.with_transaction(id, |txn| txn.on_timeout(now));
        }
    }

    /// Tell every transaction's handler the connection is going away.
    pub fn on_goaway(&mut self, code: ErrorCode) {
        for id in self.ids() {
            self.with_transaction(id, |txn| txn.on_goaway(code));
        }
    }

    /// Fail every transaction with a connection-level error.
    pub fn on_connection_error(&mut self, error: &HttpError) {
        debug!(%error, transactions = self.transactions.len(), "connection error");
        for id in self.ids() {
            self.with_transaction(id, |txn| txn.on_error(error.clone()));
        }
    }

    /// The peer changed its initial stream window (a SETTINGS change).
    pub fn on_initial_send_window(&mut self, capacity: u32) {
        for id in self.ids() {
            self.with_transaction(id, |txn| txn.on_ingress_set_send_window(capacity));
        }
    }

    fn adopt(&mut self, spawned: Vec<Transaction>) {
        for txn in spawned {
            trace!(stream_id = %txn.id(), "adopting spawned transaction");
            self.transactions.insert(txn.id(), txn);
        }
    }

    /// Drop finalized transactions. Returns how many were dropped.
    pub fn reap(&mut self) -> usize {
        let finished: Vec<StreamId> = self
            .transactions
            .iter()
            .filter(|(_, txn)| txn.is_detached())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            let Some(txn) = self.transactions.remove(id) else {
                continue;
            };
            trace!(stream_id = %id, "transaction reaped");
            if let Some(parent) = txn.assoc_stream_id() {
                if let Some(parent) = self.transactions.get_mut(&parent) {
                    parent.remove_pushed_transaction(*id);
                }
            }
            if let Some(control) = txn.control_stream() {
                if let Some(control) = self.transactions.get_mut(&control) {
                    control.remove_ex_transaction(*id);
                }
            }
        }
        finished.len()
    }
}
