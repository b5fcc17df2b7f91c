//! Shared connection budgets: a global cap plus a per-origin cap, so one
//! job's segments can't starve another job talking to a different host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A single counted budget: `reserve` hands out up to the requested count
/// (never more than available), `release` gives slots back.
#[derive(Debug)]
pub struct ConnectionBudget {
    max_total: usize,
    in_use: AtomicUsize,
}

impl ConnectionBudget {
    pub fn new(max_total: usize) -> Self {
        Self { max_total: max_total.max(1), in_use: AtomicUsize::new(0) }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.max_total.saturating_sub(self.in_use.load(Ordering::Relaxed))
    }

    /// Reserves up to `requested` slots; returns the number actually reserved.
    pub fn reserve(&self, requested: usize) -> usize {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let available = self.max_total.saturating_sub(current);
            let take = requested.min(available);
            match self.in_use.compare_exchange_weak(current, current + take, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return take,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self, n: usize) {
        self.in_use.fetch_sub(n.min(self.in_use.load(Ordering::Relaxed)), Ordering::Release);
    }
}

/// Keyed registry of per-origin budgets backed by one shared global budget.
/// A segment fetch must hold one slot from the global budget and one from
/// its origin's budget for the duration of the request.
pub struct OriginBudgets {
    global: Arc<ConnectionBudget>,
    per_origin: Mutex<HashMap<String, Arc<ConnectionBudget>>>,
    max_per_origin: usize,
}

impl OriginBudgets {
    pub fn new(max_total: usize, max_per_origin: usize) -> Self {
        Self {
            global: Arc::new(ConnectionBudget::new(max_total)),
            per_origin: Mutex::new(HashMap::new()),
            max_per_origin,
        }
    }

    fn origin_budget(&self, origin: &str) -> Arc<ConnectionBudget> {
        let mut map = self.per_origin.lock().unwrap();
        map.entry(origin.to_string())
            .or_insert_with(|| Arc::new(ConnectionBudget::new(self.max_per_origin)))
            .clone()
    }

    /// Reserves one slot from both the global and the origin budgets.
    /// Returns `None` if either is momentarily exhausted.
    pub fn try_reserve_one(&self, origin: &str) -> Option<OriginReservation> {
        let origin_budget = self.origin_budget(origin);
        if origin_budget.reserve(1) == 0 {
            return None;
        }
        if self.global.reserve(1) == 0 {
            origin_budget.release(1);
            return None;
        }
        Some(OriginReservation { global: Arc::clone(&self.global), origin: origin_budget })
    }
}

/// RAII guard releasing one global and one origin slot on drop.
pub struct OriginReservation {
    global: Arc<ConnectionBudget>,
    origin: Arc<ConnectionBudget>,
}

impl Drop for OriginReservation {
    fn drop(&mut self) {
        self.global.release(1);
        self.origin.release(1);
    }
}
