//! A pending data request: the concrete item the node schedules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::{GrabItem, ItemLink};

/// Outbound or relayed data request owned by one client.
#[derive(Debug)]
pub struct Request {
    pub id: u64,
    pub client: String,
    durable: bool,
    finished: AtomicBool,
    in_flight: AtomicBool,
    link: ItemLink,
}

impl Request {
    pub fn new(id: u64, client: impl Into<String>) -> Arc<Self> {
        Self::build(id, client, false)
    }

    /// A request whose state is backed by the persistent store.
    pub fn durable(id: u64, client: impl Into<String>) -> Arc<Self> {
        Self::build(id, client, true)
    }

    fn build(id: u64, client: impl Into<String>, durable: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            client: client.into(),
            durable,
            finished: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            link: ItemLink::new(),
        })
    }

    /// Completes or cancels the request. Irreversible.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Marks a companion message as in flight; the request is held back
    /// from selection until cleared.
    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Release);
    }
}

impl GrabItem for Request {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn can_remove_now(&self) -> bool {
        !self.in_flight.load(Ordering::Acquire)
    }

    fn is_durable(&self) -> bool {
        self.durable
    }

    fn link(&self) -> &ItemLink {
        &self.link
    }
}
