//! Scheduling simulations: fairness under re-insertion and parallel drains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::application::{ApplicationError, ApplicationResult, Request};
use crate::domain::{GrabResult, GrabTree, NoExclusion, NodeShape, PruneListener, SectorKey, TreeOptions};

/// Selection counts for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientShare {
    pub client: String,
    pub queued: usize,
    pub selected: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FairnessReport {
    pub trials: usize,
    pub clients: Vec<ClientShare>,
}

impl FairnessReport {
    /// Fraction of all selections that went to `client`.
    pub fn share(&self, client: &str) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.clients
            .iter()
            .find(|c| c.client == client)
            .map(|c| c.selected as f64 / self.trials as f64)
            .unwrap_or(0.0)
    }

    /// Largest deviation of any client's share from an even split.
    pub fn max_deviation(&self) -> f64 {
        if self.clients.is_empty() {
            return 0.0;
        }
        let even = 1.0 / self.clients.len() as f64;
        self.clients
            .iter()
            .map(|c| (self.share(&c.client) - even).abs())
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub total: usize,
    pub cancelled: usize,
    pub delivered: usize,
    pub duplicates: usize,
    pub root_events: usize,
    pub remaining_items: usize,
}

impl DrainReport {
    /// Every live request delivered exactly once and a single drain event.
    pub fn is_clean(&self) -> bool {
        let expected_events = usize::from(self.total > 0);
        self.duplicates == 0
            && self.delivered == self.total - self.cancelled
            && self.remaining_items == 0
            && self.root_events == expected_events
    }
}

/// A population of clients with fixed queue depths.
#[derive(Debug, Clone)]
pub struct Simulation {
    options: TreeOptions,
    depths: Vec<usize>,
}

impl Simulation {
    pub fn new(options: TreeOptions, depths: Vec<usize>) -> Self {
        Self { options, depths }
    }

    pub fn client_name(i: usize) -> String {
        format!("client-{i}")
    }

    fn path_for(&self, client: &str) -> Vec<SectorKey<String>> {
        match self.options.root {
            NodeShape::Branch => vec![SectorKey::Client(client.to_string())],
            // Flat bag: no sectors, selection is proportional to depth.
            NodeShape::Leaf => Vec::new(),
        }
    }

    fn request(&self, id: u64, client: &str) -> Arc<Request> {
        if self.options.durable {
            Request::durable(id, client)
        } else {
            Request::new(id, client)
        }
    }

    /// Fills `tree` with every client's requests.
    pub fn populate(&self, tree: &GrabTree<Request>) -> ApplicationResult<Vec<Arc<Request>>> {
        let mut requests = Vec::new();
        let mut next_id = 0u64;
        for (i, &depth) in self.depths.iter().enumerate() {
            let client = Self::client_name(i);
            let path = self.path_for(&client);
            for _ in 0..depth {
                let request = self.request(next_id, &client);
                next_id += 1;
                tree.insert(&path, Arc::clone(&request))?;
                requests.push(request);
            }
        }
        debug!(requests = requests.len(), clients = self.depths.len(), "tree populated");
        Ok(requests)
    }

    pub fn tree(&self) -> ApplicationResult<GrabTree<Request>> {
        let tree = GrabTree::new(self.options);
        self.populate(&tree)?;
        Ok(tree)
    }

    /// Repeatedly selects and immediately re-queues, counting per client.
    #[instrument(level = "debug", skip(self))]
    pub fn fairness(&self, trials: usize) -> ApplicationResult<FairnessReport> {
        let tree = GrabTree::new(self.options);
        self.populate(&tree)?;

        let mut selected: HashMap<String, usize> = HashMap::new();
        for _ in 0..trials {
            let request = tree.remove_random(&NoExclusion)?.ok_or_else(|| {
                ApplicationError::Simulation {
                    message: "tree ran dry during fairness trial".to_string(),
                }
            })?;
            *selected.entry(request.client.clone()).or_default() += 1;
            let path = self.path_for(&request.client);
            tree.insert(&path, request)?;
        }

        let clients = self
            .depths
            .iter()
            .enumerate()
            .filter(|(_, depth)| **depth > 0)
            .map(|(i, &queued)| {
                let client = Self::client_name(i);
                let selected = selected.get(&client).copied().unwrap_or(0);
                ClientShare {
                    client,
                    queued,
                    selected,
                }
            })
            .collect();

        Ok(FairnessReport { trials, clients })
    }

    /// Drains the tree from `workers` threads at once.
    ///
    /// Every `cancel_every`-th request is finished before the drain starts
    /// and must never be delivered.
    #[instrument(level = "debug", skip(self))]
    pub fn drain(&self, workers: usize, cancel_every: Option<usize>) -> ApplicationResult<DrainReport> {
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        let listener: Arc<dyn PruneListener> = Arc::new(move |_tree: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let tree = GrabTree::new(self.options).with_listener(listener);
        let requests = self.populate(&tree)?;

        let mut cancelled = 0;
        if let Some(every) = cancel_every.filter(|&n| n > 0) {
            for request in requests.iter().step_by(every) {
                request.finish();
                cancelled += 1;
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| ApplicationError::OperationFailed {
                context: "build drain worker pool".to_string(),
                source: Box::new(e),
            })?;

        let batches: Vec<Vec<u64>> = pool.install(|| {
            (0..workers.max(1))
                .into_par_iter()
                .map(|_| drain_worker(&tree))
                .collect::<GrabResult<Vec<_>>>()
        })?;

        let mut seen: HashMap<u64, usize> = HashMap::new();
        for id in batches.iter().flatten() {
            *seen.entry(*id).or_default() += 1;
        }
        let delivered = seen.len();
        let duplicates = seen.values().map(|n| n - 1).sum();

        let report = DrainReport {
            total: requests.len(),
            cancelled,
            delivered,
            duplicates,
            root_events: events.load(Ordering::SeqCst),
            remaining_items: tree.item_count(),
        };
        info!(?report, "drain finished");
        Ok(report)
    }
}

fn drain_worker(tree: &GrabTree<Request>) -> GrabResult<Vec<u64>> {
    let mut delivered = Vec::new();
    while let Some(request) = tree.remove_random(&NoExclusion)? {
        delivered.push(request.id);
    }
    Ok(delivered)
}
