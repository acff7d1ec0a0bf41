//! Parallel batch loader
//!
//! Worker `i` collates batches `i, i + W, i + 2W, ...` of the epoch plan and
//! hands them over its own bounded channel; the consumer reads the channels
//! round-robin, so batches arrive in plan order. With zero workers batches
//! are collated inline on the consumer thread.

use rand::rngs::StdRng;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use crate::collate::{collate_indices, Batch};
use crate::dataset::SequenceDataset;
use crate::sampler::{BatchPlan, BatchSampler};

/// Batches buffered per worker
const CHANNEL_CAPACITY: usize = 2;

pub struct DataLoader {
    dataset: Arc<SequenceDataset>,
    sampler: BatchSampler,
    workers: usize,
}

impl DataLoader {
    pub fn new(dataset: Arc<SequenceDataset>, sampler: BatchSampler, workers: usize) -> Self {
        Self {
            dataset,
            sampler,
            workers,
        }
    }

    pub fn dataset(&self) -> &SequenceDataset {
        &self.dataset
    }

    pub fn sampler(&self) -> BatchSampler {
        self.sampler
    }

    /// Start one epoch; the plan is drawn from `rng` up front
    pub fn epoch(&self, rng: &mut StdRng) -> EpochBatches {
        let plan = self.sampler.plan(&self.dataset, rng);
        EpochBatches::start(Arc::clone(&self.dataset), plan, self.workers)
    }
}

/// Iterator over the batches of one epoch
pub struct EpochBatches {
    total: usize,
    next: usize,
    inline: Option<(Arc<SequenceDataset>, BatchPlan)>,
    receivers: Vec<mpsc::Receiver<Batch>>,
    handles: Vec<JoinHandle<()>>,
}

impl EpochBatches {
    fn start(dataset: Arc<SequenceDataset>, plan: BatchPlan, workers: usize) -> Self {
        let total = plan.len();
        if workers == 0 || total == 0 {
            return Self {
                total,
                next: 0,
                inline: Some((dataset, plan)),
                receivers: Vec::new(),
                handles: Vec::new(),
            };
        }

        let workers = workers.min(total);
        let plan = Arc::new(plan);
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let worker_dataset = Arc::clone(&dataset);
            let worker_plan = Arc::clone(&plan);
            let handle = std::thread::Builder::new()
                .name(format!("ptts-loader-{worker}"))
                .spawn(move || {
                    for slots in worker_plan.iter().skip(worker).step_by(workers) {
                        let batch = collate_indices(&worker_dataset, slots);
                        if tx.blocking_send(batch).is_err() {
                            // consumer dropped the epoch
                            return;
                        }
                    }
                });
            match handle {
                Ok(handle) => {
                    receivers.push(rx);
                    handles.push(handle);
                }
                Err(e) => {
                    tracing::warn!(worker, error = %e, "Failed to spawn loader worker, collating inline");
                    drop(receivers);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    let plan = Arc::try_unwrap(plan).unwrap_or_else(|shared| (*shared).clone());
                    return Self {
                        total,
                        next: 0,
                        inline: Some((dataset, plan)),
                        receivers: Vec::new(),
                        handles: Vec::new(),
                    };
                }
            }
        }

        tracing::debug!(workers, batches = total, "Started loader workers");
        Self {
            total,
            next: 0,
            inline: None,
            receivers,
            handles,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for EpochBatches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        if let Some((dataset, plan)) = &self.inline {
            return Some(collate_indices(dataset, &plan[index]));
        }
        let workers = self.receivers.len();
        self.receivers[index % workers].blocking_recv()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl Drop for EpochBatches {
    fn drop(&mut self) {
        self.receivers.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
