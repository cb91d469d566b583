//! Ordered batch prefetching.
//!
//! [`BatchLoader`] yields fixed-size batches of [`CaptionItem`]s in dataset
//! order. With workers, batches are assembled on background threads and
//! re-ordered by batch id before being handed out, so the sequence of batches
//! is identical for any worker count.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::debug;

use crate::dataset::{CaptionItem, CaptionsDataset};

/// One batch of consecutive captions.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: usize,
    pub items: Vec<CaptionItem>,
}

impl Batch {
    pub fn prompts(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.prompt.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Number of batches needed to cover `len` items.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size)
}

/// Index range covered by batch `id`.
fn batch_range(id: usize, batch_size: usize, len: usize) -> Range<usize> {
    let start = id * batch_size;
    start..(start + batch_size).min(len)
}

fn assemble(dataset: &CaptionsDataset, id: usize, batch_size: usize) -> Result<Batch> {
    let items = batch_range(id, batch_size, dataset.len())
        .map(|index| dataset.get(index))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to assemble batch {id}"))?;
    Ok(Batch { id, items })
}

type BatchResult = Result<Batch>;

enum Source {
    Inline {
        dataset: Arc<CaptionsDataset>,
    },
    Workers {
        results: Receiver<BatchResult>,
        pending: BTreeMap<usize, Batch>,
    },
}

/// Iterator over the batches of a dataset.
pub struct BatchLoader {
    source: Source,
    batch_size: usize,
    total: usize,
    next: usize,
}

impl BatchLoader {
    /// Create a loader over `dataset`. `num_workers == 0` assembles batches on
    /// the calling thread.
    pub fn new(dataset: Arc<CaptionsDataset>, batch_size: usize, num_workers: usize) -> Result<Self> {
        anyhow::ensure!(batch_size > 0, "batch size must be at least 1");
        let total = batch_count(dataset.len(), batch_size);

        let source = if num_workers == 0 || total == 0 {
            Source::Inline { dataset }
        } else {
            let (task_tx, task_rx) = unbounded::<usize>();
            let (result_tx, result_rx) = bounded::<BatchResult>(num_workers * 2);

            for id in 0..total {
                task_tx
                    .send(id)
                    .map_err(|_| anyhow!("batch task channel closed"))?;
            }
            drop(task_tx);

            for worker_id in 0..num_workers.min(total) {
                let dataset = Arc::clone(&dataset);
                let tasks = task_rx.clone();
                let results = result_tx.clone();
                thread::Builder::new()
                    .name(format!("caption-loader-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, dataset, batch_size, tasks, results))
                    .context("failed to spawn batch loader worker")?;
            }

            Source::Workers {
                results: result_rx,
                pending: BTreeMap::new(),
            }
        };

        Ok(Self {
            source,
            batch_size,
            total,
            next: 0,
        })
    }

    /// Total number of batches this loader yields.
    pub fn num_batches(&self) -> usize {
        self.total
    }
}

impl Iterator for BatchLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let id = self.next;

        let batch = match &mut self.source {
            Source::Inline { dataset } => assemble(dataset, id, self.batch_size),
            Source::Workers { results, pending } => loop {
                if let Some(batch) = pending.remove(&id) {
                    break Ok(batch);
                }
                match results.recv() {
                    Ok(Ok(batch)) => {
                        pending.insert(batch.id, batch);
                    }
                    Ok(Err(err)) => break Err(err),
                    Err(_) => break Err(anyhow!("batch loader workers exited before batch {id}")),
                }
            },
        };

        match batch {
            Ok(batch) => {
                self.next += 1;
                Some(Ok(batch))
            }
            Err(err) => {
                // Stop after the first failure.
                self.next = self.total;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

fn worker_loop(
    worker_id: usize,
    dataset: Arc<CaptionsDataset>,
    batch_size: usize,
    tasks: Receiver<usize>,
    results: Sender<BatchResult>,
) {
    for id in tasks.iter() {
        let batch = assemble(&dataset, id, batch_size);
        debug!(worker_id, batch = id, "batch assembled");
        if results.send(batch).is_err() {
            // Consumer dropped the loader.
            break;
        }
    }
}
