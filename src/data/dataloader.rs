use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::batch::{BatchShapes, CollatedBatch};
use crate::data::dataset::BatchSource;
use crate::error::{MortalityError, Result};

/// Batches a [`BatchSource`], optionally shuffling and collating on
/// background workers. Each call to [`DataLoader::iter`] is one epoch.
pub struct DataLoader<S: BatchSource> {
    source: Arc<S>,
    batch_size: usize,
    shuffle: bool,
    num_workers: usize,
    indices: Vec<usize>,
    rng: StdRng,
}

impl<S: BatchSource> DataLoader<S> {
    pub fn new(source: S, batch_size: usize, shuffle: bool, num_workers: usize, seed: u64) -> Self {
        let indices: Vec<usize> = (0..source.len()).collect();
        let mut loader = Self {
            source: Arc::new(source),
            batch_size: batch_size.max(1),
            shuffle,
            num_workers,
            indices,
            rng: StdRng::seed_from_u64(seed),
        };
        if loader.shuffle {
            loader.indices.shuffle(&mut loader.rng);
        }
        loader
    }

    /// Items requested from the source per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn len(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Collates the first batch of the upcoming epoch without consuming it.
    pub fn probe(&self) -> Option<CollatedBatch> {
        let end = self.batch_size.min(self.indices.len());
        if end == 0 {
            return None;
        }
        Some(self.source.collate(&self.indices[..end]))
    }

    pub fn probe_shapes(&self) -> Option<BatchShapes> {
        self.probe().map(|batch| batch.shapes)
    }

    /// Starts an epoch. The order used is the one `probe` saw; the next
    /// epoch is reshuffled when shuffling is enabled.
    pub fn iter(&mut self) -> BatchIter {
        let chunks: Vec<Vec<usize>> = self
            .indices
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();

        let iter = if self.num_workers == 0 {
            BatchIter::inline(Arc::clone(&self.source) as Arc<dyn BatchSource>, chunks)
        } else {
            BatchIter::prefetching(
                Arc::clone(&self.source) as Arc<dyn BatchSource>,
                chunks,
                self.num_workers,
            )
        };

        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
        iter
    }
}

enum Mode {
    Inline {
        source: Arc<dyn BatchSource>,
        chunks: std::vec::IntoIter<Vec<usize>>,
    },
    Prefetch {
        results: Option<Receiver<(usize, CollatedBatch)>>,
        workers: Vec<JoinHandle<()>>,
        pending: BTreeMap<usize, CollatedBatch>,
        next: usize,
        total: usize,
    },
}

/// One epoch of batches, yielded in the loader's order.
pub struct BatchIter {
    mode: Mode,
}

impl BatchIter {
    fn inline(source: Arc<dyn BatchSource>, chunks: Vec<Vec<usize>>) -> Self {
        Self {
            mode: Mode::Inline {
                source,
                chunks: chunks.into_iter(),
            },
        }
    }

    fn prefetching(source: Arc<dyn BatchSource>, chunks: Vec<Vec<usize>>, num_workers: usize) -> Self {
        let total = chunks.len();
        let (job_tx, job_rx) = channel::unbounded::<(usize, Vec<usize>)>();
        let (result_tx, result_rx) = channel::bounded::<(usize, CollatedBatch)>(num_workers * 2);

        for job in chunks.into_iter().enumerate() {
            // receiver is alive until the workers below exit
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let workers = (0..num_workers)
            .map(|_| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    for (position, indices) in jobs {
                        if results.send((position, source.collate(&indices))).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        Self {
            mode: Mode::Prefetch {
                results: Some(result_rx),
                workers,
                pending: BTreeMap::new(),
                next: 0,
                total,
            },
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

impl Iterator for BatchIter {
    type Item = Result<CollatedBatch>;

    /// Yields an error, then ends, if the workers stop before every batch
    /// of the epoch has been delivered.
    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.mode {
            Mode::Inline { source, chunks } => chunks.next().map(|indices| Ok(source.collate(&indices))),
            Mode::Prefetch {
                results,
                workers,
                pending,
                next,
                total,
            } => {
                if *next >= *total {
                    return None;
                }
                loop {
                    if let Some(batch) = pending.remove(next) {
                        *next += 1;
                        return Some(Ok(batch));
                    }
                    let received = results.as_ref().and_then(|rx| rx.recv().ok());
                    match received {
                        Some((position, batch)) => {
                            pending.insert(position, batch);
                        }
                        None => {
                            results.take();
                            let reason = workers
                                .drain(..)
                                .filter_map(|worker| worker.join().err())
                                .map(|payload| panic_message(payload.as_ref()))
                                .next()
                                .unwrap_or_else(|| "workers exited early".to_string());
                            let error = MortalityError::Loader {
                                delivered: *next,
                                expected: *total,
                                reason,
                            };
                            *next = *total;
                            return Some(Err(error));
                        }
                    }
                }
            }
        }
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let Mode::Prefetch {
            results, workers, ..
        } = &mut self.mode
        {
            // unblocks workers waiting on a full queue
            results.take();
            for worker in workers.drain(..) {
                if worker.join().is_err() {
                    log::warn!("data loader worker panicked");
                }
            }
        }
    }
}
