use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::Gather;
use crate::{Result, TrainErr};

/// Anything that hands out batches until it runs dry.
pub trait BatchSource {
    type Batch;

    /// Returns the next batch, or `None` once the current pass is exhausted.
    fn next_batch(&mut self) -> Option<Self::Batch>;

    /// Starts a new pass.
    fn reset(&mut self);
}

/// Batches a shared dataset, optionally reshuffling it on every pass.
#[derive(Debug)]
pub struct ShuffledLoader<D> {
    dataset: Arc<D>,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl<D: Gather> ShuffledLoader<D> {
    /// Creates a loader that reshuffles on every pass and skips the trailing partial batch.
    ///
    /// # Arguments
    /// * `dataset` - The samples to batch.
    /// * `batch_size` - The amount of samples per batch.
    /// * `seed` - Seeds the shuffling order.
    pub fn shuffled(dataset: Arc<D>, batch_size: usize, seed: u64) -> Result<Self> {
        Self::new(dataset, batch_size, true, true, seed)
    }

    /// Creates a loader that walks the dataset in order and keeps the trailing partial batch.
    pub fn sequential(dataset: Arc<D>, batch_size: usize) -> Result<Self> {
        Self::new(dataset, batch_size, false, false, 0)
    }

    fn new(
        dataset: Arc<D>,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainErr::InvalidConfig {
                field: "batch_size",
                reason: "must be positive".into(),
            });
        }

        let mut loader = Self {
            order: (0..dataset.len()).collect(),
            dataset,
            batch_size,
            shuffle,
            drop_last,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        };

        loader.reset();
        Ok(loader)
    }
}

impl<D: Gather> BatchSource for ShuffledLoader<D> {
    type Batch = D::Batch;

    fn next_batch(&mut self) -> Option<D::Batch> {
        let remaining = self.order.len() - self.cursor;
        if remaining == 0 || (self.drop_last && remaining < self.batch_size) {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.dataset.gather(&self.order[self.cursor..end]);

        self.cursor = end;
        Some(batch)
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }
}

/// Endless view over a `BatchSource`: an exhausted pass restarts transparently.
#[derive(Debug)]
pub struct Cyclic<S> {
    source: S,
    name: &'static str,
}

impl<S: BatchSource> Cyclic<S> {
    /// Creates a new `Cyclic`.
    ///
    /// # Arguments
    /// * `source` - The wrapped source.
    /// * `name` - Names the source on errors.
    pub fn new(source: S, name: &'static str) -> Self {
        Self { source, name }
    }

    /// Returns the next batch, restarting the source once if it ran dry.
    ///
    /// # Returns
    /// An error if even a fresh pass yields nothing.
    pub fn next(&mut self) -> Result<S::Batch> {
        if let Some(batch) = self.source.next_batch() {
            return Ok(batch);
        }

        self.source.reset();
        self.source
            .next_batch()
            .ok_or(TrainErr::EmptySource { name: self.name })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::{
        data::{LabeledBatch, LabeledSet},
        landmarks::LANDMARK_DIM,
    };

    fn dataset(n: usize) -> Arc<LabeledSet> {
        let inputs = Array2::from_shape_fn((n, 1), |(i, _)| i as f32);
        let targets = Array2::zeros((n, LANDMARK_DIM));
        Arc::new(LabeledSet::new(inputs, targets).unwrap())
    }

    fn ids(batch: &LabeledBatch) -> Vec<usize> {
        batch.inputs.iter().map(|x| *x as usize).collect()
    }

    #[test]
    fn sequential_keeps_the_partial_tail() {
        let mut dl = ShuffledLoader::sequential(dataset(5), 2).unwrap();

        assert_eq!(ids(&dl.next_batch().unwrap()), [0, 1]);
        assert_eq!(ids(&dl.next_batch().unwrap()), [2, 3]);
        assert_eq!(ids(&dl.next_batch().unwrap()), [4]);
        assert!(dl.next_batch().is_none());

        dl.reset();
        assert_eq!(ids(&dl.next_batch().unwrap()), [0, 1]);
    }

    #[test]
    fn shuffled_drops_the_partial_tail_and_covers_each_sample_once() {
        let mut dl = ShuffledLoader::shuffled(dataset(7), 3, 42).unwrap();

        let mut seen: Vec<_> = std::iter::from_fn(|| dl.next_batch())
            .flat_map(|b| ids(&b))
            .collect();
        assert_eq!(seen.len(), 6);

        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn same_seed_same_order() {
        let mut a = ShuffledLoader::shuffled(dataset(16), 4, 9).unwrap();
        let mut b = ShuffledLoader::shuffled(dataset(16), 4, 9).unwrap();

        for _ in 0..4 {
            assert_eq!(ids(&a.next_batch().unwrap()), ids(&b.next_batch().unwrap()));
        }
    }

    #[test]
    fn cyclic_restarts_on_exhaustion() {
        let dl = ShuffledLoader::sequential(dataset(3), 2).unwrap();
        let mut cyc = Cyclic::new(dl, "labeled");

        let got: Vec<_> = (0..4).map(|_| ids(&cyc.next().unwrap())).collect();
        assert_eq!(got, [vec![0, 1], vec![2], vec![0, 1], vec![2]]);
    }

    #[test]
    fn cyclic_over_an_empty_source_fails() {
        let dl = ShuffledLoader::shuffled(dataset(2), 4, 0).unwrap();
        let mut cyc = Cyclic::new(dl, "unlabeled");

        assert!(matches!(
            cyc.next(),
            Err(TrainErr::EmptySource { name: "unlabeled" })
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(ShuffledLoader::sequential(dataset(2), 0).is_err());
    }
}
