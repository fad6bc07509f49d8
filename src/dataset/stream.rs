//! Batch Streams
//!
//! [`DataSupply`] owns the three scanned partitions and hands out finite, lazy
//! [`BatchStream`]s. A stream decodes one batch at a time (images inside a batch in
//! parallel) and is restarted by asking the supply for a new one.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::burn_dataset::{LesionBatch, LesionBatcher, LesionItem};
use crate::dataset::loader::{DatasetStats, ImageFolder, ImageSample};
use crate::utils::error::Result;

/// Labeled image partitions for one run
#[derive(Debug, Clone)]
pub struct DataSupply {
    train: ImageFolder,
    val: ImageFolder,
    test: ImageFolder,
    batch_size: usize,
    image_size: usize,
    seed: u64,
    augmentation: AugmentationConfig,
}

impl DataSupply {
    /// Scan the train, validation and test directories
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let data = &config.data;
        let train = ImageFolder::scan(&data.train_dir, &data.class_names)?;
        let val = ImageFolder::scan(&data.val_dir, &data.class_names)?;
        let test = ImageFolder::scan(&data.test_dir, &data.class_names)?;

        info!(
            "Data supply ready: {} train, {} val, {} test samples",
            train.len(),
            val.len(),
            test.len()
        );

        Ok(Self {
            train,
            val,
            test,
            batch_size: data.batch_size,
            image_size: data.image_size,
            seed: config.training.seed,
            augmentation: config.augmentation.clone(),
        })
    }

    /// Shuffled, augmented stream for one training epoch
    ///
    /// The same `(seed, epoch)` pair always yields the same tensors.
    pub fn training_stream(&self, epoch: usize) -> BatchStream {
        let epoch_seed = self.seed.wrapping_add(epoch as u64);
        let mut samples = self.train.samples.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(epoch_seed);
        samples.shuffle(&mut rng);

        BatchStream::new(
            samples,
            self.batch_size,
            Augmenter::new(self.augmentation.clone(), self.image_size as u32),
            Some(epoch_seed),
            self.image_size,
        )
    }

    /// Deterministic stream over the validation partition in on-disk order
    pub fn validation_stream(&self) -> BatchStream {
        self.plain_stream(&self.val)
    }

    /// Deterministic stream over the test partition in on-disk order
    pub fn test_stream(&self) -> BatchStream {
        self.plain_stream(&self.test)
    }

    fn plain_stream(&self, folder: &ImageFolder) -> BatchStream {
        BatchStream::new(
            folder.samples.clone(),
            self.batch_size,
            Augmenter::no_augmentation(self.image_size as u32),
            None,
            self.image_size,
        )
    }

    /// Ground-truth labels of the test partition, in stream order
    pub fn test_labels(&self) -> Vec<usize> {
        self.test.samples.iter().map(|s| s.label).collect()
    }

    /// Per-partition class distribution
    pub fn stats(&self) -> Vec<DatasetStats> {
        vec![
            self.train.stats("train"),
            self.val.stats("val"),
            self.test.stats("test"),
        ]
    }

    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn val_len(&self) -> usize {
        self.val.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.len()
    }

    /// Copy with an empty training partition, which scanning never produces
    #[cfg(test)]
    pub(crate) fn without_training_samples(&self) -> Self {
        let mut supply = self.clone();
        supply.train.samples.clear();
        supply
    }

    /// Copy with an empty test partition
    #[cfg(test)]
    pub(crate) fn without_test_samples(&self) -> Self {
        let mut supply = self.clone();
        supply.test.samples.clear();
        supply
    }
}

/// Finite lazy sequence of item batches
///
/// Yields `ceil(samples / batch_size)` batches; the last one may be partial.
#[derive(Debug, Clone)]
pub struct BatchStream {
    samples: Vec<ImageSample>,
    batch_size: usize,
    augmenter: Augmenter,
    augment_seed: Option<u64>,
    image_size: usize,
    cursor: usize,
}

impl BatchStream {
    fn new(
        samples: Vec<ImageSample>,
        batch_size: usize,
        augmenter: Augmenter,
        augment_seed: Option<u64>,
        image_size: usize,
    ) -> Self {
        Self {
            samples,
            batch_size: batch_size.max(1),
            augmenter,
            augment_seed,
            image_size,
            cursor: 0,
        }
    }

    /// Total number of batches this stream produces
    pub fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    /// Total number of samples this stream produces
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Labels in the order they will be yielded
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Convert into a stream of tensor batches on `device`
    pub fn batches<B: Backend>(
        self,
        device: &B::Device,
    ) -> impl Iterator<Item = Result<LesionBatch<B>>> + '_ {
        let batcher = LesionBatcher::new(self.image_size);
        self.map(move |items| {
            items.map(|items| {
                <LesionBatcher as Batcher<B, LesionItem, LesionBatch<B>>>::batch(
                    &batcher, items, device,
                )
            })
        })
    }

    fn load_chunk(&self, start: usize, end: usize) -> Result<Vec<LesionItem>> {
        self.samples[start..end]
            .par_iter()
            .enumerate()
            .map(|(offset, sample)| {
                let position = (start + offset) as u64;
                match self.augment_seed {
                    Some(seed) => {
                        // independent stream per sample keeps results order-free
                        let mut rng = ChaCha8Rng::seed_from_u64(seed);
                        rng.set_stream(position + 1);
                        LesionItem::from_path(&sample.path, sample.label, &self.augmenter, Some(&mut rng))
                    }
                    None => LesionItem::from_path(&sample.path, sample.label, &self.augmenter, None),
                }
            })
            .collect()
    }
}

impl Iterator for BatchStream {
    type Item = Result<Vec<LesionItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.samples.len() {
            return None;
        }

        let start = self.cursor;
        let end = (start + self.batch_size).min(self.samples.len());
        self.cursor = end;

        Some(self.load_chunk(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.samples.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}
