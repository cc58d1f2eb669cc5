use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use burn_dataset::{
    vision::{MnistDataset, MnistItem},
    Dataset,
};
use log::info;
use mlpbench_core::{load_cifar10_dir, load_idx_dir, DatasetSplits, ImageSet};

use crate::{
    cli::DatasetKind,
    download::{ensure_cifar10, ensure_fmnist, CIFAR10_EXTRACTED_DIR},
};

const MNIST_SIDE: usize = 28;

/// Load both splits of `kind`, with pixels flattened and scaled to `[0, 1]`.
pub fn load_dataset(kind: DatasetKind, data_dir: &Path) -> Result<DatasetSplits> {
    let splits = match kind {
        DatasetKind::Mnist => DatasetSplits {
            train: mnist_split(&MnistDataset::train()).context("failed to load MNIST train")?,
            test: mnist_split(&MnistDataset::test()).context("failed to load MNIST test")?,
        },
        DatasetKind::Fmnist => {
            let dir = data_dir.join("Fmnist");
            ensure_fmnist(&dir)?;
            load_idx_dir(&dir)
                .with_context(|| format!("failed to load FashionMNIST from {}", dir.display()))?
        }
        DatasetKind::Cifar10 => {
            let root = data_dir.join("Cifar10");
            ensure_cifar10(&root)?;
            let dir = root.join(CIFAR10_EXTRACTED_DIR);
            load_cifar10_dir(&dir)
                .with_context(|| format!("failed to load CIFAR-10 from {}", dir.display()))?
        }
    };

    info!(
        "loaded {}: {} train / {} test samples, {} features",
        kind,
        splits.train.len(),
        splits.test.len(),
        splits.train.input_dim()
    );
    Ok(splits)
}

fn mnist_split(dataset: &MnistDataset) -> Result<ImageSet> {
    let mut pixels = Vec::with_capacity(dataset.len() * MNIST_SIDE * MNIST_SIDE);
    let mut labels = Vec::with_capacity(dataset.len());
    for index in 0..dataset.len() {
        let item = dataset
            .get(index)
            .ok_or_else(|| anyhow!("dataset index {} out of bounds", index))?;
        push_mnist_item(&item, &mut pixels);
        labels.push(item.label);
    }
    ImageSet::new(1, MNIST_SIDE, MNIST_SIDE, pixels, labels)
}

fn push_mnist_item(item: &MnistItem, pixels: &mut Vec<f32>) {
    for row in item.image.iter() {
        for &pixel in row.iter() {
            pixels.push(pixel / 255.0);
        }
    }
}

/// A mini-batch on the device, with the labels also kept on the host for bookkeeping.
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
    pub labels: Vec<usize>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn from_indices(
        set: &ImageSet,
        indices: &[usize],
        classes: usize,
        device: &B::Device,
    ) -> Result<Self> {
        let (pixels, raw_labels) = set.gather(indices)?;
        let labels: Vec<usize> = raw_labels.iter().map(|&l| usize::from(l)).collect();
        if let Some(&bad) = labels.iter().find(|&&l| l >= classes) {
            bail!("label {bad} is out of range for {classes} classes");
        }

        let len = indices.len();
        let images =
            Tensor::<B, 2>::from_floats(TensorData::new(pixels, [len, set.input_dim()]), device);
        let target_values: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_ints(TensorData::new(target_values, [len]), device);

        Ok(Self {
            images,
            targets,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use burn_candle::{Candle, CandleDevice};

    use super::*;

    type TestBackend = Candle<f32, i64>;

    fn tiny_set() -> ImageSet {
        ImageSet::new(1, 1, 3, vec![0.0, 0.1, 0.2, 1.0, 1.1, 1.2, 2.0, 2.1, 2.2], vec![0, 2, 1])
            .unwrap()
    }

    #[test]
    fn batch_gathers_requested_rows() {
        let batch = ImageBatch::<TestBackend>::from_indices(&tiny_set(), &[2, 0], 3, &CandleDevice::Cpu)
            .unwrap();

        assert_eq!(batch.labels.len(), 2);
        assert_eq!(batch.images.dims(), [2, 3]);
        assert_eq!(batch.labels, vec![1, 0]);
        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }

    #[test]
    fn batch_rejects_labels_beyond_class_count() {
        let err = ImageBatch::<TestBackend>::from_indices(&tiny_set(), &[1], 2, &CandleDevice::Cpu)
            .unwrap_err();
        assert!(err.to_string().contains("label 2"));
    }

    #[test]
    fn mnist_items_flatten_row_major_and_scale() {
        let mut image = [[0.0f32; 28]; 28];
        image[0][1] = 255.0;
        image[27][27] = 51.0;
        let mut pixels = Vec::new();
        push_mnist_item(&MnistItem { image, label: 3 }, &mut pixels);

        assert_eq!(pixels.len(), 784);
        assert_eq!(pixels[1], 1.0);
        assert!((pixels[783] - 0.2).abs() < 1e-6);
    }
}
