//! In-memory image classification splits and readers for the on-disk formats they ship in.
//!
//! FashionMNIST uses the IDX format from the original MNIST distribution (big-endian `u32`
//! header followed by raw bytes). CIFAR-10 uses the "binary version" batches, where every
//! record is one label byte followed by a 32x32 image stored plane by plane (R, then G, then B).

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{anyhow, bail, Context, Result};

const IDX_IMAGES_MAGIC: u32 = 2051;
const IDX_LABELS_MAGIC: u32 = 2049;

pub const CIFAR_SIDE: usize = 32;
pub const CIFAR_CHANNELS: usize = 3;
const CIFAR_IMAGE_BYTES: usize = CIFAR_SIDE * CIFAR_SIDE * CIFAR_CHANNELS;
const CIFAR_TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const CIFAR_TEST_BATCH: &str = "test_batch.bin";

/// Uncompressed IDX files of an MNIST-style directory: train images, train labels, test images,
/// test labels.
pub const IDX_FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

/// Every batch file `load_cifar10_dir` reads.
pub fn cifar10_files() -> impl Iterator<Item = &'static str> {
    CIFAR_TRAIN_BATCHES
        .into_iter()
        .chain(std::iter::once(CIFAR_TEST_BATCH))
}

/// A split of images held as flattened `[0, 1]` pixels.
///
/// Multi-channel images keep the planar CHW layout they were stored in.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageSet {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pixels: Vec<f32>,
    labels: Vec<u8>,
}

impl ImageSet {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        pixels: Vec<f32>,
        labels: Vec<u8>,
    ) -> Result<Self> {
        let image_len = channels * height * width;
        if image_len == 0 {
            bail!("image dimensions {channels}x{height}x{width} must be non-zero");
        }
        if pixels.len() != image_len * labels.len() {
            bail!(
                "pixel buffer length {} does not match {} images of {} values",
                pixels.len(),
                labels.len(),
                image_len
            );
        }
        Ok(Self {
            channels,
            height,
            width,
            pixels,
            labels,
        })
    }

    /// Build from raw bytes, scaling each to `[0, 1]`.
    pub fn from_bytes(
        channels: usize,
        height: usize,
        width: usize,
        bytes: &[u8],
        labels: Vec<u8>,
    ) -> Result<Self> {
        let pixels = bytes.iter().map(|&b| f32::from(b) / 255.0).collect();
        Self::new(channels, height, width, pixels, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of features per flattened image.
    pub fn input_dim(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn image(&self, index: usize) -> Option<&[f32]> {
        let dim = self.input_dim();
        self.pixels.get(index * dim..(index + 1) * dim)
    }

    pub fn label(&self, index: usize) -> Option<u8> {
        self.labels.get(index).copied()
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Largest label plus one, or zero for an empty set.
    pub fn class_count(&self) -> usize {
        self.labels.iter().max().map_or(0, |&max| usize::from(max) + 1)
    }

    /// Gather the images at `indices` into one contiguous row-major buffer alongside their labels.
    pub fn gather(&self, indices: &[usize]) -> Result<(Vec<f32>, Vec<u8>)> {
        let mut pixels = Vec::with_capacity(indices.len() * self.input_dim());
        let mut labels = Vec::with_capacity(indices.len());
        for &index in indices {
            let image = self
                .image(index)
                .ok_or_else(|| anyhow!("sample index {index} out of bounds ({})", self.len()))?;
            pixels.extend_from_slice(image);
            labels.push(self.labels[index]);
        }
        Ok((pixels, labels))
    }

    fn concat(parts: Vec<ImageSet>) -> Result<Self> {
        let mut iter = parts.into_iter();
        let mut merged = iter.next().ok_or_else(|| anyhow!("no image sets to merge"))?;
        for part in iter {
            if (part.channels, part.height, part.width)
                != (merged.channels, merged.height, merged.width)
            {
                bail!("cannot merge image sets with different shapes");
            }
            merged.pixels.extend(part.pixels);
            merged.labels.extend(part.labels);
        }
        Ok(merged)
    }
}

/// The train and test halves of a dataset.
#[derive(Clone, Debug)]
pub struct DatasetSplits {
    pub train: ImageSet,
    pub test: ImageSet,
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn check_magic<R: Read>(reader: &mut R, expected: u32) -> Result<()> {
    let magic = read_u32(reader)?;
    if magic != expected {
        bail!("incorrect magic number {magic} != {expected}");
    }
    Ok(())
}

/// Parse an IDX3 image file: returns `(rows, cols, bytes)`.
pub fn parse_idx_images<R: Read>(reader: &mut R) -> Result<(usize, usize, Vec<u8>)> {
    check_magic(reader, IDX_IMAGES_MAGIC)?;
    let samples = read_u32(reader)? as usize;
    let rows = read_u32(reader)? as usize;
    let cols = read_u32(reader)? as usize;
    let total = samples
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| anyhow!("image header {samples}x{rows}x{cols} overflows"))?;
    let data = read_payload(reader, total).context("image payload shorter than its header declares")?;
    Ok((rows, cols, data))
}

pub fn parse_idx_labels<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    check_magic(reader, IDX_LABELS_MAGIC)?;
    let samples = read_u32(reader)? as usize;
    read_payload(reader, samples).context("label payload shorter than its header declares")
}

/// Read exactly `len` bytes, growing the buffer with the data actually present so a corrupt
/// header cannot force a huge allocation.
fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        bail!("expected {len} bytes, found {}", data.len());
    }
    Ok(data)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn read_idx_pair(images: &Path, labels: &Path) -> Result<ImageSet> {
    let (rows, cols, bytes) = parse_idx_images(&mut open(images)?)
        .with_context(|| format!("failed to read images from {}", images.display()))?;
    let labels_data = parse_idx_labels(&mut open(labels)?)
        .with_context(|| format!("failed to read labels from {}", labels.display()))?;
    if bytes.len() != rows * cols * labels_data.len() {
        bail!(
            "{} holds {} images but {} holds {} labels",
            images.display(),
            bytes.len() / (rows * cols).max(1),
            labels.display(),
            labels_data.len()
        );
    }
    ImageSet::from_bytes(1, rows, cols, &bytes, labels_data)
}

/// Load an MNIST-style directory containing the four uncompressed IDX files.
pub fn load_idx_dir(dir: &Path) -> Result<DatasetSplits> {
    let [train_images, train_labels, test_images, test_labels] = IDX_FILES.map(|name| dir.join(name));
    let train = read_idx_pair(&train_images, &train_labels)?;
    let test = read_idx_pair(&test_images, &test_labels)?;
    Ok(DatasetSplits { train, test })
}

/// Parse one CIFAR-10 binary batch. Any number of whole records is accepted.
pub fn parse_cifar_batch<R: Read>(reader: &mut R) -> Result<ImageSet> {
    let mut content = Vec::new();
    reader.read_to_end(&mut content)?;
    let record_len = CIFAR_IMAGE_BYTES + 1;
    if content.len() % record_len != 0 {
        bail!(
            "batch length {} is not a multiple of the {record_len}-byte record size",
            content.len()
        );
    }

    let records = content.len() / record_len;
    let mut labels = Vec::with_capacity(records);
    let mut bytes = Vec::with_capacity(records * CIFAR_IMAGE_BYTES);
    for record in content.chunks_exact(record_len) {
        labels.push(record[0]);
        bytes.extend_from_slice(&record[1..]);
    }
    ImageSet::from_bytes(CIFAR_CHANNELS, CIFAR_SIDE, CIFAR_SIDE, &bytes, labels)
}

fn read_cifar_file(path: &Path) -> Result<ImageSet> {
    parse_cifar_batch(&mut open(path)?)
        .with_context(|| format!("failed to read CIFAR batch {}", path.display()))
}

/// Load the extracted `cifar-10-batches-bin` directory.
pub fn load_cifar10_dir(dir: &Path) -> Result<DatasetSplits> {
    let train_parts = CIFAR_TRAIN_BATCHES
        .iter()
        .map(|name| read_cifar_file(&dir.join(name)))
        .collect::<Result<Vec<_>>>()?;
    let train = ImageSet::concat(train_parts)?;
    let test = read_cifar_file(&dir.join(CIFAR_TEST_BATCH))?;
    Ok(DatasetSplits { train, test })
}
