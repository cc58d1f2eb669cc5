use std::{
    fs::{self, File},
    io::{self, BufWriter, Read},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::info;
use mlpbench_core::{cifar10_files, IDX_FILES};

const FMNIST_BASE_URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com";
const CIFAR10_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
pub const CIFAR10_EXTRACTED_DIR: &str = "cifar-10-batches-bin";

/// Download and decompress whichever FashionMNIST IDX files are missing from `dir`.
/// Returns whether anything was fetched.
pub fn ensure_fmnist(dir: &Path) -> Result<bool> {
    let missing: Vec<&str> = IDX_FILES
        .into_iter()
        .filter(|name| !dir.join(name).is_file())
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }

    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for name in missing {
        let url = format!("{FMNIST_BASE_URL}/{name}.gz");
        gunzip_into(fetch(&url)?, &dir.join(name))
            .with_context(|| format!("failed to decompress {url}"))?;
    }
    Ok(true)
}

/// Download and unpack the CIFAR-10 binary archive into `root` unless
/// `root/cifar-10-batches-bin` already holds every batch. Returns whether anything was fetched.
pub fn ensure_cifar10(root: &Path) -> Result<bool> {
    let extracted = root.join(CIFAR10_EXTRACTED_DIR);
    if cifar10_files().all(|name| extracted.join(name).is_file()) {
        return Ok(false);
    }

    fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))?;
    unpack_tar_gz(fetch(CIFAR10_URL)?, root)
        .with_context(|| format!("failed to unpack {CIFAR10_URL}"))?;
    Ok(true)
}

fn fetch(url: &str) -> Result<impl Read> {
    info!("downloading {url}");
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;
    Ok(response.into_reader())
}

/// Decompress a gzip stream to `target`. The file only appears once it is complete.
fn gunzip_into<R: Read>(source: R, target: &Path) -> Result<()> {
    let partial = target.with_extension("part");
    {
        let mut writer = BufWriter::new(File::create(&partial)?);
        io::copy(&mut GzDecoder::new(source), &mut writer)?;
    }
    fs::rename(&partial, target)?;
    info!("extracted {}", target.display());
    Ok(())
}

fn unpack_tar_gz<R: Read>(source: R, root: &Path) -> Result<()> {
    tar::Archive::new(GzDecoder::new(source)).unpack(root)?;
    info!("extracted archive into {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    use super::*;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn present_idx_files_skip_the_download() {
        let dir = tempfile::tempdir().unwrap();
        for name in IDX_FILES {
            fs::write(dir.path().join(name), b"idx").unwrap();
        }
        assert!(!ensure_fmnist(dir.path()).unwrap());
    }

    #[test]
    fn present_cifar_batches_skip_the_download() {
        let dir = tempfile::tempdir().unwrap();
        let extracted = dir.path().join(CIFAR10_EXTRACTED_DIR);
        fs::create_dir_all(&extracted).unwrap();
        for name in cifar10_files() {
            fs::write(extracted.join(name), b"").unwrap();
        }
        assert!(!ensure_cifar10(dir.path()).unwrap());
    }

    #[test]
    fn gunzip_writes_complete_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("train-labels-idx1-ubyte");

        gunzip_into(gzip(b"label bytes").as_slice(), &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"label bytes");
        assert!(!target.with_extension("part").exists());
    }

    #[test]
    fn corrupt_gzip_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("t10k-images-idx3-ubyte");

        assert!(gunzip_into(&b"not gzip"[..], &target).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn archive_unpacks_into_batch_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        for name in cifar10_files() {
            let payload = name.as_bytes();
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{CIFAR10_EXTRACTED_DIR}/{name}"), payload)
                .unwrap();
        }
        let archive = gzip(&builder.into_inner().unwrap());

        unpack_tar_gz(archive.as_slice(), dir.path()).unwrap();
        let extracted = dir.path().join(CIFAR10_EXTRACTED_DIR);
        assert_eq!(fs::read(extracted.join("test_batch.bin")).unwrap(), b"test_batch.bin");
        assert!(!ensure_cifar10(dir.path()).unwrap());
    }
}
