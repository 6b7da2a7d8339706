// SPDX-License-Identifier: CEPL-1.0
//! On-disk pipeline cache.
//!
//! Layout (little-endian):
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 4    | magic          |
//! | 4      | 8    | data_size      |
//! | 12     | 8    | data_hash      |
//! | 20     | 4    | vendor_id      |
//! | 24     | 4    | device_id      |
//! | 28     | 4    | driver_version |
//! | 32     | 16   | cache_uuid     |
//! | 48     | n    | payload        |
//!
//! `data_hash` is the first eight bytes of a BLAKE3 digest over every other
//! header field followed by the payload. The payload is the blob the driver
//! returned, stored as-is.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ash::vk;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::DeviceIdentity;
use crate::error::GpuError;
use crate::gpu::Gpu;

pub const MAGIC: u32 = 0x3455_4734;
pub const HEADER_LEN: usize = 48;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("file is shorter than the header")]
    Truncated,
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("header declares {declared} payload bytes, file holds {actual}")]
    LengthMismatch { declared: u64, actual: u64 },
    #[error("payload hash mismatch")]
    HashMismatch,
    #[error("written by a different device or driver")]
    IdentityMismatch,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no pipeline cache at {}", .0.display())]
    NotFound(PathBuf),
    #[error("pipeline cache i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pipeline cache at {} is unusable: {reason}", path.display())]
    Unusable { path: PathBuf, reason: Rejection },
}

fn data_hash(identity: &DeviceIdentity, data_size: u64, payload: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&MAGIC.to_le_bytes());
    hasher.update(&data_size.to_le_bytes());
    hasher.update(&identity.vendor_id.to_le_bytes());
    hasher.update(&identity.device_id.to_le_bytes());
    hasher.update(&identity.driver_version.to_le_bytes());
    hasher.update(&identity.cache_uuid);
    hasher.update(payload);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(head)
}

pub fn encode(identity: &DeviceIdentity, payload: &[u8]) -> Vec<u8> {
    let data_size = payload.len() as u64;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&data_size.to_le_bytes());
    out.extend_from_slice(&data_hash(identity, data_size, payload).to_le_bytes());
    out.extend_from_slice(&identity.vendor_id.to_le_bytes());
    out.extend_from_slice(&identity.device_id.to_le_bytes());
    out.extend_from_slice(&identity.driver_version.to_le_bytes());
    out.extend_from_slice(&identity.cache_uuid);
    out.extend_from_slice(payload);
    out
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(b)
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(b)
}

/// Returns the payload if `bytes` is an intact record written for `identity`.
pub fn decode(bytes: &[u8], identity: &DeviceIdentity) -> Result<Vec<u8>, Rejection> {
    if bytes.len() < HEADER_LEN {
        return Err(Rejection::Truncated);
    }
    let magic = le_u32(bytes, 0);
    if magic != MAGIC {
        return Err(Rejection::BadMagic(magic));
    }
    let declared = le_u64(bytes, 4);
    let payload = &bytes[HEADER_LEN..];
    if declared != payload.len() as u64 {
        return Err(Rejection::LengthMismatch {
            declared,
            actual: payload.len() as u64,
        });
    }
    let mut uuid = [0u8; vk::UUID_SIZE];
    uuid.copy_from_slice(&bytes[32..HEADER_LEN]);
    let stored = DeviceIdentity {
        vendor_id: le_u32(bytes, 20),
        device_id: le_u32(bytes, 24),
        driver_version: le_u32(bytes, 28),
        cache_uuid: uuid,
    };
    if le_u64(bytes, 12) != data_hash(&stored, declared, payload) {
        return Err(Rejection::HashMismatch);
    }
    if stored != *identity {
        return Err(Rejection::IdentityMismatch);
    }
    Ok(payload.to_vec())
}

pub fn load(path: &Path, identity: &DeviceIdentity) -> Result<Vec<u8>, CacheError> {
    let bytes = fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => CacheError::NotFound(path.to_path_buf()),
        _ => CacheError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    decode(&bytes, identity).map_err(|reason| CacheError::Unusable {
        path: path.to_path_buf(),
        reason,
    })
}

/// Writes a fresh record, replacing any previous file and creating parent directories.
pub fn save(path: &Path, identity: &DeviceIdentity, payload: &[u8]) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, encode(identity, payload)).map_err(io_err)
}

/// The live driver cache plus where it is persisted.
pub struct PipelineCache {
    handle: vk::PipelineCache,
    path: PathBuf,
}

impl PipelineCache {
    /// Seeds the driver cache from `path` when the file is usable;
    /// otherwise starts empty. Only the native create call can fail.
    pub fn open<G: Gpu>(gpu: &G, path: &Path) -> Result<Self, GpuError> {
        let seed = match load(path, &gpu.identity()) {
            Ok(data) => {
                info!("pipeline cache: loaded {} bytes from {}", data.len(), path.display());
                data
            }
            Err(CacheError::NotFound(_)) => {
                info!("pipeline cache: none at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => {
                warn!("{e}; starting empty");
                Vec::new()
            }
        };
        let handle = match gpu.create_pipeline_cache(&seed) {
            Ok(handle) => handle,
            Err(e) if !seed.is_empty() => {
                warn!("driver rejected cached pipeline data ({e}); starting empty");
                gpu.create_pipeline_cache(&[])?
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }

    /// Persists the current driver blob. Failures only cost a warm start, so they are logged.
    pub fn flush<G: Gpu>(&self, gpu: &G) {
        let data = match gpu.pipeline_cache_data(self.handle) {
            Ok(data) => data,
            Err(e) => {
                warn!("pipeline cache: {e}; not saved");
                return;
            }
        };
        match save(&self.path, &gpu.identity(), &data) {
            Ok(()) => debug!(
                "pipeline cache: saved {} bytes to {}",
                data.len(),
                self.path.display()
            ),
            Err(e) => warn!("{e}"),
        }
    }

    pub fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_pipeline_cache(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Kind, MockGpu};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x10de,
            device_id: 0x2684,
            driver_version: 0x0222_8000,
            cache_uuid: *b"0123456789abcdef",
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir()
            .join(format!("kiln-cache-test-{}-{n}", std::process::id()))
            .join(name)
    }

    fn blob() -> Vec<u8> {
        (0..=255u8).cycle().take(700).collect()
    }

    #[test]
    fn save_then_load_returns_same_blob() {
        let path = temp_path("nested/dir/cache.bin");
        save(&path, &identity(), &blob()).unwrap();
        assert_eq!(load(&path, &identity()).unwrap(), blob());
        let _ = fs::remove_dir_all(path.parent().unwrap().parent().unwrap());
    }

    #[test]
    fn empty_blob_round_trips() {
        let bytes = encode(&identity(), &[]);
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(decode(&bytes, &identity()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn save_truncates_previous_contents() {
        let path = temp_path("cache.bin");
        save(&path, &identity(), &blob()).unwrap();
        save(&path, &identity(), b"short").unwrap();
        assert_eq!(load(&path, &identity()).unwrap(), b"short");
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN as u64 + 5);
    }

    #[test]
    fn any_single_byte_flip_is_rejected() {
        let good = encode(&identity(), &blob()[..64]);
        for i in 0..good.len() {
            let mut bad = good.clone();
            bad[i] ^= 0x01;
            assert!(
                decode(&bad, &identity()).is_err(),
                "flip at byte {i} went unnoticed"
            );
        }
    }

    #[test]
    fn rejections_are_classified() {
        let good = encode(&identity(), b"payload");
        assert_eq!(decode(&good[..10], &identity()), Err(Rejection::Truncated));

        let mut bad_magic = good.clone();
        bad_magic[0] = 0;
        assert!(matches!(decode(&bad_magic, &identity()), Err(Rejection::BadMagic(_))));

        let mut extra = good.clone();
        extra.push(0);
        assert!(matches!(
            decode(&extra, &identity()),
            Err(Rejection::LengthMismatch { declared: 7, actual: 8 })
        ));

        let mut payload_flip = good;
        *payload_flip.last_mut().unwrap() ^= 0xff;
        assert_eq!(decode(&payload_flip, &identity()), Err(Rejection::HashMismatch));
    }

    #[test]
    fn other_device_never_sees_the_blob() {
        let path = temp_path("cache.bin");
        save(&path, &identity(), &blob()).unwrap();
        let others = [
            DeviceIdentity { vendor_id: 0x1002, ..identity() },
            DeviceIdentity { device_id: 1, ..identity() },
            DeviceIdentity { driver_version: 1, ..identity() },
            DeviceIdentity { cache_uuid: [7; 16], ..identity() },
        ];
        for other in others {
            match load(&path, &other) {
                Err(CacheError::Unusable { reason, .. }) => {
                    assert_eq!(reason, Rejection::IdentityMismatch)
                }
                r => panic!("expected identity rejection, got {r:?}"),
            }
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let path = temp_path("absent.bin");
        assert!(matches!(
            load(&path, &identity()),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn open_falls_back_to_empty_on_corrupt_file() {
        let gpu = MockGpu::new();
        let path = temp_path("cache.bin");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"definitely not a cache").unwrap();

        let cache = PipelineCache::open(&gpu, &path).unwrap();
        assert_eq!(gpu.state().borrow().cache_seed_lengths, vec![0]);
        cache.destroy(&gpu);
        assert_eq!(gpu.state().borrow().live(Kind::PipelineCache), 0);
    }

    #[test]
    fn flush_then_open_seeds_driver_with_saved_blob() {
        let gpu = MockGpu::new();
        gpu.state().borrow_mut().cache_data = blob();
        let path = temp_path("cache.bin");

        let cache = PipelineCache::open(&gpu, &path).unwrap();
        cache.flush(&gpu);
        cache.destroy(&gpu);

        let reopened = PipelineCache::open(&gpu, &path).unwrap();
        assert_eq!(gpu.state().borrow().cache_seed_lengths, vec![0, blob().len()]);
        reopened.destroy(&gpu);
    }
}
