// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The shared-memory byte ring (§6 "Shared-memory IPC"): a 32-byte header
//! (spin-mutex word, write-offset, read-offset, capacity) followed by a
//! fixed-size circular buffer, mapped into both the parent and the child's
//! address space under the same path. Framing is left to the caller — a
//! ring only ever moves raw bytes, exactly as a `TcpStream` does for
//! `factory_socket::Connection`, so the same [`wire::FrameDecoder`]
//! discipline decodes whatever a ring yields.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;

/// Bytes occupied by the fixed header preceding the ring data.
pub const HEADER_LEN: usize = 32;

const LOCK_OFFSET: usize = 0;
const WRITE_OFFSET: usize = 8;
const READ_OFFSET: usize = 16;
const CAPACITY_OFFSET: usize = 24;

/// Errors creating or operating a [`SharedRing`].
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("ring has no room for {requested} bytes (capacity {capacity})")]
    TooLarge { requested: usize, capacity: usize },
}

/// One named shared-memory segment, either end of which can be mapped by a
/// different process. `create` and `open` both produce the same type;
/// which side initialises the header is the only difference.
pub struct SharedRing {
    mmap: MmapMut,
    path: PathBuf,
    capacity: u64,
}

impl SharedRing {
    /// Create a fresh ring at `path` with `capacity` bytes of payload
    /// space, zeroing the header. Called by whichever side owns the
    /// segment's lifetime — in this crate, always the parent process
    /// before it spawns the child.
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> Result<Self, RingError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len((HEADER_LEN + capacity) as u64)?;
        // SAFETY: `file` was just created/truncated by this process and no
        // other process can have mapped it yet at this path.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap[CAPACITY_OFFSET..CAPACITY_OFFSET + 8].copy_from_slice(&(capacity as u64).to_ne_bytes());
        Ok(Self {
            mmap,
            path,
            capacity: capacity as u64,
        })
    }

    /// Map an existing ring created by the other side. The child reads
    /// `capacity` back out of the header rather than being told it
    /// separately, so the two ends can never disagree about layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RingError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        // SAFETY: the segment was already sized and header-initialised by
        // `create` before this process could have been told `path`.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let capacity = u64::from_ne_bytes(
            mmap[CAPACITY_OFFSET..CAPACITY_OFFSET + 8]
                .try_into()
                .expect("8-byte slice"),
        );
        Ok(Self { mmap, path, capacity })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn atomic(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: `offset` is one of the three word-aligned header fields
        // and the mapping is large enough by construction (`create`
        // reserves `HEADER_LEN` bytes up front); the pointer is valid for
        // the lifetime of `self.mmap` and accessed only through atomics on
        // both sides of the mapping, so no data race occurs even though
        // both processes hold writable pointers into the same page.
        unsafe { AtomicU64::from_ptr(self.mmap.as_ptr().add(offset).cast_mut().cast()) }
    }

    fn lock(&self) {
        while self
            .atomic(LOCK_OFFSET)
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.atomic(LOCK_OFFSET).store(0, Ordering::Release);
    }

    /// Append `data` to the ring if it fits in the space not yet consumed
    /// by the reader. Never partially writes: either all of `data` is
    /// queued or none of it is.
    pub fn push(&self, data: &[u8]) -> Result<(), RingError> {
        if data.len() as u64 > self.capacity {
            return Err(RingError::TooLarge {
                requested: data.len(),
                capacity: self.capacity as usize,
            });
        }
        self.lock();
        let write_off = self.atomic(WRITE_OFFSET).load(Ordering::Relaxed);
        let read_off = self.atomic(READ_OFFSET).load(Ordering::Relaxed);
        let used = write_off - read_off;
        let free = self.capacity - used;
        if data.len() as u64 > free {
            self.unlock();
            return Err(RingError::TooLarge {
                requested: data.len(),
                capacity: free as usize,
            });
        }
        self.write_wrapping(write_off, data);
        self.atomic(WRITE_OFFSET).store(write_off + data.len() as u64, Ordering::Relaxed);
        self.unlock();
        Ok(())
    }

    /// Drain every byte currently buffered, advancing the read cursor.
    /// Returns an empty vector when nothing is available.
    #[must_use]
    pub fn pop_all(&self) -> Vec<u8> {
        self.lock();
        let write_off = self.atomic(WRITE_OFFSET).load(Ordering::Relaxed);
        let read_off = self.atomic(READ_OFFSET).load(Ordering::Relaxed);
        let used = (write_off - read_off) as usize;
        let out = self.read_wrapping(read_off, used);
        self.atomic(READ_OFFSET).store(write_off, Ordering::Relaxed);
        self.unlock();
        out
    }

    fn write_wrapping(&self, from: u64, data: &[u8]) {
        let cap = self.capacity as usize;
        let start = (from % self.capacity) as usize;
        let ring = &mut self.mmap_ring_mut()[..];
        let first = (cap - start).min(data.len());
        ring[start..start + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            ring[..data.len() - first].copy_from_slice(&data[first..]);
        }
    }

    fn read_wrapping(&self, from: u64, len: usize) -> Vec<u8> {
        let cap = self.capacity as usize;
        let start = (from % self.capacity) as usize;
        let ring = self.mmap_ring();
        let mut out = Vec::with_capacity(len);
        let first = (cap - start).min(len);
        out.extend_from_slice(&ring[start..start + first]);
        if first < len {
            out.extend_from_slice(&ring[..len - first]);
        }
        out
    }

    fn mmap_ring(&self) -> &[u8] {
        &self.mmap[HEADER_LEN..]
    }

    #[allow(clippy::mut_from_ref)]
    fn mmap_ring_mut(&self) -> &mut [u8] {
        // SAFETY: writers and readers only ever touch the ring body while
        // holding the spin-lock, so this is the sole live mutable borrow
        // of the region for the duration of a `push`.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.mmap.as_ptr().add(HEADER_LEN).cast_mut(),
                self.mmap.len() - HEADER_LEN,
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("factory-ipc-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn push_then_pop_round_trips() {
        let path = tmp_path("roundtrip");
        let ring = SharedRing::create(&path, 64).unwrap();
        ring.push(b"hello").unwrap();
        ring.push(b" world").unwrap();
        assert_eq!(ring.pop_all(), b"hello world".to_vec());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_reads_back_capacity_from_header() {
        let path = tmp_path("capacity");
        let created = SharedRing::create(&path, 128).unwrap();
        drop(created);
        let opened = SharedRing::open(&path).unwrap();
        assert_eq!(opened.capacity, 128);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn oversize_push_is_rejected_without_partial_write() {
        let path = tmp_path("oversize");
        let ring = SharedRing::create(&path, 8).unwrap();
        assert!(ring.push(b"way too long for this ring").is_err());
        assert!(ring.pop_all().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn writes_wrap_around_the_end_of_the_buffer() {
        let path = tmp_path("wrap");
        let ring = SharedRing::create(&path, 8).unwrap();
        ring.push(b"abcd").unwrap();
        assert_eq!(ring.pop_all(), b"abcd".to_vec());
        ring.push(b"efgh").unwrap();
        assert_eq!(ring.pop_all(), b"efgh".to_vec());
        ring.push(b"ijklmnop").unwrap();
        assert_eq!(ring.pop_all(), b"ijklmnop".to_vec());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn shared_across_two_mappings_of_the_same_path() {
        let path = tmp_path("shared");
        let writer = SharedRing::create(&path, 32).unwrap();
        let reader = SharedRing::open(&path).unwrap();
        writer.push(b"ping").unwrap();
        assert_eq!(reader.pop_all(), b"ping".to_vec());
        let _ = std::fs::remove_file(&path);
    }
}
