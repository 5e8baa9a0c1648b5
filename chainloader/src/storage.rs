//! Payload file access.
//!
//! The loader only needs open, seek-to-end, sequential read and close.
//! Files are read in fixed blocks into a buffer whose start is aligned and
//! whose size is rounded up to [`BUFFER_ALIGN`].

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::config::{BUFFER_ALIGN, READ_BLOCK_SIZE};
use crate::error::{LoadError, StorageError};

/// A read-only file store addressed by path.
pub trait Storage {
    /// Open file handle; closed on drop.
    type File: StorageFile;

    /// Open `path` for reading.
    fn open(&mut self, path: &str) -> Result<Self::File, StorageError>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    type File = S::File;

    fn open(&mut self, path: &str) -> Result<Self::File, StorageError> {
        (**self).open(path)
    }
}

/// An open, readable file.
pub trait StorageFile {
    /// Move to the end of the file and report its size.
    fn seek_end(&mut self) -> Result<usize, StorageError>;

    /// Move back to the start of the file.
    fn rewind(&mut self) -> Result<(), StorageError>;

    /// Read up to `buf.len()` bytes; `Ok(0)` means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError>;
}

/// Heap buffer with aligned start and padded size.
///
/// Released on drop, so every exit path of a load frees it.
pub struct FileBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl FileBuffer {
    /// Allocate a zeroed buffer able to hold `len` bytes.
    pub fn allocate(len: usize) -> Result<Self, LoadError> {
        let padded = len
            .checked_add(BUFFER_ALIGN - 1)
            .map(|n| n & !(BUFFER_ALIGN - 1))
            .ok_or(LoadError::Allocation { size: len })?
            .max(BUFFER_ALIGN);
        let layout = Layout::from_size_align(padded, BUFFER_ALIGN)
            .map_err(|_| LoadError::Allocation { size: padded })?;

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(LoadError::Allocation { size: padded })?;

        Ok(Self { ptr, len, layout })
    }

    /// Number of meaningful bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size including padding.
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// The meaningful bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `layout.size() >= len` initialised bytes.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The meaningful bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for FileBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with exactly this layout.
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Read a whole file into a fresh [`FileBuffer`].
///
/// The file is read in [`READ_BLOCK_SIZE`] blocks. A read that returns no
/// bytes or fails stops the loop; if fewer bytes than the reported size
/// arrived the load fails as truncated.
pub fn read_file<S: Storage>(storage: &mut S, path: &str) -> Result<FileBuffer, LoadError> {
    let mut file = storage.open(path)?;

    let size = file.seek_end()?;
    file.rewind()?;

    let mut buffer = FileBuffer::allocate(size)?;
    let mut done = 0;

    {
        let bytes = buffer.as_mut_slice();
        while done < size {
            let block = READ_BLOCK_SIZE.min(size - done);
            match file.read(&mut bytes[done..done + block]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) => {
                    log::warn!("[Loader] Read of {} failed at {}: {}", path, done, e);
                    break;
                }
            }
        }
    }

    if done != size {
        return Err(StorageError::Truncated {
            expected: size,
            read: done,
        }
        .into());
    }

    log::debug!("[Loader] Read {} bytes from {}", size, path);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemStorage;

    #[test]
    fn test_buffer_alignment_and_padding() {
        let buffer = FileBuffer::allocate(100).unwrap();
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.capacity(), 128);
        assert_eq!(buffer.as_slice().as_ptr() as usize % BUFFER_ALIGN, 0);
    }

    #[test]
    fn test_empty_buffer_still_allocates() {
        let buffer = FileBuffer::allocate(0).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), BUFFER_ALIGN);
    }

    #[test]
    fn test_read_whole_file() {
        let mut storage = MemStorage::new();
        let contents: alloc::vec::Vec<u8> = (0..300_000u32).map(|i| i as u8).collect();
        storage.insert("wiiu/payloads/big/payload.elf", contents.clone());

        let buffer = read_file(&mut storage, "wiiu/payloads/big/payload.elf").unwrap();
        assert_eq!(buffer.as_slice(), contents.as_slice());
        // 300000 bytes need three 128 KB blocks.
        assert_eq!(storage.reads(), 3);
    }

    #[test]
    fn test_missing_file() {
        let mut storage = MemStorage::new();
        let err = read_file(&mut storage, "nope.elf").err().unwrap();
        assert_eq!(err, LoadError::Storage(StorageError::NotFound));
    }

    #[test]
    fn test_truncated_file() {
        let mut storage = MemStorage::new();
        storage.insert_truncated("short.elf", alloc::vec![7u8; 1000], 600);

        let err = read_file(&mut storage, "short.elf").err().unwrap();
        assert_eq!(
            err,
            LoadError::Storage(StorageError::Truncated {
                expected: 1000,
                read: 600
            })
        );
    }
}
