//! Memory-mapped file handling for binary output.
//!
//! This module provides the [`crate::cilassembly::write::output::Output`] type for managing
//! memory-mapped files during binary generation.
//!
//! # Architecture
//!
//! ## Atomic Operations
//! The image is written to a temporary sibling of the target and moved over the target on
//! [`Output::finalize`], so an interrupted run never leaves a half-written library behind.
//! An [`Output`] dropped without finalization removes its temporary file.
//!
//! ## Memory Mapping
//! The output is mapped once at its final size; all writes are bounds-checked random
//! access into the mapping.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use crate::cilassembly::write::output::Output;
//!
//! let mut output = Output::create("output.dll", 4096)?;
//! output.write_at(0, b"MZ")?;
//! output.write_u32_le_at(100, 0x12345678)?;
//! output.finalize()?;
//! ```

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A memory-mapped output file that replaces its target on finalization.
pub struct Output {
    /// The mapping, `None` once released
    mmap: Option<MmapMut>,

    /// The file the mapping is backed by
    temp_path: PathBuf,

    /// The file being produced
    target_path: PathBuf,

    /// Whether the file has been moved into place
    finalized: bool,
}

impl Output {
    /// Creates a new memory-mapped output file of `size` bytes.
    ///
    /// The mapping is backed by `<target>.rvexport.tmp` next to the target.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();
        let mut temp_name = target_path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".rvexport.tmp");
        let temp_path = target_path.with_file_name(temp_name);

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.set_len(size)?;

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(Self {
            mmap: Some(mmap),
            temp_path,
            target_path,
            finalized: false,
        })
    }

    /// The whole mapping.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or_default()
    }

    /// The whole mapping, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.mmap.as_deref_mut().unwrap_or_default()
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteLayout`] if the write would exceed the file.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let size = self.size();
        let start = offset as usize;
        match start.checked_add(data.len()) {
            Some(end) if end as u64 <= size => {
                self.as_mut_slice()[start..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(Error::WriteLayout(format!(
                "write of {} bytes at 0x{:X} exceeds the output size 0x{:X}",
                data.len(),
                offset,
                size
            ))),
        }
    }

    /// Fills `len` bytes at `offset` with zeros.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteLayout`] if the range exceeds the file.
    pub fn zero_range(&mut self, offset: u64, len: usize) -> Result<()> {
        self.write_at(offset, &vec![0; len])
    }

    /// Writes a little-endian `u16` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteLayout`] if the write would exceed the file.
    pub fn write_u16_le_at(&mut self, offset: u64, value: u16) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Writes a little-endian `u32` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteLayout`] if the write would exceed the file.
    pub fn write_u32_le_at(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Size of the mapping.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.as_slice().len() as u64
    }

    /// Flushes pending writes to disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        Ok(())
    }

    /// Flushes the mapping, releases it and moves the file over the target.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if flushing or renaming fails.
    pub fn finalize(mut self) -> Result<()> {
        self.flush()?;
        // the mapping must be gone before the file can be renamed on Windows
        drop(self.mmap.take());

        std::fs::rename(&self.temp_path, &self.target_path)?;
        self.finalized = true;
        Ok(())
    }

    /// The file being produced.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            drop(self.mmap.take());
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_operations() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("out.bin");

        let mut output = Output::create(&target, 16).unwrap();
        output.write_at(0, b"MZ").unwrap();
        output.write_u16_le_at(2, 0x1234).unwrap();
        output.write_u32_le_at(4, 0x1234_5678).unwrap();
        output.zero_range(2, 2).unwrap();

        assert_eq!(&output.as_slice()[..8], &[b'M', b'Z', 0, 0, 0x78, 0x56, 0x34, 0x12]);
        assert!(!target.exists());

        output.finalize().unwrap();
        let written = std::fs::read(&target).unwrap();
        assert_eq!(written.len(), 16);
        assert_eq!(&written[..2], b"MZ");
    }

    #[test]
    fn test_finalization_replaces_target() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("lib.dll");
        std::fs::write(&target, b"old contents").unwrap();

        let mut output = Output::create(&target, 4).unwrap();
        output.write_at(0, b"new!").unwrap();
        output.finalize().unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new!");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_drop_without_finalize() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("lib.dll");
        std::fs::write(&target, b"old contents").unwrap();

        {
            let mut output = Output::create(&target, 4).unwrap();
            output.write_at(0, b"new!").unwrap();
        }

        assert_eq!(std::fs::read(&target).unwrap(), b"old contents");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_bounds_checking() {
        let temp_dir = tempdir().unwrap();
        let mut output = Output::create(temp_dir.path().join("out.bin"), 8).unwrap();

        assert!(output.write_at(6, b"abc").is_err());
        assert!(output.write_u32_le_at(8, 1).is_err());
        assert!(output.write_at(5, b"abc").is_ok());
    }
}
