//! Register window abstraction
//!
//! All FPGA access goes through [`RegisterWindow`]: bounds- and
//! alignment-checked 32-bit reads and writes with a full fence after every
//! write. [`MmapWindow`] maps the real FPGA device node; the simulator in
//! [`crate::sim`] implements the same trait for tests.
//!
//! Unsafe code is confined to this module: one `mmap`, one `munmap`, and the
//! volatile accessors.

use crate::error::{DriverError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

/// A word-addressable, memory-mapped register region.
///
/// Methods take `&self`: the hardware serialises individual word accesses,
/// and callers that need multi-word atomicity (the command bus) hold their
/// own lock.
pub trait RegisterWindow: Send + Sync {
    /// Size of the window in bytes.
    fn size(&self) -> usize;

    /// Volatile 32-bit read at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] if `offset` is unaligned or out of
    /// bounds.
    fn read_u32(&self, offset: usize) -> Result<u32>;

    /// Volatile 32-bit write at byte `offset`, followed by a full fence.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] if `offset` is unaligned or out of
    /// bounds. Nothing is written in that case.
    fn write_u32(&self, offset: usize, value: u32) -> Result<()>;
}

/// Check that a word access at `offset` fits a window of `size` bytes.
///
/// # Errors
///
/// Returns [`DriverError::Validation`] describing the violation.
pub fn check_word_access(offset: usize, size: usize) -> Result<()> {
    if offset % 4 != 0 {
        return Err(DriverError::validation(format!(
            "unaligned register access at {offset:#x}"
        )));
    }
    if offset.checked_add(4).map_or(true, |end| end > size) {
        return Err(DriverError::validation(format!(
            "register offset {offset:#x} outside window of {size:#x} bytes"
        )));
    }
    Ok(())
}

/// FPGA register window mapped from a device node
#[derive(Debug)]
pub struct MmapWindow {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

impl MmapWindow {
    /// Map `size` bytes of the device node at `path`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The device node does not exist
    /// - It cannot be opened read/write
    /// - `size` is zero or mmap fails
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DriverError::device_not_found(path));
        }
        if size == 0 {
            return Err(DriverError::map_failed("window size is 0"));
        }

        tracing::debug!("Mapping FPGA window: {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DriverError::map_failed(format!("cannot open {}: {e}", path.display())))?;

        // SAFETY: mmap of a device node we just opened read/write.
        // - fd is valid and kept alive in `_file` for the mapping's lifetime
        // - size is non-zero (checked above)
        // - MAP_SHARED so writes reach the FPGA
        // - the returned pointer is only dereferenced through the
        //   bounds-checked accessors below and unmapped in Drop
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(|e| DriverError::map_failed(format!("mmap failed: {e}")))?
        };

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| DriverError::map_failed("mmap returned a null pointer"))?;

        tracing::info!("Mapped FPGA window {} ({size:#x} bytes at {ptr:p})", path.display());

        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Device node backing the mapping
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegisterWindow for MmapWindow {
    fn size(&self) -> usize {
        self.size
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        check_word_access(offset, self.size)?;

        // SAFETY: volatile read from the mapped FPGA window.
        // - offset is 4-aligned and offset + 4 <= size (checked above)
        // - ptr is the base of a live mapping of `size` bytes
        // - the mapping base is page aligned, so the u32 cast is aligned
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("Read u32 @ {offset:#05x} = {value:#010x}");
        Ok(value)
    }

    fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        check_word_access(offset, self.size)?;

        tracing::trace!("Write u32 @ {offset:#05x} = {value:#010x}");

        // SAFETY: volatile write to the mapped FPGA window.
        // - offset is 4-aligned and offset + 4 <= size (checked above)
        // - ptr is the base of a live, writable mapping of `size` bytes
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
        fence(Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MmapWindow {
    fn drop(&mut self) {
        tracing::debug!("Unmapping FPGA window {}", self.path.display());

        // SAFETY: ptr and size are exactly what mmap returned and was given in
        // open(); Drop runs once and no accessor can outlive &self.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: the mapping is process-wide and owned exclusively by this value;
// moving it between threads does not invalidate it.
unsafe impl Send for MmapWindow {}

// SAFETY: every access is a single bounds-checked volatile word operation on
// device memory; no Rust-visible state is mutated through &self. Multi-word
// sequences are serialised by the caller's bus lock.
unsafe impl Sync for MmapWindow {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn access_checks() {
        assert!(check_word_access(0, 16).is_ok());
        assert!(check_word_access(12, 16).is_ok());
        assert!(check_word_access(16, 16).is_err());
        assert!(check_word_access(2, 16).is_err());
        assert!(check_word_access(usize::MAX - 1, 16).is_err());
    }

    #[test]
    fn missing_device_node() {
        let err = MmapWindow::open("/nonexistent/axi_fpga_dev", 0x1200).unwrap_err();
        assert!(matches!(err, DriverError::DeviceNotFound { .. }));
    }

    #[test]
    fn maps_a_regular_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        file.flush().unwrap();

        let window = MmapWindow::open(file.path(), 64).unwrap();
        window.write_u32(8, 0xDEAD_BEEF).unwrap();
        assert_eq!(window.read_u32(8).unwrap(), 0xDEAD_BEEF);
        assert!(window.read_u32(64).is_err());
        assert!(window.write_u32(3, 0).is_err());
    }
}
