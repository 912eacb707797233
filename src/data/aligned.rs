//! Aligned contiguous float storage for the factor matrices.
//!
//! Factor rows are laid out back to back with a row stride that is a multiple
//! of the SIMD lane count, and the base address is aligned to [`ALIGN_BYTES`].
//! Keeping both properties lets the inner SGD loop run over whole aligned
//! rows and auto-vectorize cleanly.

use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Alignment of the buffer base address and of every row, in bytes.
pub const ALIGN_BYTES: usize = 32;

/// Number of `f32` lanes in one aligned step.
pub const LANES: usize = ALIGN_BYTES / std::mem::size_of::<f32>();

/// Smallest multiple of [`LANES`] that holds `k` columns.
///
/// Always at least one full lane group, so a degenerate `k` still produces an
/// aligned row.
pub fn aligned_dim(k: usize) -> usize {
    k.div_ceil(LANES).max(1) * LANES
}

/// Heap allocation of `f32` aligned to [`ALIGN_BYTES`].
///
/// Dereferences to `[f32]`. Allocation failure is reported as
/// [`Error::Allocation`] rather than aborting.
#[derive(Debug)]
pub struct AlignedBuffer {
    ptr: NonNull<f32>,
    len: usize,
}

// The buffer is plain memory with unique ownership, like Vec<f32>.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed floats.
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len: 0,
            });
        }
        let layout = Self::layout(len)?;
        // SAFETY: layout has non-zero size (len > 0).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        match NonNull::new(raw as *mut f32) {
            Some(ptr) => Ok(Self { ptr, len }),
            None => Err(Error::Allocation {
                bytes: layout.size(),
            }),
        }
    }

    fn layout(len: usize) -> Result<Layout> {
        let bytes = len
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or(Error::Allocation { bytes: usize::MAX })?;
        Layout::from_size_align(bytes, ALIGN_BYTES).map_err(|_| Error::Allocation { bytes })
    }

    /// Number of floats stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no floats.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: ptr covers len initialized floats.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// View as a mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        // SAFETY: ptr covers len initialized floats; &mut self gives uniqueness.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Raw base pointer, for invariant-protected shared access during training.
    #[inline]
    pub(crate) fn as_ptr(&mut self) -> *mut f32 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.len > 0 {
            // SAFETY: allocated with the identical layout in `zeroed`.
            unsafe {
                alloc::dealloc(
                    self.ptr.as_ptr() as *mut u8,
                    Self::layout(self.len).expect("layout was valid at allocation"),
                );
            }
        }
    }
}

impl Clone for AlignedBuffer {
    fn clone(&self) -> Self {
        let mut copy = Self::zeroed(self.len).expect("allocation failed while cloning buffer");
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        copy
    }
}

impl Deref for AlignedBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        self.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_dim() {
        assert_eq!(aligned_dim(1), LANES);
        assert_eq!(aligned_dim(LANES), LANES);
        assert_eq!(aligned_dim(LANES + 1), 2 * LANES);
        assert_eq!(aligned_dim(0), LANES);
    }

    #[test]
    fn test_zeroed_and_alignment() {
        let buf = AlignedBuffer::zeroed(100).unwrap();
        assert_eq!(buf.len(), 100);
        assert!(buf.iter().all(|&x| x == 0.0));
        assert_eq!(buf.as_slice().as_ptr() as usize % ALIGN_BYTES, 0);
    }

    #[test]
    fn test_empty_buffer() {
        let buf = AlignedBuffer::zeroed(0).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.as_slice(), &[] as &[f32]);
    }

    #[test]
    fn test_write_and_clone() {
        let mut buf = AlignedBuffer::zeroed(16).unwrap();
        for (i, x) in buf.iter_mut().enumerate() {
            *x = i as f32;
        }
        let copy = buf.clone();
        assert_eq!(copy.as_slice(), buf.as_slice());
        assert_ne!(copy.as_slice().as_ptr(), buf.as_slice().as_ptr());
    }
}
