//! Result region: the shared mapping a worker publishes its image into.
//!
//! The region is an anonymous `MAP_SHARED` mapping created by the owner
//! before fork, so parent and worker see the same pages. It is written only
//! by the worker and read only by the owner after the worker has been
//! reaped; process exit is the synchronisation point.

pub mod layout;

pub use layout::{
    page_align_up, releasable_tail, rgba_len, RegionHeader, BYTES_PER_PIXEL, HEADER_SIZE,
};

use crate::config::types::{ImgboxError, Result};
use layout::READY_OFFSET;
use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use std::num::NonZeroUsize;
use std::ptr::{self, NonNull};

/// System page size, falling back to 4 KiB if sysconf cannot report it
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Fixed-capacity shared mapping holding a `RegionHeader` and RGBA pixels
#[derive(Debug)]
pub struct ResultRegion {
    base: NonNull<u8>,
    capacity: usize,
}

// SAFETY: the mapping is exclusively owned by this value; nothing else in
// the owner process holds a pointer into it.
unsafe impl Send for ResultRegion {}

impl ResultRegion {
    /// Map a new zero-filled region of `capacity` bytes
    pub fn allocate(capacity: usize) -> Result<Self> {
        if capacity <= HEADER_SIZE {
            return Err(ImgboxError::Allocation(format!(
                "capacity {} does not exceed header size {}",
                capacity, HEADER_SIZE
            )));
        }
        let length = NonZeroUsize::new(capacity)
            .ok_or_else(|| ImgboxError::Allocation("zero-length region".to_string()))?;

        // SAFETY: anonymous mapping at a kernel-chosen address; no existing
        // memory is aliased.
        let addr = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(|e| ImgboxError::Allocation(format!("mmap({} bytes): {}", capacity, e)))?;

        let mut region = Self {
            base: addr.cast::<u8>(),
            capacity,
        };
        // Anonymous pages are already zero; make the header state explicit.
        region.write_header(RegionHeader::default());
        log::debug!("Mapped result region: {} bytes", capacity);
        Ok(region)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes available for pixel data after the header
    pub fn payload_capacity(&self) -> usize {
        self.capacity.saturating_sub(HEADER_SIZE)
    }

    /// Snapshot of the header as currently stored in the mapping
    pub fn header(&self) -> RegionHeader {
        // SAFETY: base is page aligned and the mapping is at least
        // HEADER_SIZE bytes. Every byte pattern is a valid RegionHeader.
        unsafe { ptr::read_volatile(self.base.as_ptr() as *const RegionHeader) }
    }

    pub fn claimed_len(&self) -> usize {
        self.header().claimed_len
    }

    pub fn is_ready(&self) -> bool {
        self.header().is_ready()
    }

    /// Whether the worker's claim fits the payload area
    pub fn claim_fits(&self) -> bool {
        self.claimed_len() <= self.payload_capacity()
    }

    /// The claimed pixel bytes, or `None` if the claim does not fit
    pub fn pixels(&self) -> Option<&[u8]> {
        let claimed = self.claimed_len();
        if claimed > self.payload_capacity() {
            return None;
        }
        // SAFETY: HEADER_SIZE + claimed <= capacity, checked above.
        Some(unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(HEADER_SIZE), claimed) })
    }

    pub(crate) fn write_header(&mut self, header: RegionHeader) {
        // SAFETY: see `header`.
        unsafe { ptr::write_volatile(self.base.as_ptr() as *mut RegionHeader, header) }
    }

    /// Zero the origin fields left behind by a worker
    pub(crate) fn reset_origin(&mut self) {
        let mut header = self.header();
        header.origin_x = 0;
        header.origin_y = 0;
        self.write_header(header);
    }

    /// Worker side: copy `pixels` in, fill the header, then raise the ready
    /// flag. Nothing is written if the image does not fit.
    pub(crate) fn publish(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        let available = self.payload_capacity();
        if pixels.len() > available {
            return Err(ImgboxError::Oversize {
                claimed: pixels.len(),
                available,
            });
        }
        let (width, height) = match (i32::try_from(width), i32::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(ImgboxError::Decode(format!(
                    "dimensions {}x{} exceed header range",
                    width, height
                )))
            }
        };

        // SAFETY: pixels.len() <= capacity - HEADER_SIZE, checked above;
        // the source is a separate allocation.
        unsafe {
            ptr::copy_nonoverlapping(
                pixels.as_ptr(),
                self.base.as_ptr().add(HEADER_SIZE),
                pixels.len(),
            );
        }

        self.write_header(RegionHeader {
            width,
            height,
            claimed_len: pixels.len(),
            ready: 0,
            origin_x: 0,
            origin_y: 0,
        });
        // Ready goes last: the full claimed buffer is already in place.
        // SAFETY: READY_OFFSET lies inside the header.
        unsafe { ptr::write_volatile(self.base.as_ptr().add(READY_OFFSET), 1u8) };
        Ok(())
    }

    /// Release pages beyond the page-aligned end of header + claimed pixels.
    ///
    /// Returns the number of bytes released. If the kernel refuses the
    /// partial unmap the capacity is left unchanged and 0 is returned.
    pub(crate) fn release_unused(&mut self, page_size: usize) -> usize {
        let tail = releasable_tail(self.capacity, self.claimed_len(), page_size);
        if tail == 0 {
            return 0;
        }
        let keep = self.capacity - tail;

        // SAFETY: keep < capacity, so the pointer stays inside the mapping.
        let tail_start = unsafe { self.base.as_ptr().add(keep) };
        let Some(tail_ptr) = NonNull::new(tail_start as *mut libc::c_void) else {
            return 0;
        };

        // SAFETY: [keep, capacity) is page aligned and belongs to this mapping;
        // nothing references it after this point.
        match unsafe { munmap(tail_ptr, tail) } {
            Ok(()) => {
                self.capacity = keep;
                tail
            }
            Err(e) => {
                log::debug!("Could not release {} unused region bytes: {}", tail, e);
                0
            }
        }
    }
}

impl Drop for ResultRegion {
    fn drop(&mut self) {
        if self.capacity == 0 {
            return;
        }
        // SAFETY: base/capacity describe exactly the pages still mapped.
        if let Err(e) = unsafe { munmap(self.base.cast(), self.capacity) } {
            log::warn!("munmap of result region failed: {}", e);
        }
        self.capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn allocate_zero_fills_header() {
        let region = ResultRegion::allocate(MB).unwrap();
        assert_eq!(region.capacity(), MB);
        assert_eq!(region.header(), RegionHeader::default());
        assert!(!region.is_ready());
        assert_eq!(region.pixels(), Some(&[][..]));
    }

    #[test]
    fn allocate_rejects_header_sized_capacity() {
        assert!(matches!(
            ResultRegion::allocate(HEADER_SIZE),
            Err(ImgboxError::Allocation(_))
        ));
        assert!(ResultRegion::allocate(0).is_err());
    }

    #[test]
    fn publish_writes_pixels_then_ready() {
        let mut region = ResultRegion::allocate(MB).unwrap();
        let pixels: Vec<u8> = (0..2 * 3 * 4).map(|b| b as u8).collect();
        region.publish(2, 3, &pixels).unwrap();

        let header = region.header();
        assert_eq!((header.width, header.height), (2, 3));
        assert_eq!(header.claimed_len, 24);
        assert!(header.is_ready());
        assert_eq!(region.pixels().unwrap(), &pixels[..]);
    }

    #[test]
    fn publish_refuses_oversize_image() {
        let mut region = ResultRegion::allocate(page_size()).unwrap();
        let pixels = vec![0xffu8; page_size()];
        let err = region.publish(32, 32, &pixels).unwrap_err();
        assert!(matches!(err, ImgboxError::Oversize { .. }));
        assert!(!region.is_ready());
        assert_eq!(region.claimed_len(), 0);
    }

    #[test]
    fn pixels_hidden_when_claim_exceeds_payload() {
        let mut region = ResultRegion::allocate(MB).unwrap();
        region.write_header(RegionHeader {
            claimed_len: MB,
            ready: 1,
            ..Default::default()
        });
        assert!(!region.claim_fits());
        assert!(region.pixels().is_none());
    }

    #[test]
    fn release_unused_shrinks_to_page_boundary() {
        let page = page_size();
        let mut region = ResultRegion::allocate(8 * MB).unwrap();
        let pixels = vec![7u8; 100 * 100 * 4];
        region.publish(100, 100, &pixels).unwrap();

        let released = region.release_unused(page);
        let retained = page_align_up(HEADER_SIZE + pixels.len(), page).unwrap();
        assert_eq!(released, 8 * MB - retained);
        assert_eq!(region.capacity(), retained);
        // Retained pages remain readable.
        assert_eq!(region.pixels().unwrap(), &pixels[..]);
        assert_eq!(region.release_unused(page), 0);
    }

    #[test]
    fn reset_origin_clears_offsets_only() {
        let mut region = ResultRegion::allocate(MB).unwrap();
        region.write_header(RegionHeader {
            width: 5,
            height: 6,
            claimed_len: 120,
            ready: 1,
            origin_x: 11,
            origin_y: -4,
        });
        region.reset_origin();
        let header = region.header();
        assert_eq!((header.origin_x, header.origin_y), (0, 0));
        assert_eq!((header.width, header.height, header.claimed_len), (5, 6, 120));
    }
}
