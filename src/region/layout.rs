//! Byte layout of the result region and the release arithmetic.
//!
//! The header is a `repr(C)` struct so the owner and any worker agree on
//! offsets: width, height, claimed byte size, ready flag, origin x/y, then
//! the RGBA pixels start at `HEADER_SIZE`.

use std::mem::{offset_of, size_of};

/// Fixed-size header at the base of every result region
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionHeader {
    pub width: i32,
    pub height: i32,
    /// Bytes of pixel data the worker claims to have written
    pub claimed_len: usize,
    /// Non-zero once `claimed_len` bytes are in place. Kept as a byte so a
    /// hostile worker cannot produce an invalid `bool`.
    pub ready: u8,
    pub origin_x: i32,
    pub origin_y: i32,
}

impl RegionHeader {
    pub fn is_ready(&self) -> bool {
        self.ready != 0
    }
}

pub const HEADER_SIZE: usize = size_of::<RegionHeader>();

pub(crate) const READY_OFFSET: usize = offset_of!(RegionHeader, ready);

/// Four channels, one byte each
pub const BYTES_PER_PIXEL: usize = 4;

/// Pixel byte count for a `width` x `height` RGBA image, if it fits in `usize`
pub fn rgba_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(BYTES_PER_PIXEL)
}

/// Round `len` up to the next multiple of `page_size`
pub fn page_align_up(len: usize, page_size: usize) -> Option<usize> {
    if page_size == 0 {
        return Some(len);
    }
    match len % page_size {
        0 => Some(len),
        rem => len.checked_add(page_size - rem),
    }
}

/// Bytes that can be released from the end of a region of `capacity` bytes
/// once `used` pixel bytes are known to be valid.
///
/// The retained span is `HEADER_SIZE + used`, rounded up to a page boundary
/// measured from the region base. Everything past it up to `capacity` is
/// releasable; if the aligned span already reaches `capacity` nothing is.
pub fn releasable_tail(capacity: usize, used: usize, page_size: usize) -> usize {
    let retained = HEADER_SIZE
        .checked_add(used)
        .and_then(|end| page_align_up(end, page_size));

    match retained {
        Some(end) if end < capacity => capacity - end,
        _ => 0,
    }
}
