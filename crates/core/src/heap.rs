//! Heap-object layout
//!
//! Every allocation handed out by `__malloc` is the payload address `p` of a
//! 64-byte-aligned block framed by three sentinels:
//!
//! ```text
//! offset  content
//! -64     MAGIC1
//! -56     capacity in bytes (raw unsigned)
//! -48     MAGIC2
//! -40..-17 reserved zero
//! -16     tagged length
//! -8      type tag
//!  0..N   user payload
//!  N      MAGIC3 (footer)
//! ```
//!
//! The sentinel triple is what `is_heap_pointer` checks; `__free` clears
//! MAGIC1/MAGIC2 so a second free of the same payload is a no-op.

/// First header sentinel, at `p - 64`.
pub const MAGIC1: u64 = 0x54_52_49_58_4E_59_54;
/// Second header sentinel, at `p - 48`.
pub const MAGIC2: u64 = 0x4E_59_54_52_49_58_4E;
/// Footer sentinel, immediately after the payload.
pub const MAGIC3: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Bytes between the block base and the payload pointer.
pub const HEADER_BYTES: usize = 64;
/// Extra bytes a block carries beyond its payload capacity (header + footer pad).
pub const FRAME_BYTES: usize = 128;

/// Header field offsets, relative to the payload pointer.
pub const OFF_MAGIC1: isize = -64;
pub const OFF_CAPACITY: isize = -56;
pub const OFF_MAGIC2: isize = -48;
pub const OFF_LEN: isize = -16;
pub const OFF_TAG: isize = -8;

/// Read an i64 header field at `payload + off`.
///
/// # Safety
/// `payload + off .. payload + off + 8` must be readable. Callers gate this
/// through `probe::addr_readable` or allocator ownership.
#[inline]
pub unsafe fn read_header(payload: i64, off: isize) -> i64 {
    unsafe { ((payload as isize + off) as *const i64).read_unaligned() }
}

/// Write an i64 header field at `payload + off`.
///
/// # Safety
/// Same contract as [`read_header`], plus writability.
#[inline]
pub unsafe fn write_header(payload: i64, off: isize, v: i64) {
    unsafe { ((payload as isize + off) as *mut i64).write_unaligned(v) }
}

/// Capacity in bytes recorded in the header of a valid heap pointer.
///
/// # Safety
/// `payload` must satisfy `is_heap_pointer`.
#[inline]
pub unsafe fn capacity(payload: i64) -> usize {
    unsafe { read_header(payload, OFF_CAPACITY) as u64 as usize }
}

/// The type tag stored at `payload - 8`.
///
/// # Safety
/// The 8 bytes at `payload - 8` must be readable.
#[inline]
pub unsafe fn type_tag(payload: i64) -> i64 {
    unsafe { read_header(payload, OFF_TAG) }
}
