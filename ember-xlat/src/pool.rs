//! Static table-frame pool
//!
//! Table storage is a platform-provided array of 4 KiB frames; the pool
//! hands frames out through a monotonically increasing cursor and never
//! frees them. Frames are addressed by [`TableId`] handles rather than
//! pointers; the raw frame address appears only in the `Table` descriptors
//! and the table-base register, both produced through [`TablePool::table_pa`].
//!
//! The pool runs with the MMU off, so a frame's physical address is its
//! storage address. Entry accesses are volatile: the table walker reads
//! this memory behind the compiler's back once translation is enabled.

use core::ptr;

use crate::address::PA;
use crate::traits::{BuildError, Geometry};
use crate::GRANULE_SIZE;

/// One frame of table storage.
///
/// Frame size and alignment are the granule, which satisfies every
/// per-format table requirement except the 16 KiB short-descriptor root;
/// that one is placed by [`TablePool::alloc_root`] skipping to an aligned
/// frame. Short-descriptor level-2 tables occupy 1 KiB of their frame; the
/// slack is the price of a uniform pool.
#[repr(C, align(4096))]
pub struct TableFrame {
    bytes: [u8; GRANULE_SIZE as usize],
}

impl TableFrame {
    pub const fn new() -> Self {
        Self {
            bytes: [0; GRANULE_SIZE as usize],
        }
    }
}

impl Default for TableFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a pool frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TableId(u16);

impl TableId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Frame arena with a monotonic cursor.
///
/// Borrows its storage so the static allocation stays with the platform;
/// build-time code passes the pool by reference, test code points it at a
/// stack array.
pub struct TablePool<'a> {
    frames: &'a mut [TableFrame],
    next: usize,
}

impl<'a> TablePool<'a> {
    /// Wrap platform table storage.
    pub fn new(frames: &'a mut [TableFrame]) -> Self {
        debug_assert!(frames.len() <= u16::MAX as usize);
        Self { frames, next: 0 }
    }

    /// Number of frames handed out so far.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.next
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Handles to the frames handed out so far, in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = TableId> {
        (0..self.next as u16).map(TableId)
    }

    /// Allocate one zeroed frame for a sub-table.
    pub fn alloc_table(&mut self) -> Result<TableId, BuildError> {
        if self.next == self.frames.len() {
            return Err(BuildError::PoolExhausted);
        }
        let id = TableId(self.next as u16);
        self.next += 1;
        self.zero_frame(id.index());
        Ok(id)
    }

    /// Allocate the root table: `bytes` of contiguous zeroed storage whose
    /// base address satisfies `align`.
    ///
    /// The cursor skips forward to an aligned frame if needed (the frames
    /// burned that way count against capacity, like any other frame).
    pub fn alloc_root(&mut self, bytes: usize, align: u64) -> Result<TableId, BuildError> {
        debug_assert!(align.is_power_of_two());
        let count = bytes.div_ceil(GRANULE_SIZE as usize);

        let mut first = self.next;
        while first < self.frames.len() && !self.frame_pa(first).is_aligned(align) {
            first += 1;
        }
        if first + count > self.frames.len() {
            return Err(BuildError::PoolExhausted);
        }

        self.next = first + count;
        for index in first..self.next {
            self.zero_frame(index);
        }
        Ok(TableId(first as u16))
    }

    /// Storage address of a frame, which is its physical address while the
    /// MMU is off.
    #[inline]
    pub fn table_pa(&self, id: TableId) -> PA {
        self.frame_pa(id.index())
    }

    /// Reverse lookup for the software walker: the allocated frame whose
    /// table address matches `pa`.
    ///
    /// A table descriptor stores at most [`Geometry::PA_BITS_MAX`] address
    /// bits, which can be fewer than the storage address carries, so the
    /// comparison happens under the format's PA-width mask. Both the
    /// stored (truncated) and the full frame address resolve.
    pub fn frame_id<F: Geometry>(&self, pa: PA) -> Option<TableId> {
        let mask = (1u64 << F::PA_BITS_MAX) - 1;
        let wanted = pa.value() & mask;
        (0..self.next as u16)
            .map(TableId)
            .find(|id| self.table_pa(*id).value() & mask == wanted)
    }

    /// Write one entry's raw bits at the format's entry width.
    ///
    /// `table` may be a multi-frame root; `idx` indexes entries from its
    /// first frame.
    pub fn write_entry<F: Geometry>(&mut self, table: TableId, idx: usize, raw: u64) {
        let ptr = self.entry_ptr::<F>(table, idx) as *mut u8;
        match F::ENTRY_BYTES {
            4 => {
                debug_assert!(raw >> 32 == 0);
                // SAFETY: entry_ptr bounds-checked the offset against
                // allocated frames; 4-byte entries are 4-byte aligned.
                unsafe { ptr::write_volatile(ptr as *mut u32, raw as u32) }
            }
            _ => {
                // SAFETY: as above, with 8-byte entries 8-byte aligned.
                unsafe { ptr::write_volatile(ptr as *mut u64, raw) }
            }
        }
    }

    /// Read one entry's raw bits back.
    pub fn read_entry<F: Geometry>(&self, table: TableId, idx: usize) -> u64 {
        let ptr = self.entry_ptr::<F>(table, idx);
        match F::ENTRY_BYTES {
            // SAFETY: see write_entry.
            4 => unsafe { ptr::read_volatile(ptr as *const u32) as u64 },
            _ => unsafe { ptr::read_volatile(ptr as *const u64) },
        }
    }

    /// Raw bytes of one frame, for byte-level comparisons in tests.
    pub fn frame_bytes(&self, id: TableId) -> &[u8; GRANULE_SIZE as usize] {
        debug_assert!(id.index() < self.next);
        &self.frames[id.index()].bytes
    }

    fn entry_ptr<F: Geometry>(&self, table: TableId, idx: usize) -> *const u8 {
        let offset = idx * F::ENTRY_BYTES;
        let frame = table.index() + offset / GRANULE_SIZE as usize;
        debug_assert!(frame < self.next, "entry access outside allocated frames");
        let within = offset % GRANULE_SIZE as usize;
        self.frames[frame].bytes.as_ptr().wrapping_add(within)
    }

    #[inline]
    fn frame_pa(&self, index: usize) -> PA {
        PA::new(&self.frames[index] as *const TableFrame as u64)
    }

    fn zero_frame(&mut self, index: usize) {
        let ptr = self.frames[index].bytes.as_mut_ptr() as *mut u64;
        // SAFETY: a frame is GRANULE_SIZE bytes, 8-byte aligned.
        unsafe {
            ptr::write_bytes(ptr, 0, GRANULE_SIZE as usize / 8);
        }
    }
}
