//! Variable-block ("Dynamic Pool") allocator: a singly-linked list of
//! coalescable blocks, each prefixed by an in-band [`MetaData`] header
//! protected by two canary words.
//!
//! # Layout
//! ```text
//! base                                                    base + capacity
//! [MetaData|payload][MetaData|payload][MetaData|payload] ...
//!  ^-- canary/size/next/end_canary --^
//! ```
//! `next == null` terminates the chain. A header's `canary` is a tri-state
//! tag (`FREE`, `USED`, or damaged) and its `end_canary` is a fixed pattern
//! used only by the recovery walk in [`DynamicPool::restore_damaged_block`]
//! to re-locate header boundaries in raw memory.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{set_last_error, PoolError, PoolResult};
use crate::logging::{self, LogLevel};

/// Leading canary of a free block.
const CANARY_FREE: u32 = 0xFFFE_C0DE;
/// Leading canary of a used block.
const CANARY_USED: u32 = 0xFFFF_C0DE;
/// Fixed tag trailing every well-formed header, used only by the recovery
/// scan to re-locate header boundaries.
const END_CANARY: u64 = 0xC0DE_5005_E695_005E;

/// Smallest payload size the pool will ever hand out. Must be a power of
/// two and at least 8, per the data model.
const MIN_ALLOC_SIZE: usize = 8;
/// Required alignment of every payload pointer and of the pool base.
const ALIGNMENT: usize = 8;

/// In-band block metadata.
///
/// `#[repr(C)]` without packing: on a 64-bit target `canary` (4) + `size`
/// (4) + `next` (8) already sum to a multiple of the pointer's alignment,
/// so the compiler inserts no padding before `end_canary` and the layout
/// matches the wire format described in the data model (`end_canary`
/// exactly 8 bytes past the `canary`/`size`/`next` triple) without resorting
/// to unaligned field access.
#[repr(C)]
struct MetaData {
    canary: u32,
    size: u32,
    next: *mut MetaData,
    end_canary: u64,
}

const HEADER_SIZE: usize = std::mem::size_of::<MetaData>();

const fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) & !(multiple - 1)
}

/// A variable-block memory pool with in-band, canary-protected metadata.
pub struct DynamicPool {
    /// The unaligned allocation returned by the system allocator; retained
    /// only so [`Drop`] can hand the same pointer (and [`Layout`]) back.
    raw: NonNull<u8>,
    raw_layout: Layout,
    /// `raw`, rounded up to an eight-byte boundary; the address of the
    /// first header.
    base: NonNull<u8>,
    /// Usable bytes starting at `base`.
    capacity: usize,
    /// Bytes currently accounted as not-free-for-allocation: the sum of
    /// every header's own size plus the payload size of every block that
    /// is not a single trailing free block's payload.
    used: usize,
}

impl DynamicPool {
    /// Creates a pool with at least `hint` bytes of eventual payload
    /// capacity (before metadata overhead).
    ///
    /// The requested capacity is inflated by 30% to leave room for header
    /// overhead, then rounded up to a multiple of `HEADER_SIZE +
    /// MIN_ALLOC_SIZE`; on overflow, the unscaled `hint` is used instead.
    ///
    /// # Errors
    /// [`PoolError::AllocFailed`] if the system allocator cannot satisfy
    /// the request.
    pub fn try_create(hint: usize) -> PoolResult<Self> {
        set_last_error(None);

        let inflated = hint.checked_mul(13).map(|scaled| scaled / 10);
        let target = inflated.unwrap_or(hint);
        let unit = HEADER_SIZE + MIN_ALLOC_SIZE;
        let final_capacity = round_up(target, unit).max(unit);

        // Layout with align 1 mirrors the source's plain `malloc`, which
        // makes no alignment promise; the pool aligns its own base below.
        let layout = Layout::from_size_align(final_capacity, 1)
            .expect("final_capacity is nonzero and align 1 is always valid");

        // SAFETY: `layout` has a nonzero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(raw) = NonNull::new(raw) else {
            set_last_error(Some(PoolError::AllocFailed));
            logging::log(
                LogLevel::Error,
                format!("pool was not created: system allocator returned null for {final_capacity} bytes"),
            );
            return Err(PoolError::AllocFailed);
        };

        let base_addr = round_up(raw.as_ptr() as usize, ALIGNMENT);
        // SAFETY: `base_addr` is within `[raw, raw + final_capacity)` since
        // the alignment offset is at most `ALIGNMENT - 1` bytes and
        // `final_capacity` is itself a multiple of a power of two `>=
        // ALIGNMENT`.
        let base = NonNull::new(base_addr as *mut u8).expect("nonzero aligned address");
        let capacity = final_capacity - (base_addr - raw.as_ptr() as usize);

        // SAFETY: `base` is eight-byte aligned and `capacity >= HEADER_SIZE`
        // (guaranteed by `unit`'s `.max`), so writing one header there is
        // in-bounds.
        unsafe {
            let header = base.as_ptr().cast::<MetaData>();
            header.write(MetaData {
                canary: CANARY_FREE,
                size: (capacity - HEADER_SIZE) as u32,
                next: std::ptr::null_mut(),
                end_canary: END_CANARY,
            });
        }

        logging::log(
            LogLevel::Info,
            format!("pool created: capacity={capacity} base={base:p}"),
        );

        Ok(DynamicPool { raw, raw_layout: layout, base, capacity, used: HEADER_SIZE })
    }

    /// Bytes currently accounted as allocated (including header overhead).
    pub fn size(&self) -> usize {
        self.used
    }

    /// Total usable byte capacity of the pool, starting at its aligned
    /// base.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn header_at(&self, payload: *mut u8) -> *mut MetaData {
        // SAFETY: callers only pass pointers already checked to sit at
        // least `HEADER_SIZE` bytes past `base`.
        unsafe { payload.sub(HEADER_SIZE).cast::<MetaData>() }
    }

    fn payload_of(header: *mut MetaData) -> *mut u8 {
        // SAFETY: pointer arithmetic only; dereferenced by callers under
        // their own safety obligations.
        unsafe { header.cast::<u8>().add(HEADER_SIZE) }
    }

    fn in_bounds(&self, payload: *mut u8) -> bool {
        let start = self.base_ptr() as usize;
        let end = start + self.capacity;
        let addr = payload as usize;
        addr >= start && addr < end
    }

    /// Scans forward in eight-byte words from `start` (inclusive) for the
    /// fixed `end_canary` tag, accepting the first candidate whose implied
    /// header has a well-formed leading canary.
    ///
    /// Shared by [`DynamicPool::try_alloc`]'s damaged-header resync and by
    /// [`DynamicPool::restore_damaged_block`]'s next-header search: both
    /// are instances of "given an address that ought to be a header but
    /// isn't trustworthy, find the next trustworthy one by end-canary".
    fn scan_forward_for_header(&self, start: *mut u8) -> Option<NonNull<MetaData>> {
        let stop = (self.base_ptr() as usize + self.capacity).saturating_sub(8);
        let mut cursor = start as usize;
        while cursor < stop {
            // SAFETY: `cursor` stays within `[base, base + capacity - 8)`,
            // eight-byte aligned, so reading a `u64` is in-bounds.
            let word = unsafe { (cursor as *const u64).read() };
            if word == END_CANARY {
                let header_addr = cursor.wrapping_sub(HEADER_SIZE - 8);
                if header_addr >= self.base_ptr() as usize {
                    let header = header_addr as *mut MetaData;
                    // SAFETY: `header_addr` is within bounds and aligned.
                    let canary = unsafe { (*header).canary };
                    if canary == CANARY_FREE || canary == CANARY_USED {
                        return NonNull::new(header);
                    }
                }
            }
            cursor += 8;
        }
        None
    }

    /// Scans backward in eight-byte words from `start` (inclusive) for the
    /// fixed `end_canary` tag, symmetric to
    /// [`DynamicPool::scan_forward_for_header`].
    fn scan_backward_for_header(&self, start: *mut u8) -> Option<NonNull<MetaData>> {
        let floor = self.base_ptr() as usize;
        let mut cursor = start as usize;
        while cursor > floor {
            // SAFETY: `cursor` stays within `[base, start]`, eight-byte
            // aligned, so reading a `u64` is in-bounds.
            let word = unsafe { (cursor as *const u64).read() };
            if word == END_CANARY {
                let header_addr = cursor.wrapping_sub(HEADER_SIZE - 8);
                if header_addr >= floor {
                    let header = header_addr as *mut MetaData;
                    // SAFETY: see above.
                    let canary = unsafe { (*header).canary };
                    if canary == CANARY_FREE || canary == CANARY_USED {
                        return NonNull::new(header);
                    }
                }
            }
            cursor -= 8;
        }
        None
    }

    /// Allocates `requested` bytes, rounded up to the minimum/alignment
    /// rules of the data model, using first-fit search with split.
    ///
    /// If the search crosses a header whose canary is neither `FREE` nor
    /// `USED`, the block is skipped (not treated as fatal) and the
    /// last-error shim is left at [`PoolError::BlockDamaged`] even if a
    /// later block satisfies the request — the shim records "a block was
    /// found damaged during this call", independent of whether the call
    /// as a whole succeeded.
    ///
    /// # Errors
    /// [`PoolError::AllocFailed`] if no free block is big enough or the
    /// pool does not have `alloc_size` bytes of headroom at all.
    pub fn try_alloc(&mut self, requested: usize) -> PoolResult<NonNull<u8>> {
        set_last_error(None);

        let alloc_size = MIN_ALLOC_SIZE.max(round_up(requested, ALIGNMENT));
        if alloc_size > self.capacity - self.used {
            set_last_error(Some(PoolError::AllocFailed));
            logging::log(
                LogLevel::Error,
                format!("alloc failed: free={} required={alloc_size}", self.capacity - self.used),
            );
            return Err(PoolError::AllocFailed);
        }

        let mut cursor: *mut MetaData = self.base_ptr().cast();
        let mut damaged_seen = false;
        let found = loop {
            if cursor.is_null() {
                break None;
            }
            // SAFETY: `cursor` is either `base` or a `next` pointer copied
            // from a previously well-formed header, or the result of a
            // successful end-canary resync below — all in-bounds.
            let canary = unsafe { (*cursor).canary };
            if canary == CANARY_FREE && unsafe { (*cursor).size } as usize >= alloc_size {
                break Some(cursor);
            }
            if canary != CANARY_FREE && canary != CANARY_USED {
                damaged_seen = true;
                set_last_error(Some(PoolError::BlockDamaged));
                logging::log(LogLevel::Warn, format!("block damaged at {cursor:p}"));
                let resync_from = Self::payload_of(cursor);
                cursor = match self.scan_forward_for_header(resync_from) {
                    Some(next) => next.as_ptr(),
                    None => std::ptr::null_mut(),
                };
                continue;
            }
            // SAFETY: as above.
            cursor = unsafe { (*cursor).next };
        };

        let Some(found) = found else {
            set_last_error(Some(PoolError::AllocFailed));
            logging::log(LogLevel::Error, format!("pool fragmented: no block for {alloc_size} bytes"));
            return Err(PoolError::AllocFailed);
        };

        // SAFETY: `found` was validated above as a `FREE` header with
        // `size >= alloc_size`, all fields in-bounds.
        unsafe {
            let found_size = (*found).size as usize;
            if found_size >= HEADER_SIZE + alloc_size + MIN_ALLOC_SIZE {
                let new_header = found.cast::<u8>().add(HEADER_SIZE + alloc_size).cast::<MetaData>();
                new_header.write(MetaData {
                    canary: CANARY_FREE,
                    size: (found_size - HEADER_SIZE - alloc_size) as u32,
                    next: (*found).next,
                    end_canary: END_CANARY,
                });
                (*found).size = alloc_size as u32;
                (*found).next = new_header;
                self.used += HEADER_SIZE + alloc_size;
            } else {
                self.used += found_size;
            }
            (*found).canary = CANARY_USED;

            let payload = Self::payload_of(found);
            if damaged_seen {
                logging::log(LogLevel::Info, format!("alloc succeeded at {payload:p} despite damaged neighbor"));
            } else {
                logging::log(LogLevel::Info, format!("allocated {alloc_size} bytes at {payload:p}"));
            }
            Ok(NonNull::new_unchecked(payload))
        }
    }

    /// Like [`DynamicPool::try_alloc`], but on failure with enough raw
    /// headroom, runs [`DynamicPool::coalesce`] once and retries.
    pub fn try_alloc_safe(&mut self, requested: usize) -> PoolResult<NonNull<u8>> {
        match self.try_alloc(requested) {
            Ok(ptr) => Ok(ptr),
            Err(err) => {
                if self.capacity - self.used >= requested {
                    self.coalesce();
                    self.try_alloc(requested)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Releases a previously allocated payload pointer back to the pool.
    ///
    /// If the header's leading canary is damaged, attempts
    /// [`DynamicPool::restore_damaged_block`] first; the free only proceeds
    /// if recovery clears the error.
    ///
    /// # Safety
    /// `payload`, if non-null, must be the exact pointer previously
    /// returned by a `try_alloc*` call on this pool (or any other pointer
    /// the caller wants validated and rejected).
    pub unsafe fn try_free(&mut self, payload: *mut u8) -> PoolResult<()> {
        set_last_error(None);
        if payload.is_null() {
            set_last_error(Some(PoolError::NullPtr));
            return Err(PoolError::NullPtr);
        }
        let aligned = (payload as usize) % ALIGNMENT == 0;
        let has_header_room = (payload as usize) >= self.base_ptr() as usize + HEADER_SIZE;
        if !self.in_bounds(payload) || !aligned || !has_header_room {
            set_last_error(Some(PoolError::InvalidPtr));
            logging::log(LogLevel::Warn, format!("free rejected: invalid pointer {payload:p}"));
            return Err(PoolError::InvalidPtr);
        }

        let header = self.header_at(payload);
        // SAFETY: `payload` is in-bounds and aligned; `header` is
        // `HEADER_SIZE` bytes before it, which is in-bounds because every
        // live payload has a header preceding it.
        let canary = unsafe { (*header).canary };
        if canary != CANARY_FREE && canary != CANARY_USED {
            logging::log(LogLevel::Warn, format!("block damaged at {header:p}, attempting recovery"));
            // SAFETY: delegated safety obligation from this function's
            // contract.
            unsafe { self.restore_damaged_block(payload)? };
        }

        // SAFETY: `header` now has a well-formed `size` field, either
        // because it was already valid or because recovery just rewrote
        // it.
        unsafe {
            (*header).canary = CANARY_FREE;
            self.used = self.used.saturating_sub((*header).size as usize);
        }
        Ok(())
    }

    /// Reconstructs a single header whose leading canary has been
    /// overwritten, from its neighbours, by scanning for the fixed
    /// `end_canary` tag on either side.
    ///
    /// Best-effort and single-block only: a `USED` outcome is deliberate
    /// (the payload was presumably in use when damaged); the predecessor's
    /// `next` pointer is left untouched; two adjacent damaged headers
    /// defeat the scan and surface [`PoolError::InvalidPtr`].
    ///
    /// # Safety
    /// `payload` must be non-null; this function performs its own bounds
    /// and alignment validation before dereferencing anything.
    pub unsafe fn restore_damaged_block(&mut self, payload: *mut u8) -> PoolResult<()> {
        set_last_error(None);
        if payload.is_null() {
            set_last_error(Some(PoolError::NullPtr));
            return Err(PoolError::NullPtr);
        }
        if !self.in_bounds(payload) {
            set_last_error(Some(PoolError::InvalidPtr));
            return Err(PoolError::InvalidPtr);
        }
        if (payload as usize) % ALIGNMENT != 0 {
            set_last_error(Some(PoolError::InvalidPtr));
            return Err(PoolError::InvalidPtr);
        }
        if (payload as usize) < self.base_ptr() as usize + HEADER_SIZE {
            set_last_error(Some(PoolError::InvalidPtr));
            return Err(PoolError::InvalidPtr);
        }

        let header = self.header_at(payload);
        // SAFETY: bounds/alignment validated above.
        let canary = unsafe { (*header).canary };
        if canary == CANARY_FREE || canary == CANARY_USED {
            return Ok(());
        }

        let previous = self.scan_backward_for_header(payload);
        let next = self.scan_forward_for_header(payload);

        match previous {
            Some(prev) => {
                // SAFETY: `prev` was validated by the scan to have a
                // well-formed leading canary and lie within bounds.
                let prev_next = unsafe { (*prev.as_ptr()).next };
                if prev_next != header {
                    set_last_error(Some(PoolError::InvalidPtr));
                    logging::log(LogLevel::Error, format!("recovery failed for {payload:p}: chain mismatch"));
                    return Err(PoolError::InvalidPtr);
                }
            }
            None => {
                if header.cast::<u8>() != self.base_ptr() {
                    set_last_error(Some(PoolError::InvalidPtr));
                    logging::log(LogLevel::Error, format!("recovery failed for {payload:p}: not chain head"));
                    return Err(PoolError::InvalidPtr);
                }
            }
        }

        // SAFETY: `header` is in-bounds (checked above); `next`, if
        // present, was validated by the scan.
        unsafe {
            (*header).canary = CANARY_USED;
            (*header).end_canary = END_CANARY;
            (*header).next = next.map_or(std::ptr::null_mut(), NonNull::as_ptr);
            (*header).size = match next {
                Some(next) => (next.as_ptr() as usize - header as usize - HEADER_SIZE) as u32,
                None => (self.capacity - (header as usize - self.base_ptr() as usize) - HEADER_SIZE) as u32,
            };
        }
        logging::log(LogLevel::Info, format!("block at {payload:p} successfully restored"));
        Ok(())
    }

    /// Resets the pool to a single free block spanning its whole capacity.
    /// Every previously returned payload pointer becomes dangling.
    pub fn clear(&mut self) {
        // SAFETY: `base` always has a valid header-sized region available.
        unsafe {
            let header = self.base_ptr().cast::<MetaData>();
            (*header).canary = CANARY_FREE;
            (*header).size = (self.capacity - HEADER_SIZE) as u32;
            (*header).next = std::ptr::null_mut();
            (*header).end_canary = END_CANARY;
        }
        self.used = HEADER_SIZE;
        logging::log(LogLevel::Info, format!("pool at {:p} cleared", self.base_ptr()));
    }

    /// Merges every run of adjacent free blocks into one, eliminating
    /// fragmentation. Keeps the merging cursor in place after a merge so
    /// three or more consecutive free blocks collapse in a single pass.
    pub fn coalesce(&mut self) {
        let mut merged_any = false;
        let mut a: *mut MetaData = self.base_ptr().cast();
        // SAFETY: `a` starts at `base`, always a valid header.
        let mut b = unsafe { (*a).next };

        while !b.is_null() {
            // SAFETY: both `a` and `b` are links in a chain built entirely
            // from headers this pool itself wrote.
            let (a_canary, b_canary) = unsafe { ((*a).canary, (*b).canary) };
            if a_canary == CANARY_FREE && b_canary == CANARY_FREE {
                unsafe {
                    (*a).next = (*b).next;
                    (*a).size += HEADER_SIZE as u32 + (*b).size;
                    b = (*a).next;
                }
                self.used = self.used.saturating_sub(HEADER_SIZE);
                merged_any = true;
                continue;
            }
            a = b;
            // SAFETY: as above.
            b = unsafe { (*b).next };
        }

        if merged_any {
            logging::log(LogLevel::Info, "pool optimization successful: blocks were merged".to_string());
        } else {
            logging::log(LogLevel::Info, "pool optimization attempted: no adjacent free blocks found".to_string());
        }
    }
}

impl Drop for DynamicPool {
    fn drop(&mut self) {
        logging::log(LogLevel::Info, format!("pool at {:p} destroyed", self.base_ptr()));
        // SAFETY: `raw`/`raw_layout` are exactly the pointer and layout
        // `try_create` obtained from the global allocator, never freed
        // elsewhere.
        unsafe { alloc::dealloc(self.raw.as_ptr(), self.raw_layout) };
    }
}

impl DynamicPool {
    /// Walks the chain from `base`, returning `(block_count, conserved_bytes)`
    /// where `conserved_bytes` is `HEADER_SIZE * block_count + sum(payload
    /// sizes)`. Used only by tests to check the chain-integrity and
    /// conservation invariants.
    #[cfg(test)]
    fn walk_chain(&self) -> (usize, usize) {
        let mut cursor: *mut MetaData = self.base_ptr().cast();
        let mut count = 0usize;
        let mut total = 0usize;
        let mut seen = std::collections::HashSet::new();
        while !cursor.is_null() {
            assert!(seen.insert(cursor as usize), "chain must not revisit a header");
            count += 1;
            unsafe {
                total += HEADER_SIZE + (*cursor).size as usize;
                cursor = (*cursor).next;
            }
        }
        (count, total)
    }

    #[cfg(test)]
    fn is_single_trailing_free_block(&self) -> bool {
        let header: *mut MetaData = self.base_ptr().cast();
        unsafe { (*header).canary == CANARY_FREE && (*header).next.is_null() }
    }
}
