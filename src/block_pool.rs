//! Fixed-block ("Block Pool") allocator: an arena of equal-size slots with
//! O(1) allocation backed by a one-slot free hint.
//!
//! # Layout
//! ```text
//! slot 0           slot 1           slot 2
//! [flag|pad|data] [flag|pad|data] [flag|pad|data] ...
//! ^--- stride ---^
//! ```
//! Each slot is `stride` bytes: one busy-flag byte, enough padding to push
//! the payload onto an eight-byte boundary, and the payload itself. The
//! pointer handed to callers addresses the payload; subtracting
//! [`PAYLOAD_OFFSET`] recovers the flag byte.

use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::error::{last_error, set_last_error, PoolError, PoolResult};

/// Bytes reserved at the front of every slot for the busy flag and
/// alignment padding. Fixed, per the data model: alignment is always eight
/// bytes and is not configurable.
const PAYLOAD_OFFSET: usize = 8;

const fn round_up_to_8(value: usize) -> usize {
    (value + 7) & !7
}

/// A fixed-size-slot memory pool.
///
/// `BlockPool` owns a single contiguous byte slab sized `capacity * stride`.
/// It hands out slots one at a time and reclaims them on `free`; a
/// last-freed-slot hint makes the common alloc-after-free pattern O(1)
/// without giving up the correctness of a full linear scan as a fallback.
pub struct BlockPool {
    slab: Box<[MaybeUninit<u8>]>,
    capacity: usize,
    stride: usize,
    live: usize,
    /// Offset (from the start of the slab) of the last slot freed, if its
    /// flag byte has not since been reclaimed by a later `alloc`.
    last_freed: Option<usize>,
}

impl BlockPool {
    /// Creates a pool of `capacity` slots, each large enough to hold
    /// `payload_size` bytes aligned to eight bytes.
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidArgs`] if either argument is zero, or
    /// [`PoolError::AllocFailed`] if `capacity * stride` overflows `usize`
    /// (the allocation this pool would need cannot even be sized, let alone
    /// satisfied).
    pub fn try_create(capacity: usize, payload_size: usize) -> PoolResult<Self> {
        set_last_error(None);
        if capacity == 0 || payload_size == 0 {
            set_last_error(Some(PoolError::InvalidArgs));
            return Err(PoolError::InvalidArgs);
        }

        let stride = round_up_to_8(payload_size) + PAYLOAD_OFFSET;
        debug_assert!(stride >= 8 && stride % 8 == 0);

        // `capacity * stride` zeroed bytes: every flag byte starts at 0
        // (free), matching the source's `calloc`, whose own overflow check
        // fails the same way: a null return handled as `ALLOC_FAILED`, not
        // a crash.
        let Some(total) = capacity.checked_mul(stride) else {
            set_last_error(Some(PoolError::AllocFailed));
            return Err(PoolError::AllocFailed);
        };
        let slab = vec![MaybeUninit::new(0u8); total].into_boxed_slice();

        Ok(BlockPool { slab, capacity, stride, live: 0, last_freed: None })
    }

    /// Raw-pointer compatible constructor: returns null and sets the
    /// last-error shim instead of returning a `Result`.
    pub fn create(capacity: usize, payload_size: usize) -> Option<Self> {
        Self::try_create(capacity, payload_size).ok()
    }

    /// Number of currently occupied slots.
    pub fn size(&self) -> usize {
        self.live
    }

    /// Total number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn flag_ptr(&mut self, slot_offset: usize) -> *mut u8 {
        // SAFETY: `slot_offset` is always a multiple of `stride` and less
        // than `slab.len()`, established by every caller below.
        unsafe { self.slab.as_mut_ptr().add(slot_offset).cast::<u8>() }
    }

    fn payload_ptr(&mut self, slot_offset: usize) -> NonNull<u8> {
        // SAFETY: see `flag_ptr`; the payload lies `PAYLOAD_OFFSET` bytes
        // past the flag byte, still within the slot.
        let ptr = unsafe { self.flag_ptr(slot_offset).add(PAYLOAD_OFFSET) };
        NonNull::new(ptr).expect("slab pointer is never null")
    }

    /// Claims one free slot and returns a pointer to its payload.
    ///
    /// # Errors
    /// [`PoolError::AllocFailed`] if every slot is occupied.
    pub fn try_alloc(&mut self) -> PoolResult<NonNull<u8>> {
        set_last_error(None);
        if self.live == self.capacity {
            set_last_error(Some(PoolError::AllocFailed));
            return Err(PoolError::AllocFailed);
        }

        if let Some(hint) = self.last_freed {
            // SAFETY: `hint` was recorded by `free` as a slot-aligned offset
            // inside the slab and has not been consumed since.
            if unsafe { *self.flag_ptr(hint) } == 0 {
                unsafe { *self.flag_ptr(hint) = 1 };
                self.live += 1;
                self.last_freed = None;
                return Ok(self.payload_ptr(hint));
            }
        }

        for slot in 0..self.capacity {
            let offset = slot * self.stride;
            // SAFETY: `offset` is slot-aligned and `< slab.len()`.
            if unsafe { *self.flag_ptr(offset) } == 0 {
                unsafe { *self.flag_ptr(offset) = 1 };
                self.live += 1;
                return Ok(self.payload_ptr(offset));
            }
        }

        set_last_error(Some(PoolError::AllocFailed));
        Err(PoolError::AllocFailed)
    }

    /// Raw-pointer compatible `alloc`: null on failure, shim set instead.
    pub fn alloc(&mut self) -> *mut u8 {
        self.try_alloc().map(NonNull::as_ptr).unwrap_or(std::ptr::null_mut())
    }

    /// Checks whether `payload` addresses the start of a payload owned by
    /// this pool.
    ///
    /// This fixes the source's `pool_block_contains` bug (§9 REDESIGN
    /// FLAGS): the subtraction order there only worked when the slab
    /// happened to sit below the pointer, and it lacked an upper bound.
    fn contains(&self, payload: *const u8) -> bool {
        let slab_start = self.slab.as_ptr() as usize;
        let slab_end = slab_start + self.capacity * self.stride;
        let flag = (payload as usize).wrapping_sub(PAYLOAD_OFFSET);

        if flag < slab_start || flag >= slab_end {
            return false;
        }
        (flag - slab_start) % self.stride == 0
    }

    /// Releases a previously allocated payload pointer back to the pool.
    ///
    /// # Errors
    /// [`PoolError::NullPtr`] if `payload` is null, [`PoolError::InvalidPtr`]
    /// if it does not address a payload owned by this pool. A double-free
    /// (freeing an already-free slot) is tolerated as a no-op on the flag
    /// byte; the live count is protected from underflow with a saturating
    /// subtract (§9 Open Question).
    ///
    /// # Safety
    /// `payload`, if non-null, must either be a pointer previously returned
    /// by [`BlockPool::try_alloc`]/[`BlockPool::alloc`] on this pool, or any
    /// other pointer the caller wants validated and rejected.
    pub unsafe fn try_free(&mut self, payload: *mut u8) -> PoolResult<()> {
        set_last_error(None);
        if payload.is_null() {
            set_last_error(Some(PoolError::NullPtr));
            return Err(PoolError::NullPtr);
        }
        if !self.contains(payload) {
            set_last_error(Some(PoolError::InvalidPtr));
            return Err(PoolError::InvalidPtr);
        }

        let flag_offset = (payload as usize) - PAYLOAD_OFFSET - (self.slab.as_ptr() as usize);
        // SAFETY: `contains` established `flag_offset` is slot-aligned and
        // in bounds.
        unsafe { *self.flag_ptr(flag_offset) = 0 };
        self.last_freed = Some(flag_offset);
        self.live = self.live.saturating_sub(1);
        Ok(())
    }

    /// Raw-pointer compatible `free`: errors are reported only via the
    /// last-error shim.
    ///
    /// # Safety
    /// See [`BlockPool::try_free`].
    pub unsafe fn free(&mut self, payload: *mut u8) {
        let _ = unsafe { self.try_free(payload) };
    }

    /// Marks every slot free and forgets the last-freed hint.
    pub fn clear(&mut self) {
        for slot in 0..self.capacity {
            let offset = slot * self.stride;
            unsafe { *self.flag_ptr(offset) = 0 };
        }
        self.live = 0;
        self.last_freed = None;
    }
}

/// Convenience accessor mirroring [`crate::error::last_error`], kept here so
/// callers porting the raw C calling convention have a single import.
pub fn pool_get_last_error() -> Option<PoolError> {
    last_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::shim_test_lock;

    #[test]
    fn zero_capacity_or_payload_is_rejected() {
        let _guard = shim_test_lock();
        assert!(BlockPool::try_create(0, 8).is_err());
        assert!(BlockPool::try_create(8, 0).is_err());
        assert_eq!(crate::error::last_error(), Some(PoolError::InvalidArgs));
    }

    #[test]
    fn stride_is_eight_byte_aligned_and_at_least_eight() {
        for payload_size in [1usize, 4, 8, 9, 36, 100] {
            let pool = BlockPool::try_create(4, payload_size).unwrap();
            assert!(pool.stride >= 8);
            assert_eq!(pool.stride % 8, 0);
        }
    }

    #[test]
    fn allocated_payload_pointers_are_eight_byte_aligned() {
        let mut pool = BlockPool::try_create(8, 5).unwrap();
        for _ in 0..8 {
            let ptr = pool.try_alloc().unwrap();
            assert_eq!(ptr.as_ptr() as usize % 8, 0);
        }
    }

    #[test]
    fn capacity_is_a_hard_ceiling() {
        let _guard = shim_test_lock();
        let mut pool = BlockPool::try_create(2, 8).unwrap();
        assert!(pool.try_alloc().is_ok());
        assert!(pool.try_alloc().is_ok());
        assert_eq!(pool.try_alloc(), Err(PoolError::AllocFailed));
        assert_eq!(crate::error::last_error(), Some(PoolError::AllocFailed));
    }

    #[test]
    fn free_then_alloc_reuses_the_last_freed_hint() {
        let mut pool = BlockPool::try_create(5, 36).unwrap();
        let slots: Vec<_> = (0..5).map(|_| pool.try_alloc().unwrap()).collect();
        assert_eq!(pool.try_alloc(), Err(PoolError::AllocFailed));

        let second_slot_payload = slots[1];
        unsafe { pool.try_free(second_slot_payload.as_ptr()).unwrap() };

        let reused = pool.try_alloc().unwrap();
        assert_eq!(reused.as_ptr(), second_slot_payload.as_ptr());
    }

    #[test]
    fn null_free_sets_null_ptr_and_preserves_state() {
        let _guard = shim_test_lock();
        let mut pool = BlockPool::try_create(3, 8).unwrap();
        pool.try_alloc().unwrap();
        let live_before = pool.size();

        let result = unsafe { pool.try_free(std::ptr::null_mut()) };
        assert_eq!(result, Err(PoolError::NullPtr));
        assert_eq!(crate::error::last_error(), Some(PoolError::NullPtr));
        assert_eq!(pool.size(), live_before);
    }

    #[test]
    fn freeing_an_unrelated_pointer_is_rejected() {
        let _guard = shim_test_lock();
        let mut pool = BlockPool::try_create(3, 8).unwrap();
        pool.try_alloc().unwrap();
        let live_before = pool.size();

        let mut stack_var: u64 = 0;
        let result = unsafe { pool.try_free(std::ptr::addr_of_mut!(stack_var).cast()) };
        assert_eq!(result, Err(PoolError::InvalidPtr));
        assert_eq!(crate::error::last_error(), Some(PoolError::InvalidPtr));
        assert_eq!(pool.size(), live_before);
    }

    #[test]
    fn clear_frees_every_slot() {
        let mut pool = BlockPool::try_create(4, 16).unwrap();
        for _ in 0..4 {
            pool.try_alloc().unwrap();
        }
        pool.clear();
        assert_eq!(pool.size(), 0);
        for _ in 0..4 {
            assert!(pool.try_alloc().is_ok());
        }
    }

    #[test]
    fn double_free_is_a_tolerated_no_op_on_the_flag() {
        let mut pool = BlockPool::try_create(2, 8).unwrap();
        let ptr = pool.try_alloc().unwrap();
        unsafe {
            pool.try_free(ptr.as_ptr()).unwrap();
            // A second free of the same, now-free slot does not panic and
            // does not underflow `live` thanks to the saturating subtract.
            pool.try_free(ptr.as_ptr()).unwrap();
        }
        assert_eq!(pool.size(), 0);
    }
}
