//! End-to-end scenarios for the variable-block engine.

use poolmem::dynamic_pool::DynamicPool;
use poolmem::{last_error, PoolError};

#[test]
fn canary_corruption_is_recovered_on_free() {
    let mut pool = DynamicPool::try_create(1024).unwrap();
    let payload = pool.try_alloc(32).unwrap();

    // Corrupt the leading canary word sitting just before the payload.
    unsafe {
        payload.as_ptr().cast::<u32>().sub(6).write(0xDEAD_BEEF);
    }

    let result = unsafe { pool.try_free(payload.as_ptr()) };
    assert_eq!(result, Ok(()));
    assert_eq!(last_error(), None);
}

#[test]
fn coalesce_then_retry_then_alloc_safe() {
    let mut pool = DynamicPool::try_create(256).unwrap();
    let blocks: Vec<_> = [32usize, 32, 32, 32, 32, 16]
        .into_iter()
        .map(|size| pool.try_alloc(size).unwrap())
        .collect();

    for ptr in &blocks[2..5] {
        unsafe { pool.try_free(ptr.as_ptr()).unwrap() };
    }
    assert!(pool.try_alloc(128).is_err());
    pool.coalesce();
    assert!(pool.try_alloc(128).is_ok());

    unsafe {
        pool.try_free(blocks[0].as_ptr()).unwrap();
        pool.try_free(blocks[1].as_ptr()).unwrap();
    }
    assert!(pool.try_alloc(64).is_err());
    assert!(pool.try_alloc_safe(64).is_ok());
}

#[test]
fn mixed_size_allocations_are_eight_byte_aligned() {
    let mut pool = DynamicPool::try_create(1024).unwrap();
    let pointers: Vec<_> = [64usize, 25, 15].into_iter().map(|n| pool.try_alloc(n).unwrap()).collect();
    for ptr in &pointers {
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
    }

    for ptr in &pointers {
        for bad in [ptr.as_ptr().wrapping_add(1), ptr.as_ptr().wrapping_sub(1)] {
            assert_eq!(unsafe { pool.try_free(bad) }, Err(PoolError::InvalidPtr));
        }
    }
}
