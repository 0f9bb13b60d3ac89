//! Walks the variable-block engine through the alloc/read/free/destroy
//! cycle the fixed-block demo doesn't exercise: mixed-size allocations and
//! explicit teardown.

use poolmem::dynamic_pool::DynamicPool;
use poolmem::logging::{self, LogLevel};

fn main() {
    logging::enable_stdout(LogLevel::Info);

    let mut pool = match DynamicPool::try_create(std::mem::size_of::<i32>() * 10) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to create pool, returned error: {err}");
            return;
        }
    };
    println!("pool created\ncapacity: {}", pool.capacity());

    let x = pool.try_alloc(std::mem::size_of::<i32>()).expect("room for an int");
    unsafe { x.cast::<i32>().as_ptr().write(69) };
    println!("x = {}", unsafe { x.cast::<i32>().as_ptr().read() });
    println!("pool size: {}", pool.size());

    let y = pool.try_alloc(std::mem::size_of::<f32>()).expect("room for a float");
    unsafe { y.cast::<f32>().as_ptr().write(-69.69) };
    println!("y = {:.2}", unsafe { y.cast::<f32>().as_ptr().read() });
    println!("pool size: {}", pool.size());

    println!(
        "x: {} | y: {:.2}",
        unsafe { x.cast::<i32>().as_ptr().read() },
        unsafe { y.cast::<f32>().as_ptr().read() }
    );

    println!("freeing x...");
    unsafe { pool.try_free(x.as_ptr()).expect("x was allocated from this pool") };

    println!("testing completed.");
    // `pool` is dropped here, returning its backing allocation.
}
