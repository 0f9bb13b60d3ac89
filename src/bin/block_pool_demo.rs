//! Walks the fixed-block engine through a typical alloc/fill/free/clear
//! cycle, logging to stdout as it goes.

use poolmem::block_pool::BlockPool;
use poolmem::logging::{self, LogLevel};

#[repr(C)]
struct Record {
    id: i32,
    name: [u8; 32],
}

unsafe fn write_record(ptr: *mut u8, id: i32, name: &str) {
    let record = ptr.cast::<Record>();
    (*record).id = id;
    let bytes = name.as_bytes();
    let len = bytes.len().min(31);
    (*record).name[..len].copy_from_slice(&bytes[..len]);
    (*record).name[len] = 0;
}

unsafe fn read_record(ptr: *const u8) -> (i32, String) {
    let record = ptr.cast::<Record>();
    let nul = (*record).name.iter().position(|&b| b == 0).unwrap_or(32);
    let name = String::from_utf8_lossy(&(*record).name[..nul]).into_owned();
    ((*record).id, name)
}

fn main() {
    logging::enable_stdout(LogLevel::Info);

    let capacity = 5;
    let block_size = std::mem::size_of::<Record>();
    let mut pool = match BlockPool::try_create(capacity, block_size) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("error creating the pool: {err}");
            return;
        }
    };
    println!("pool created: capacity={} payload_size={block_size}", pool.capacity());

    let slots: Vec<_> = (1..=3)
        .map(|id| {
            let ptr = pool.try_alloc().expect("capacity allows three allocations");
            unsafe { write_record(ptr.as_ptr(), id, &format!("Data {id}")) };
            ptr
        })
        .collect();

    for ptr in &slots {
        let (id, name) = unsafe { read_record(ptr.as_ptr()) };
        println!("record: id={id}, name={name}");
    }

    println!("freeing record 2...");
    unsafe { pool.try_free(slots[1].as_ptr()).expect("valid pointer") };

    let reused = pool.try_alloc().expect("the freed slot is available again");
    unsafe { write_record(reused.as_ptr(), 4, "Data 4") };
    let (id, name) = unsafe { read_record(reused.as_ptr()) };
    println!("reused slot: id={id}, name={name}");

    println!("clearing the pool...");
    pool.clear();
    let after_clear = pool.try_alloc().expect("clear frees every slot");
    unsafe { write_record(after_clear.as_ptr(), 5, "Data 5") };
    let (id, name) = unsafe { read_record(after_clear.as_ptr()) };
    println!("post-clear record: id={id}, name={name}");
}
