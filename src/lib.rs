//! Deterministic user-space memory pools: two allocator engines that manage
//! a caller-sized arena without ever touching the system allocator after
//! creation.
//!
//! - [`block_pool::BlockPool`] hands out fixed-size slots from a slab, each
//!   tagged with a one-byte free/used flag. O(1) allocation when the
//!   most-recently-freed slot can be reused, O(n) worst case otherwise.
//!   Use this when every allocation in a pool is the same size (object
//!   pools, fixed-size message buffers, ring elements).
//! - [`dynamic_pool::DynamicPool`] hands out variable-sized blocks from a
//!   singly-linked chain of canary-protected headers, with first-fit
//!   search, splitting, and coalescing. Use this when allocation sizes
//!   vary but you still want a bounded, system-allocator-free arena.
//!
//! # Two calling conventions
//! Every operation is exposed twice:
//! - a **safe** surface (`try_create`, `try_alloc`, `try_free`, ...)
//!   returning [`PoolResult`], the preferred entry point for new code;
//! - a **raw-pointer** surface (`create`, `alloc`, `free`, ...) that
//!   returns `Option`/a null pointer on failure and additionally records
//!   the failure in a process-wide last-error shim, for callers ported
//!   from a C-style calling convention. [`last_error`] and
//!   [`last_error_str`] read that shim.
//!
//! Both engines are single-threaded by design: neither type is `Sync`, so
//! concurrent access requires an external `Mutex` (as the [`logging`]
//! facade uses internally for its own process-wide state).
//!
//! # Logging
//! [`logging`] provides a small, level-filtered logging facade with
//! pluggable [`logging::Sink`]s, independent of either engine. Nothing in
//! this crate logs by default; call [`logging::enable_stdout`] or
//! [`logging::enable_file`] to opt in.

pub mod block_pool;
pub mod dynamic_pool;
pub mod error;
pub mod logging;

pub use block_pool::BlockPool;
pub use dynamic_pool::DynamicPool;
pub use error::{last_error, last_error_str, PoolError, PoolResult};
pub use logging::{LogLevel, Sink};
