//! Component B — the loop's intrusive containers, reimagined as
//! index-based Rust collections instead of pointer-linked C structs.

pub mod heap;
pub mod pending;

pub use heap::TimerHeap;
pub use pending::PendingQueue;
