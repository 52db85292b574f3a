//! A module for lock-free memory management.
//!
//! The manager in this module allows for lock-free memory management, meaning that
//! it can be used in the development of lock-free data structures. It helps ensure
//! that no pieces of data are freed while other threads can still access them, and
//! prevents the [ABA problem](https://en.wikipedia.org/wiki/ABA_problem).
//!
//! A structure shares one `HPBRManager` between all of its threads. Before reading a
//! node found through a shared pointer a thread protects it with an `HPHandle` and checks
//! the node is still reachable; once a node is unlinked it is `retire`d rather than freed,
//! and `try_reclaim` later destroys it when no handle protects it any more.

pub use self::hazardpointers::HPBRManager;
pub use self::hazardpointers::HPHandle;
pub use self::hazardpointers::DEFAULT_MAX_RETIRED;

mod hazardpointers;
