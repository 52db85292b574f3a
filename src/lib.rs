//! A lock-free ordered set for Rust.
//!
//! This crate provides a lock-free sorted linked list together with the hazard pointer based
//! memory manager that reclaims its nodes. Any number of threads may insert, remove and look
//! up elements at once; every operation is linearizable and a stalled thread never blocks
//! the others.
//!
//! ```
//! use lockfree_list::structures::LinkedList;
//!
//! let list: LinkedList<u32> = LinkedList::new();
//! assert!(list.insert(3));
//! assert!(list.insert(1));
//! assert!(!list.insert(3));
//! assert!(list.contains(&1));
//! assert!(list.remove(&1));
//! assert_eq!(list.len(), 1);
//! ```
//!
//! The `testing` module holds the linearizability checker the list is tested with.

pub mod memory;
pub mod structures;
pub mod testing;
