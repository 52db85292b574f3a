//! Utilities for testing linearizability of lock-free data structures based on the strategy
//! defined by Lowe in [Testing for Linearizability](http://www.cs.ox.ac.uk/people/gavin.lowe/LinearizabiltyTesting/paper.pdf).
//! This should be done by using the LinearizabilityTester struct and the ThreadLog.
//!
//! # Example
//! This is an example of how to use the LinearizabilityTester on a list. The tester needs
//! a sequential reference object, implementing `Specification`, whose operations match those
//! performed on the concurrent object.
//! ```
//! use lockfree_list::structures::LinkedList;
//! use lockfree_list::testing::{
//!     LinearizabilityResult, LinearizabilityTester, SequentialSet, SetOp, ThreadLog,
//! };
//!
//! fn worker(id: usize, log: &mut ThreadLog<LinkedList<usize>, SequentialSet<usize>>) {
//!     for i in 0..100 {
//!         let key = (i * (id + 1)) % 7;
//!         match i % 3 {
//!             0 => log.log(SetOp::Insert(key), |list| list.insert(key)),
//!             1 => log.log(SetOp::Remove(key), |list| list.remove(&key)),
//!             _ => log.log(SetOp::Contains(key), |list| list.contains(&key)),
//!         }
//!     }
//! }
//!
//! let list: LinkedList<usize> = LinkedList::new();
//! let linearizer = LinearizabilityTester::new(4, list, SequentialSet::new());
//!
//! match linearizer.run(worker).unwrap() {
//!     LinearizabilityResult::Success => {}
//!     LinearizabilityResult::Failure(history) => panic!("not linearizable:\n{}", history),
//! }
//! ```

pub use self::linearizability_tester::{LinearizabilityResult, LinearizabilityTester, ThreadLog};
pub use self::specification::{SequentialSet, SetOp, Specification};

mod automaton;
pub mod linearizability_tester;
mod specification;
mod time_stamped;
