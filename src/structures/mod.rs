//! Lock-free structures built on the hazard pointer manager in `memory`.

pub use self::comparator::{Comparator, NaturalOrder, Reverse};
pub use self::data_guard::DataGuard;
pub use self::linked_list::{Iter, LinkedList, Node};

mod comparator;
mod data_guard;
mod linked_list;
mod utils;
