use im::OrdSet;
use std::fmt::Debug;
use std::hash::Hash;

/// A sequential object that concurrent histories are checked against.
///
/// States are persistent values: `apply` returns the state after the operation along with
/// the operation's result, leaving `self` untouched so the checker can backtrack.
pub trait Specification: Clone + Eq + Hash {
    type Op: Debug;
    type Ret: PartialEq + Debug;

    fn apply(&self, op: &Self::Op) -> (Self, Self::Ret);
}

/// Operations of a set, each answering with a `bool`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetOp<T> {
    Insert(T),
    Remove(T),
    Contains(T),
}

/// A sequential set backed by an immutable ordered set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequentialSet<T: Ord + Clone> {
    set: OrdSet<T>,
}

impl<T: Ord + Clone> SequentialSet<T> {
    pub fn new() -> Self {
        SequentialSet { set: OrdSet::new() }
    }
}

impl<T: Ord + Clone> Default for SequentialSet<T> {
    fn default() -> Self {
        SequentialSet::new()
    }
}

impl<T: Ord + Clone + Hash + Debug> Specification for SequentialSet<T> {
    type Op = SetOp<T>;
    type Ret = bool;

    fn apply(&self, op: &SetOp<T>) -> (Self, bool) {
        match *op {
            SetOp::Insert(ref value) => {
                if self.set.contains(value) {
                    (self.clone(), false)
                } else {
                    let mut set = self.set.clone();
                    set.insert(value.clone());
                    (SequentialSet { set }, true)
                }
            }
            SetOp::Remove(ref value) => {
                let mut set = self.set.clone();
                let removed = set.remove(value).is_some();
                (SequentialSet { set }, removed)
            }
            SetOp::Contains(ref value) => (self.clone(), self.set.contains(value)),
        }
    }
}
