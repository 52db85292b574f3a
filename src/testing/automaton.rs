use super::specification::Specification;
use super::time_stamped::{Event, TimeStamped};
use std::collections::{HashMap, HashSet};
use std::mem;

const HEAD: usize = 0;

enum Kind<'h, Op> {
    Head,
    Call { op: &'h Op, index: usize },
    Return,
}

/// One call or return of the history, threaded on a doubly linked list so that linearized
/// operations can be lifted out and put back in constant time.
struct Entry<'h, Op> {
    kind: Kind<'h, Op>,
    matched: usize,
    prev: usize,
    next: Option<usize>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Linearized {
    words: Vec<u64>,
}

impl Linearized {
    fn new(len: usize) -> Self {
        Linearized {
            words: vec![0; (len + 63) / 64],
        }
    }

    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    fn clear(&mut self, index: usize) {
        self.words[index / 64] &= !(1 << (index % 64));
    }
}

fn unlink<Op>(entries: &mut [Entry<Op>], index: usize) {
    let prev = entries[index].prev;
    let next = entries[index].next;
    entries[prev].next = next;
    if let Some(next) = next {
        entries[next].prev = prev;
    }
}

fn relink<Op>(entries: &mut [Entry<Op>], index: usize) {
    let prev = entries[index].prev;
    let next = entries[index].next;
    entries[prev].next = Some(index);
    if let Some(next) = next {
        entries[next].prev = index;
    }
}

fn lift<Op>(entries: &mut [Entry<Op>], call: usize) {
    let ret = entries[call].matched;
    unlink(entries, call);
    unlink(entries, ret);
}

fn unlift<Op>(entries: &mut [Entry<Op>], call: usize) {
    let ret = entries[call].matched;
    relink(entries, ret);
    relink(entries, call);
}

/// Decide whether `history` is linearizable with respect to the sequential `initial` state.
///
/// This is the search of Wing and Gong, with the memoisation of linearized sets and states
/// suggested by Lowe: operations are linearized in turn as long as their call precedes every
/// pending return, and the search backtracks when a return is reached before its call has
/// been linearized. Every invocation must have a response.
pub fn is_linearizable<S: Specification>(
    initial: &S,
    history: &[TimeStamped<S::Op, S::Ret>],
) -> bool {
    let mut sorted: Vec<&TimeStamped<S::Op, S::Ret>> = history.iter().collect();
    sorted.sort();

    let mut entries: Vec<Entry<S::Op>> = vec![Entry {
        kind: Kind::Head,
        matched: HEAD,
        prev: HEAD,
        next: None,
    }];
    let mut dense: HashMap<usize, usize> = HashMap::new();
    let mut call_entries: Vec<usize> = Vec::new();
    let mut results: Vec<Option<&S::Ret>> = Vec::new();

    for stamped in sorted {
        let position = entries.len();
        match stamped.event {
            Event::Invoke(ref invoke) => {
                let index = results.len();
                dense.insert(invoke.id, index);
                call_entries.push(position);
                results.push(None);
                entries.push(Entry {
                    kind: Kind::Call {
                        op: &invoke.op,
                        index,
                    },
                    matched: HEAD,
                    prev: position - 1,
                    next: None,
                });
            }
            Event::Return(ref ret) => {
                let index = match dense.get(&ret.id) {
                    Some(&index) => index,
                    None => return false,
                };
                results[index] = Some(&ret.result);
                entries[call_entries[index]].matched = position;
                entries.push(Entry {
                    kind: Kind::Return,
                    matched: call_entries[index],
                    prev: position - 1,
                    next: None,
                });
            }
        }
        entries[position - 1].next = Some(position);
    }

    let results: Vec<&S::Ret> = match results.into_iter().collect::<Option<Vec<_>>>() {
        Some(results) => results,
        None => return false,
    };

    let mut state = initial.clone();
    let mut linearized = Linearized::new(results.len());
    let mut cache: HashSet<(Linearized, S)> = HashSet::new();
    let mut calls: Vec<(usize, S)> = Vec::new();
    let mut cursor = entries[HEAD].next;

    while entries[HEAD].next.is_some() {
        let current = match cursor {
            Some(current) => current,
            None => return false,
        };

        match entries[current].kind {
            Kind::Call { op, index } => {
                let (next_state, expected) = state.apply(op);
                if expected == *results[index] {
                    let mut next_linearized = linearized.clone();
                    next_linearized.set(index);
                    if cache.insert((next_linearized.clone(), next_state.clone())) {
                        calls.push((current, mem::replace(&mut state, next_state)));
                        linearized = next_linearized;
                        lift(&mut entries, current);
                        cursor = entries[HEAD].next;
                        continue;
                    }
                }
                cursor = entries[current].next;
            }
            Kind::Return => {
                // The call matching this return has not been linearized yet: backtrack.
                let (call, previous) = match calls.pop() {
                    Some(top) => top,
                    None => return false,
                };
                if let Kind::Call { index, .. } = entries[call].kind {
                    linearized.clear(index);
                }
                state = previous;
                unlift(&mut entries, call);
                cursor = entries[call].next;
            }
            Kind::Head => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::is_linearizable;
    use crate::testing::specification::{SequentialSet, SetOp};
    use crate::testing::time_stamped::TimeStamped;

    type Stamped = TimeStamped<SetOp<u8>, bool>;

    fn op(
        history: &mut Vec<Stamped>,
        id: usize,
        thread: usize,
        span: (u64, u64),
        operation: SetOp<u8>,
        result: bool,
    ) {
        history.push(TimeStamped::new_invoke(span.0, thread, id, operation));
        history.push(TimeStamped::new_return(span.1, thread, id, result));
    }

    #[test]
    fn test_sequential_history() {
        let mut history = Vec::new();
        op(&mut history, 0, 0, (0, 1), SetOp::Insert(1), true);
        op(&mut history, 1, 0, (2, 3), SetOp::Insert(1), false);
        op(&mut history, 2, 0, (4, 5), SetOp::Remove(1), true);
        op(&mut history, 3, 0, (6, 7), SetOp::Contains(1), false);

        assert!(is_linearizable(&SequentialSet::new(), &history));
    }

    #[test]
    fn test_overlapping_operations_may_reorder() {
        // The remove overlaps the insert and observes it.
        let mut history = Vec::new();
        op(&mut history, 0, 0, (0, 3), SetOp::Insert(4), true);
        op(&mut history, 1, 1, (1, 2), SetOp::Remove(4), true);
        op(&mut history, 2, 0, (4, 5), SetOp::Contains(4), false);

        assert!(is_linearizable(&SequentialSet::new(), &history));
    }

    #[test]
    fn test_real_time_order_is_respected() {
        // The remove returns before the insert is invoked, so it cannot have seen it.
        let mut history = Vec::new();
        op(&mut history, 0, 1, (0, 1), SetOp::Remove(4), true);
        op(&mut history, 1, 0, (2, 3), SetOp::Insert(4), true);

        assert!(!is_linearizable(&SequentialSet::new(), &history));
    }

    #[test]
    fn test_two_successful_removes_rejected() {
        let mut history = Vec::new();
        op(&mut history, 0, 0, (0, 1), SetOp::Insert(7), true);
        op(&mut history, 1, 0, (2, 5), SetOp::Remove(7), true);
        op(&mut history, 2, 1, (3, 4), SetOp::Remove(7), true);

        assert!(!is_linearizable(&SequentialSet::new(), &history));
    }
}
