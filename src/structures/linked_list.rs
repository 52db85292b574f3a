use crate::memory::{HPBRManager, HPHandle};
use crate::structures::comparator::{Comparator, NaturalOrder};
use crate::structures::data_guard::DataGuard;
use crate::structures::utils::atomic_markable::{self, AtomicMarkablePtr};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A lock-free sorted linked list, usable as a concurrent ordered set.
///
/// This list is an implementation of that described by Harris in [A Pragmatic Implementation
/// of Non-Blocking Linked-Lists](https://doi.org/10.1007/3-540-45414-4_21), with memory
/// managed by hazard pointers as in Michael's [High Performance Dynamic Lock-Free Hash Tables
/// and List-Based Sets](https://dl.acm.org/citation.cfm?id=564870).
///
/// Elements are kept in ascending order of the comparator `C` and are never duplicated.
/// A removal first marks the node's `next` pointer, then unlinks it; any thread walking past
/// a marked node finishes the unlink for it.
pub struct LinkedList<T: Send, C = NaturalOrder> {
    head: *mut Node<T>,
    count: AtomicIsize,
    comparator: C,
    manager: Arc<HPBRManager<Node<T>>>,
}

unsafe impl<T: Send + Sync, C: Send + Sync> Send for LinkedList<T, C> {}
unsafe impl<T: Send + Sync, C: Send + Sync> Sync for LinkedList<T, C> {}

/// A node of a `LinkedList`. Only exposed so that a manager can be shared between lists.
pub struct Node<T> {
    data: Option<T>,
    next: AtomicMarkablePtr<Node<T>>,
}

impl<T> Node<T> {
    fn new(data: T) -> Self {
        Node {
            data: Some(data),
            next: AtomicMarkablePtr::default(),
        }
    }

    fn new_sentinel() -> Self {
        Node {
            data: None,
            next: AtomicMarkablePtr::default(),
        }
    }

    fn element(&self) -> &T {
        match self.data {
            Some(ref data) => data,
            None => unreachable!("the head sentinel holds no element"),
        }
    }
}

/// Where a search stopped: `prev.next` pointed at `cur` when last checked.
struct Position<T> {
    prev: *mut Node<T>,
    cur: *mut Node<T>,
}

impl<T> Clone for Position<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Position<T> {}

impl<T: Send + Ord> LinkedList<T> {
    /// Create a new, empty list ordered by `Ord`.
    /// # Examples
    /// ```
    /// use lockfree_list::structures::LinkedList;
    /// let list: LinkedList<u32> = LinkedList::new();
    /// assert!(list.is_empty());
    /// ```
    pub fn new() -> Self {
        LinkedList::with_comparator(NaturalOrder)
    }

    /// Create a new list ordered by `Ord` that retires its nodes to `manager`.
    pub fn with_manager(manager: Arc<HPBRManager<Node<T>>>) -> Self {
        LinkedList::with_comparator_and_manager(NaturalOrder, manager)
    }
}

impl<T: Send + Ord> Default for LinkedList<T> {
    fn default() -> Self {
        LinkedList::new()
    }
}

impl<T: Send, C: Comparator<T>> LinkedList<T, C> {
    /// Create a new, empty list ordered by `comparator`.
    /// # Examples
    /// ```
    /// use lockfree_list::structures::{LinkedList, Reverse};
    /// let list = LinkedList::with_comparator(Reverse);
    /// list.insert(1);
    /// list.insert(2);
    /// assert_eq!(*list.first().unwrap(), 2);
    /// ```
    pub fn with_comparator(comparator: C) -> Self {
        LinkedList::with_comparator_and_manager(comparator, Arc::new(HPBRManager::default()))
    }

    pub fn with_comparator_and_manager(comparator: C, manager: Arc<HPBRManager<Node<T>>>) -> Self {
        LinkedList {
            head: Box::into_raw(Box::new(Node::new_sentinel())),
            count: AtomicIsize::new(0),
            comparator,
            manager,
        }
    }

    pub fn manager(&self) -> &Arc<HPBRManager<Node<T>>> {
        &self.manager
    }

    /// Walk from the head to the first live node whose element satisfies `stop`.
    ///
    /// Marked nodes met on the way are unlinked and retired. On return `cur_hp` protects
    /// `cur` and `prev_hp` protects `prev`, unless `prev` is the head.
    fn search<'a, F>(
        &'a self,
        stop: F,
        prev_hp: &mut HPHandle<'a, Node<T>>,
        cur_hp: &mut HPHandle<'a, Node<T>>,
    ) -> Position<T>
    where
        F: Fn(&T) -> bool,
    {
        'try_again: loop {
            let mut prev = self.head;
            let mut cur = unsafe { (*prev).next.load() };

            loop {
                cur_hp.protect(cur);
                // Make sure prev is still the predecessor of cur, so that cur is properly
                // protected before it is read.
                if unsafe { (*prev).next.load() } != cur {
                    continue 'try_again;
                }

                if cur.is_null() {
                    return Position { prev, cur };
                }

                let next = unsafe { (*cur).next.load() };
                if atomic_markable::is_marked(next) {
                    let succ = atomic_markable::unmark(next);
                    if unsafe { (*prev).next.compare_exchange(cur, succ) }.is_err() {
                        continue 'try_again;
                    }

                    cur_hp.unprotect();
                    unsafe { self.manager.retire(cur) };
                    self.manager.try_reclaim();
                    self.count.fetch_sub(1, Ordering::Relaxed);
                    cur = succ;
                } else {
                    let cur_data = unsafe { (*cur).element() };
                    // cur could have been unlinked between loading it and reading its data.
                    if unsafe { (*prev).next.load() } != cur {
                        continue 'try_again;
                    }

                    if stop(cur_data) {
                        return Position { prev, cur };
                    }

                    mem::swap(prev_hp, cur_hp);
                    prev = cur;
                    cur = next;
                }
            }
        }
    }

    /// Search for the first node not less than `key`, and report whether it equals `key`.
    fn find<'a>(
        &'a self,
        key: &T,
        prev_hp: &mut HPHandle<'a, Node<T>>,
        cur_hp: &mut HPHandle<'a, Node<T>>,
    ) -> (bool, Position<T>) {
        let comparator = &self.comparator;
        let position = self.search(|data| !comparator.less(data, key), prev_hp, cur_hp);
        let found = !position.cur.is_null()
            && comparator.equal(key, unsafe { (*position.cur).element() });
        (found, position)
    }

    /// Add `value` to the list. Returns false, dropping `value`, if an equal element is
    /// already present.
    /// # Examples
    /// ```
    /// use lockfree_list::structures::LinkedList;
    /// let list = LinkedList::new();
    /// assert!(list.insert(3));
    /// assert!(!list.insert(3));
    /// ```
    pub fn insert(&self, value: T) -> bool {
        self.emplace_with(move || value)
    }

    /// Add the element built by `constructor`, constructing it directly in its node.
    pub fn emplace_with<F>(&self, constructor: F) -> bool
    where
        F: FnOnce() -> T,
    {
        self.insert_node(Box::new(Node::new(constructor())))
    }

    fn insert_node(&self, node: Box<Node<T>>) -> bool {
        let new_node = Box::into_raw(node);
        let mut prev_hp = self.manager.handle();
        let mut cur_hp = self.manager.handle();

        loop {
            let key = unsafe { (*new_node).element() };
            let (found, position) = self.find(key, &mut prev_hp, &mut cur_hp);
            if found {
                // The node was never published, so nobody else can see it.
                unsafe { drop(Box::from_raw(new_node)) };
                return false;
            }

            unsafe { (*new_node).next.store(position.cur) };
            if unsafe { (*position.prev).next.compare_exchange(position.cur, new_node) }.is_ok() {
                self.count.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }
    }

    /// Remove the element equal to `value`. Returns true if this call removed it, and false
    /// if it was absent or a concurrent removal got to it first.
    /// # Examples
    /// ```
    /// use lockfree_list::structures::LinkedList;
    /// let list = LinkedList::new();
    /// list.insert(3);
    /// assert!(list.remove(&3));
    /// assert!(!list.remove(&3));
    /// ```
    pub fn remove(&self, value: &T) -> bool {
        let mut prev_hp = self.manager.handle();
        let mut cur_hp = self.manager.handle();

        let (position, next) = 'mark: loop {
            let (found, position) = self.find(value, &mut prev_hp, &mut cur_hp);
            if !found {
                return false;
            }

            let mut next = unsafe { (*position.cur).next.load() };
            while !atomic_markable::is_marked(next) {
                match unsafe { (*position.cur).next.compare_and_mark(next) } {
                    Ok(_) => break 'mark (position, next),
                    // The successor changed, mark again against the new one
                    Err(current) => next = current,
                }
            }
            // Someone else marked it first. Searching again helps them unlink it.
        };

        let cur = position.cur;
        if unsafe { (*position.prev).next.compare_exchange(cur, next) }.is_ok() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            cur_hp.unprotect();
            unsafe { self.manager.retire(cur) };
            self.manager.try_reclaim();
        } else {
            trace!("unlink after marking failed, leaving it to search");
            prev_hp.unprotect();
            cur_hp.unprotect();
            self.find(value, &mut prev_hp, &mut cur_hp);
        }

        true
    }

    /// Whether an element equal to `value` is in the list.
    pub fn contains(&self, value: &T) -> bool {
        let mut prev_hp = self.manager.handle();
        let mut cur_hp = self.manager.handle();
        self.find(value, &mut prev_hp, &mut cur_hp).0
    }

    /// Get the element equal to `value`. The element stays readable while the guard is held,
    /// even if it is removed in the meantime.
    pub fn get(&self, value: &T) -> Option<DataGuard<'_, T, Node<T>>> {
        let mut prev_hp = self.manager.handle();
        let mut cur_hp = self.manager.handle();
        let (found, position) = self.find(value, &mut prev_hp, &mut cur_hp);
        if found {
            let data = unsafe { (*position.cur).element() };
            Some(DataGuard::new(data, cur_hp))
        } else {
            None
        }
    }

    /// Get the smallest element of the list.
    pub fn first(&self) -> Option<DataGuard<'_, T, Node<T>>> {
        let mut prev_hp = self.manager.handle();
        let mut cur_hp = self.manager.handle();
        let position = self.search(|_| true, &mut prev_hp, &mut cur_hp);
        if position.cur.is_null() {
            None
        } else {
            let data = unsafe { (*position.cur).element() };
            Some(DataGuard::new(data, cur_hp))
        }
    }

    /// Iterate over the elements in ascending order.
    ///
    /// The iterator is weakly consistent: it never yields an element twice or out of order,
    /// and yields every element present for the whole iteration, but may or may not see
    /// elements inserted or removed concurrently.
    pub fn iter(&self) -> Iter<'_, T, C> {
        Iter {
            list: self,
            position: self.head,
            position_hp: self.manager.handle(),
        }
    }

    /// The number of elements in the list. Exact once no thread is modifying the list.
    ///
    /// An insert counts its node only after linking it, so a concurrent removal can be
    /// counted first and the counter can dip below zero for a moment. Such reads give 0.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send, C> Drop for LinkedList<T, C> {
    fn drop(&mut self) {
        // Nodes still linked belong to the list, unlinked ones to the manager.
        let mut current = self.head;
        while !current.is_null() {
            unsafe {
                let next = atomic_markable::unmark((*current).next.load_relaxed());
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}

impl<T: Send + fmt::Debug, C: Comparator<T>> fmt::Debug for LinkedList<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let first = self.first();
        f.debug_struct("LinkedList")
            .field("len", &self.len())
            .field("first", &first.as_ref().map(|guard| guard.data()))
            .finish()
    }
}

impl<'a, T: Send, C: Comparator<T>> IntoIterator for &'a LinkedList<T, C> {
    type Item = DataGuard<'a, T, Node<T>>;
    type IntoIter = Iter<'a, T, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator over a `LinkedList`, created by `LinkedList::iter`.
pub struct Iter<'a, T: Send, C> {
    list: &'a LinkedList<T, C>,
    position: *mut Node<T>,
    position_hp: HPHandle<'a, Node<T>>,
}

impl<'a, T: Send, C: Comparator<T>> Iter<'a, T, C> {
    /// The node we stand on has been removed, so its `next` can no longer be trusted.
    /// Search for the first element after it instead.
    fn reseek(&mut self) -> Option<DataGuard<'a, T, Node<T>>> {
        let list = self.list;
        // Still protected by position_hp.
        let last = unsafe { (*self.position).element() };
        let mut prev_hp = list.manager.handle();
        let mut cur_hp = list.manager.handle();
        let position = list.search(|data| list.comparator.less(last, data), &mut prev_hp, &mut cur_hp);
        if position.cur.is_null() {
            return None;
        }

        self.position = position.cur;
        mem::swap(&mut self.position_hp, &mut cur_hp);

        // Already protected by position_hp, so no need to validate.
        let mut guard_hp = prev_hp;
        guard_hp.protect(position.cur);
        Some(DataGuard::new(unsafe { (*position.cur).element() }, guard_hp))
    }
}

impl<'a, T: Send, C: Comparator<T>> Iterator for Iter<'a, T, C> {
    type Item = DataGuard<'a, T, Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = unsafe { (*self.position).next.load() };
            if atomic_markable::is_marked(next) {
                return self.reseek();
            }
            if next.is_null() {
                return None;
            }

            let mut next_hp = self.list.manager.handle();
            next_hp.protect(next);
            // An unmarked position cannot have been unlinked, so if it still points at next,
            // next is still linked and now protected.
            if unsafe { (*self.position).next.load() } != next {
                continue;
            }

            self.position = next;
            mem::swap(&mut self.position_hp, &mut next_hp);
            if atomic_markable::is_marked(unsafe { (*next).next.load() }) {
                continue;
            }

            next_hp.protect(next);
            return Some(DataGuard::new(unsafe { (*next).element() }, next_hp));
        }
    }
}
