use std::cmp::Ordering;

/// An event of a concurrent history, stamped with a shared logical clock.
///
/// Stamps are handed out by one atomic counter, so an event stamped lower really happened
/// before an event stamped higher, whichever threads they come from.
pub struct TimeStamped<Op, Ret> {
    pub stamp: u64,
    pub event: Event<Op, Ret>,
}

impl<Op, Ret> TimeStamped<Op, Ret> {
    pub fn new_invoke(stamp: u64, thread: usize, id: usize, op: Op) -> Self {
        Self {
            stamp,
            event: Event::Invoke(InvokeEvent { thread, id, op }),
        }
    }

    pub fn new_return(stamp: u64, thread: usize, id: usize, result: Ret) -> Self {
        Self {
            stamp,
            event: Event::Return(ReturnEvent { thread, id, result }),
        }
    }
}

impl<Op, Ret> Ord for TimeStamped<Op, Ret> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp.cmp(&other.stamp)
    }
}

impl<Op, Ret> PartialOrd for TimeStamped<Op, Ret> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Op, Ret> PartialEq for TimeStamped<Op, Ret> {
    fn eq(&self, other: &Self) -> bool {
        self.stamp == other.stamp
    }
}

impl<Op, Ret> Eq for TimeStamped<Op, Ret> {}

pub enum Event<Op, Ret> {
    Invoke(InvokeEvent<Op>),
    Return(ReturnEvent<Ret>),
}

/// The call of operation `id` by `thread`.
pub struct InvokeEvent<Op> {
    pub thread: usize,
    pub id: usize,
    pub op: Op,
}

/// The response to operation `id`.
pub struct ReturnEvent<Ret> {
    pub thread: usize,
    pub id: usize,
    pub result: Ret,
}
