use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

/// Whether the low bit of the pointer is set.
pub fn is_marked<T>(ptr: *mut T) -> bool {
    let ptr_usize = ptr as usize;
    match ptr_usize & 0x1 {
        0 => false,
        _ => true,
    }
}

pub fn unmark<T>(ptr: *mut T) -> *mut T {
    let ptr_usize = ptr as usize;
    (ptr_usize & !(0x1)) as *mut T
}

pub fn mark<T>(ptr: *mut T) -> *mut T {
    let ptr_usize = ptr as usize;
    (ptr_usize | 0x1) as *mut T
}

/// An atomic pointer whose least significant bit doubles as a flag.
///
/// The pointer and the flag live in the same word, so a single compare-and-swap
/// changes both at once. The pointee must be aligned to at least two bytes.
/// Dropping the cell does not free the pointee; whoever owns the chain does.
#[derive(Debug)]
pub struct AtomicMarkablePtr<T> {
    ptr: AtomicUsize,
    _phantom: PhantomData<*mut T>,
}

unsafe impl<T: Send> Send for AtomicMarkablePtr<T> {}
unsafe impl<T: Send + Sync> Sync for AtomicMarkablePtr<T> {}

impl<T> AtomicMarkablePtr<T> {
    pub fn new(ptr: *mut T) -> Self {
        AtomicMarkablePtr {
            ptr: AtomicUsize::new(ptr as usize),
            _phantom: PhantomData,
        }
    }

    /// Load the raw word, mark bit included.
    pub fn load(&self) -> *mut T {
        self.ptr.load(Acquire) as *mut T
    }

    pub fn load_relaxed(&self) -> *mut T {
        self.ptr.load(Relaxed) as *mut T
    }

    pub fn store(&self, val: *mut T) {
        self.ptr.store(val as usize, Release);
    }

    /// Set the mark bit, provided the word still holds the unmarked `old`.
    ///
    /// On failure the current word is returned with Acquire ordering, so its pointee may be
    /// read and republished like that of `load`.
    pub fn compare_and_mark(&self, old: *mut T) -> Result<*mut T, *mut T> {
        let marked_ptr = mark(old);
        match self
            .ptr
            .compare_exchange(old as usize, marked_ptr as usize, AcqRel, Acquire)
        {
            Ok(ptr) => Ok(ptr as *mut T),
            Err(ptr) => Err(ptr as *mut T),
        }
    }

    pub fn compare_exchange(&self, current: *mut T, new: *mut T) -> Result<*mut T, *mut T> {
        match self
            .ptr
            .compare_exchange(current as usize, new as usize, AcqRel, Acquire)
        {
            Ok(ptr) => Ok(ptr as *mut T),
            Err(ptr) => Err(ptr as *mut T),
        }
    }
}

impl<T> Default for AtomicMarkablePtr<T> {
    fn default() -> Self {
        AtomicMarkablePtr::new(ptr::null_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::{is_marked, mark, unmark, AtomicMarkablePtr};
    use std::ptr;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mark_round_trip() {
        let boxed = Box::into_raw(Box::new(17u64));

        assert!(!is_marked(boxed));
        assert!(is_marked(mark(boxed)));
        assert_eq!(unmark(mark(boxed)), boxed);
        assert_eq!(mark(mark(boxed)), mark(boxed));
        assert_eq!(unmark(boxed), boxed);

        unsafe { drop(Box::from_raw(boxed)) };
    }

    #[test]
    fn test_null_can_be_marked() {
        let null: *mut u64 = ptr::null_mut();
        assert!(is_marked(mark(null)));
        assert!(unmark(mark(null)).is_null());
    }

    #[test]
    fn test_compare_and_mark() {
        let first = Box::into_raw(Box::new(1u64));
        let second = Box::into_raw(Box::new(2u64));
        let cell = AtomicMarkablePtr::new(first);

        assert_eq!(cell.compare_and_mark(second), Err(first));
        assert_eq!(cell.compare_and_mark(first), Ok(first));
        assert!(is_marked(cell.load()));
        // A marked word no longer matches its unmarked value.
        assert!(cell.compare_exchange(first, second).is_err());
        assert!(cell.compare_and_mark(first).is_err());
        assert_eq!(unmark(cell.load()), first);

        unsafe {
            drop(Box::from_raw(first));
            drop(Box::from_raw(second));
        }
    }

    #[test]
    fn test_default_is_null() {
        let cell: AtomicMarkablePtr<u64> = AtomicMarkablePtr::default();
        assert!(cell.load().is_null());

        let boxed = Box::into_raw(Box::new(3u64));
        cell.store(boxed);
        assert_eq!(cell.load_relaxed(), boxed);
        assert_eq!(cell.compare_exchange(boxed, ptr::null_mut()), Ok(boxed));
        assert!(cell.load().is_null());

        unsafe { drop(Box::from_raw(boxed)) };
    }

    #[test]
    fn test_failed_mark_returns_published_successor() {
        struct Link {
            value: u64,
            next: AtomicMarkablePtr<Link>,
        }

        let stale = Box::into_raw(Box::new(Link {
            value: 1,
            next: AtomicMarkablePtr::default(),
        }));
        let cell = Arc::new(AtomicMarkablePtr::new(stale));

        let publisher = {
            let cell = cell.clone();
            let stale_addr = stale as usize;
            thread::spawn(move || {
                let fresh = Box::into_raw(Box::new(Link {
                    value: 2,
                    next: AtomicMarkablePtr::new(stale_addr as *mut Link),
                }));
                cell.store(fresh);
                fresh as usize
            })
        };
        let fresh = publisher.join().unwrap() as *mut Link;

        // The mark against the stale successor fails and hands back the published one.
        let current = match cell.compare_and_mark(stale) {
            Ok(_) => panic!("marked against a stale successor"),
            Err(current) => current,
        };
        assert_eq!(current, fresh);
        assert_eq!(unsafe { (*current).value }, 2);
        assert_eq!(unsafe { (*current).next.load() }, stale);
        assert_eq!(cell.compare_and_mark(current), Ok(current));
        assert_eq!(unmark(cell.load()), fresh);

        unsafe {
            drop(Box::from_raw(fresh));
            drop(Box::from_raw(stale));
        }
    }
}
