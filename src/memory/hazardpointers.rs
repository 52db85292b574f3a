use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, Ordering};
use thread_local::ThreadLocal;
use tracing::{debug, trace};

/// Number of retired records a thread accumulates before `try_reclaim` scans.
pub const DEFAULT_MAX_RETIRED: usize = 100;

/// A hazard pointer based memory manager, as described by Michael in
/// [Hazard Pointers: Safe Memory Reclamation for Lock-Free Objects](https://ieeexplore.ieee.org/document/1291819).
///
/// Threads publish the records they are about to read through an `HPHandle`. Records that
/// have been unlinked from a structure are handed over with `retire`, and are only destroyed
/// by a scan once no published hazard pointer refers to them.
pub struct HPBRManager<T: Send> {
    thread_info: ThreadLocal<UnsafeCell<ThreadLocalInfo<T>>>,
    head: AtomicPtr<HazardPointer<T>>,
    max_retired: usize,
}

impl<T: Send> fmt::Debug for HPBRManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let retired = match self.thread_info.get() {
            None => 0,
            Some(cell) => unsafe { (*cell.get()).retired_list.len() },
        };

        f.debug_struct("HPBRManager")
            .field("hazard_pointers", &self.hazard_pointer_count())
            .field("retired_on_this_thread", &retired)
            .field("max_retired", &self.max_retired)
            .finish()
    }
}

impl<T: Send> Default for HPBRManager<T> {
    fn default() -> Self {
        HPBRManager::new(DEFAULT_MAX_RETIRED)
    }
}

impl<T: Send> HPBRManager<T> {
    /// Create a manager whose threads scan once they hold `max_retired` retired records.
    pub fn new(max_retired: usize) -> Self {
        HPBRManager {
            thread_info: ThreadLocal::new(),
            head: AtomicPtr::default(),
            max_retired,
        }
    }

    /// Claim a hazard pointer. An idle one from the global list is reused if possible,
    /// otherwise a new one is pushed onto the list.
    pub fn handle(&self) -> HPHandle<'_, T> {
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            let hazard_pointer = unsafe { &*current };
            if hazard_pointer.activate() {
                return HPHandle {
                    hazard: hazard_pointer,
                };
            }
            current = hazard_pointer.next.load(Ordering::Acquire);
        }

        HPHandle {
            hazard: unsafe { &*self.allocate_hp() },
        }
    }

    fn allocate_hp(&self) -> *mut HazardPointer<T> {
        let new_hp = HazardPointer::new_active();
        let new_hp_ptr = Box::into_raw(Box::new(new_hp));

        // Hazard pointers are only freed when the manager is dropped, so pushing is ABA free.
        let mut old_head = self.head.load(Ordering::Acquire);
        loop {
            unsafe {
                (*new_hp_ptr).next.store(old_head, Ordering::Relaxed);
            }
            match self.head.compare_exchange_weak(
                old_head,
                new_hp_ptr,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => old_head = current,
            }
        }

        debug!(
            hazard_pointers = self.hazard_pointer_count(),
            "allocated new hazard pointer"
        );
        new_hp_ptr
    }

    /// Hand `record` over to the manager. It is dropped as a `Box<T>` once no thread
    /// protects it.
    ///
    /// # Safety
    /// `record` must come from `Box::into_raw`, must already be unreachable for threads
    /// that have not protected it, and must not be retired twice.
    pub unsafe fn retire(&self, record: *mut T) {
        self.retire_with(record, free::<T>);
    }

    /// Like `retire`, but destroys the record with `deleter` instead of dropping a box.
    ///
    /// # Safety
    /// Same as `retire`; additionally `deleter` must be sound to call once on `record`.
    pub unsafe fn retire_with(&self, record: *mut T, deleter: unsafe fn(*mut T)) {
        let thread_info = self.get_mut_thread_info();
        thread_info.retired_list.push(Retired {
            ptr: record,
            deleter,
        });
    }

    /// Scan if this thread has accumulated enough retired records.
    pub fn try_reclaim(&self) {
        if self.retired_number() >= self.max_retired {
            self.scan();
        }
    }

    /// Number of records retired by the calling thread that are still awaiting reclamation.
    pub fn retired_number(&self) -> usize {
        unsafe { self.get_mut_thread_info().retired_list.len() }
    }

    /// Where the main deletion aspect of the manager takes place.
    /// Deletes any retired records of this thread which are not protected by hazard pointers.
    pub fn scan(&self) {
        // Pairs with the fence in `HPHandle::protect`: either the protecting thread sees the
        // record unlinked when it validates, or we see its hazard pointer here.
        fence(Ordering::SeqCst);

        let hazard_set = self.collect_hazards();
        let retired = unsafe { mem::take(&mut self.get_mut_thread_info().retired_list) };
        let total = retired.len();

        // This will store the records that cannot yet be deleted
        let mut still_hazardous = Vec::new();
        for record in retired {
            if hazard_set.contains(&record.ptr) {
                still_hazardous.push(record);
            } else {
                unsafe { (record.deleter)(record.ptr) };
            }
        }

        let deferred = still_hazardous.len();
        // Deleters may have retired more records in the meantime, so append.
        unsafe {
            self.get_mut_thread_info()
                .retired_list
                .extend(still_hazardous);
        }
        trace!(
            reclaimed = total - deferred,
            deferred,
            "hazard pointer scan"
        );
    }

    fn collect_hazards(&self) -> HashSet<*mut T> {
        let mut hazard_set = HashSet::new();
        let mut current = self.head.load(Ordering::Acquire);

        while !current.is_null() {
            let hazard_pointer = unsafe { &*current };
            let protected = hazard_pointer.protected.load(Ordering::Acquire);
            if !protected.is_null() {
                hazard_set.insert(protected);
            }
            current = hazard_pointer.next.load(Ordering::Acquire);
        }

        hazard_set
    }

    fn hazard_pointer_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            count += 1;
            current = unsafe { (*current).next.load(Ordering::Acquire) };
        }
        count
    }

    /// Get the thread local info as a mutable reference, creating it on first access.
    /// Callers must not hold on to the reference across anything that could re-enter the manager.
    unsafe fn get_mut_thread_info(&self) -> &mut ThreadLocalInfo<T> {
        let thread_info_ptr = self
            .thread_info
            .get_or(|| UnsafeCell::new(ThreadLocalInfo::new()))
            .get();

        &mut *thread_info_ptr
    }
}

impl<T: Send> Drop for HPBRManager<T> {
    fn drop(&mut self) {
        for cell in self.thread_info.iter_mut() {
            for record in cell.get_mut().retired_list.drain(..) {
                unsafe { (record.deleter)(record.ptr) };
            }
        }

        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let hazard_pointer = unsafe { Box::from_raw(current) };
            current = hazard_pointer.next.load(Ordering::Relaxed);
        }
    }
}

unsafe fn free<T>(garbage: *mut T) {
    // Letting this box go out of scope calls Drop on the garbage
    drop(Box::from_raw(garbage));
}

/// A claimed hazard pointer. While it protects a record, no scan of the owning manager
/// destroys that record. Dropping the handle releases the hazard pointer for reuse.
pub struct HPHandle<'a, T: Send> {
    hazard: &'a HazardPointer<T>,
}

impl<'a, T: Send> HPHandle<'a, T> {
    /// Publish `record` as hazardous. The caller still has to check that the record is
    /// reachable afterwards before dereferencing it.
    pub fn protect(&mut self, record: *mut T) {
        self.hazard.protected.store(record, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    pub fn unprotect(&mut self) {
        self.hazard.protected.store(ptr::null_mut(), Ordering::Release);
    }

    pub fn protected(&self) -> *mut T {
        self.hazard.protected.load(Ordering::Relaxed)
    }
}

impl<'a, T: Send> Drop for HPHandle<'a, T> {
    fn drop(&mut self) {
        self.unprotect();
        self.hazard.deactivate();
    }
}

impl<'a, T: Send> fmt::Debug for HPHandle<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HPHandle({:?})", self.protected())
    }
}

struct HazardPointer<T: Send> {
    protected: AtomicPtr<T>,
    next: AtomicPtr<HazardPointer<T>>,
    active: AtomicBool,
}

impl<T: Send> HazardPointer<T> {
    fn new_active() -> Self {
        HazardPointer {
            protected: AtomicPtr::default(),
            next: AtomicPtr::default(),
            active: AtomicBool::new(true),
        }
    }

    fn activate(&self) -> bool {
        !self.active.load(Ordering::Relaxed)
            && self
                .active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

struct Retired<T> {
    ptr: *mut T,
    deleter: unsafe fn(*mut T),
}

struct ThreadLocalInfo<T> {
    retired_list: Vec<Retired<T>>,
}

unsafe impl<T: Send> Send for ThreadLocalInfo<T> {}

impl<T> ThreadLocalInfo<T> {
    fn new() -> Self {
        ThreadLocalInfo {
            retired_list: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HPBRManager;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug)]
    struct Foo {
        data: u8,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Foo {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn foo(data: u8, drops: &Arc<AtomicUsize>) -> *mut Foo {
        Box::into_raw(Box::new(Foo {
            data,
            drops: drops.clone(),
        }))
    }

    #[test]
    fn test_scan_frees_unprotected() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(100);

        unsafe {
            manager.retire(foo(1, &drops));
            manager.retire(foo(2, &drops));
        }
        assert_eq!(manager.retired_number(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        manager.scan();
        assert_eq!(manager.retired_number(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_protected_survives_scan() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(100);
        let record = foo(32, &drops);

        let mut handle = manager.handle();
        handle.protect(record);
        unsafe { manager.retire(record) };
        manager.scan();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(unsafe { (*record).data }, 32);

        handle.unprotect();
        manager.scan();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_reclaim_waits_for_threshold() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(3);

        unsafe {
            manager.retire(foo(1, &drops));
            manager.retire(foo(2, &drops));
        }
        manager.try_reclaim();
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        unsafe { manager.retire(foo(3, &drops)) };
        manager.try_reclaim();
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_handles_are_reused() {
        let manager: HPBRManager<Foo> = HPBRManager::new(100);
        {
            let _first = manager.handle();
            let _second = manager.handle();
            assert_eq!(manager.hazard_pointer_count(), 2);
        }
        let _third = manager.handle();
        let _fourth = manager.handle();
        assert_eq!(manager.hazard_pointer_count(), 2);
        let _fifth = manager.handle();
        assert_eq!(manager.hazard_pointer_count(), 3);
    }

    #[test]
    fn test_dropped_handle_stops_protecting() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(100);
        let record = foo(5, &drops);

        {
            let mut handle = manager.handle();
            handle.protect(record);
            unsafe { manager.retire(record) };
            manager.scan();
            assert_eq!(drops.load(Ordering::SeqCst), 0);
        }

        manager.scan();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_frees_everything_retired() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(100);
        {
            let mut handle = manager.handle();
            let record = foo(9, &drops);
            handle.protect(record);
            unsafe {
                manager.retire(record);
                manager.retire(foo(10, &drops));
            }
        }
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(manager);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    static CUSTOM_DELETES: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_and_free(record: *mut u64) {
        CUSTOM_DELETES.fetch_add(1, Ordering::SeqCst);
        drop(Box::from_raw(record));
    }

    #[test]
    fn test_retire_with_custom_deleter() {
        let manager: HPBRManager<u64> = HPBRManager::new(1);
        unsafe { manager.retire_with(Box::into_raw(Box::new(7)), count_and_free) };
        manager.try_reclaim();
        assert_eq!(CUSTOM_DELETES.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_protection_from_other_thread() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: Arc<HPBRManager<Foo>> = Arc::new(HPBRManager::new(100));
        let record = foo(4, &drops) as usize;

        let (protected_tx, protected_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let manager_clone = manager.clone();
        let reader = thread::spawn(move || {
            let mut handle = manager_clone.handle();
            handle.protect(record as *mut Foo);
            protected_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            let data = unsafe { (*(record as *mut Foo)).data };
            drop(handle);
            data
        });

        protected_rx.recv().unwrap();
        unsafe { manager.retire(record as *mut Foo) };
        manager.scan();
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        assert_eq!(reader.join().unwrap(), 4);

        manager.scan();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
