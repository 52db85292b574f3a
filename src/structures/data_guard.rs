use crate::memory::HPHandle;
use std::fmt;
use std::fmt::Debug;
use std::ops::Deref;

/// A reference to an element of a structure, valid for as long as the guard lives.
///
/// The guard owns the hazard pointer protecting the node `N` that stores the element, so the
/// element stays readable even if another thread removes it from the structure meanwhile.
pub struct DataGuard<'a, T: 'a, N: Send + 'a> {
    data: &'a T,
    _handle: HPHandle<'a, N>,
}

impl<'a, T: 'a, N: Send> DataGuard<'a, T, N> {
    pub(crate) fn new(data: &'a T, handle: HPHandle<'a, N>) -> DataGuard<'a, T, N> {
        DataGuard {
            data,
            _handle: handle,
        }
    }

    pub fn data(&self) -> &T {
        self.data
    }
}

impl<'a, T: Clone + 'a, N: Send> DataGuard<'a, T, N> {
    pub fn cloned(self) -> T {
        self.data.clone()
    }
}

impl<'a, T: 'a, N: Send> Deref for DataGuard<'a, T, N> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data
    }
}

impl<'a, T: Debug + 'a, N: Send> Debug for DataGuard<'a, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DataGuard({:?})", self.data)
    }
}

impl<'a, T: PartialEq + 'a, N: Send> PartialEq<T> for DataGuard<'a, T, N> {
    fn eq(&self, other: &T) -> bool {
        self.data == other
    }
}
