use alloc::{boxed::Box, vec, vec::Vec};
use core::{cell::UnsafeCell, fmt::Debug};
use spin::RwLock;

/// Append-only storage that hands out references with the lifetime of the
/// collection itself. Entries are boxed so pushes never move them.
pub struct LockedVecStatic<T: ?Sized> {
    lock: RwLock<()>,
    cell: UnsafeCell<Vec<Box<T>>>,
}

unsafe impl<T: ?Sized> Sync for LockedVecStatic<T> {}

impl<T: ?Sized> LockedVecStatic<T> {
    pub const fn new() -> LockedVecStatic<T> {
        LockedVecStatic {
            lock: RwLock::new(()),
            cell: UnsafeCell::new(vec![]),
        }
    }

    pub fn push_boxed(&self, value: Box<T>) -> (&T, usize) {
        let guard = self.lock.write();
        let vec = unsafe { &mut *self.cell.get() };
        let index = vec.len();
        vec.push(value);
        // Entries are never removed or moved once pushed.
        let res = unsafe { &*(vec[index].as_ref() as *const T) };
        drop(guard);
        (res, index)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        let guard = self.lock.read();
        let vec = unsafe { &*self.cell.get() };
        let res = vec.get(index).map(|b| unsafe { &*(b.as_ref() as *const T) });
        drop(guard);
        res
    }

    pub fn len(&self) -> usize {
        let guard = self.lock.read();
        let len = unsafe { &*self.cell.get() }.len();
        drop(guard);
        len
    }
}

impl<T: Sized> LockedVecStatic<T> {
    pub fn push(&self, value: T) -> (&T, usize) {
        self.push_boxed(Box::new(value))
    }
}

impl<T: ?Sized + Debug> Debug for LockedVecStatic<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let guard = self.lock.read();
        let vec = unsafe { &*self.cell.get() };
        let res = f.debug_list().entries(vec.iter()).finish();
        drop(guard);
        res
    }
}
