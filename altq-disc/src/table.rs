use altq_common::Arena;
use altq_wire::ClassHandle;

use crate::{Error, Result};

/// Class slots indexed by priority, plus the handle arena mapping handles to slots.
#[derive(Debug)]
pub(crate) struct ClassTable<T, const N: usize> {
    slots: [Option<T>; N],
    handles: Arena<usize>,
    default: Option<usize>,
}

impl<T, const N: usize> Default for ClassTable<T, N> {
    fn default() -> Self {
        Self { slots: std::array::from_fn(|_| None), handles: Arena::new(), default: None }
    }
}

impl<T, const N: usize> ClassTable<T, N> {
    pub(crate) fn check_pri(pri: u8) -> Result<usize> {
        let idx = pri as usize;
        if idx >= N {
            return Err(Error::InvalidPriority { pri, max: N });
        }
        Ok(idx)
    }

    /// Claims a free priority slot and a fresh handle. `make` builds the class from its handle.
    pub(crate) fn insert(
        &mut self,
        pri: u8,
        default: bool,
        make: impl FnOnce(ClassHandle) -> T,
    ) -> Result<ClassHandle> {
        let idx = Self::check_pri(pri)?;
        if self.slots[idx].is_some() {
            return Err(Error::PriorityInUse(pri));
        }
        if default && self.default.is_some() {
            return Err(Error::DefaultClassExists);
        }

        let handle = ClassHandle::new(self.handles.insert(idx));
        self.slots[idx] = Some(make(handle));
        if default {
            self.default = Some(idx);
        }
        Ok(handle)
    }

    pub(crate) fn pri_of(&self, handle: ClassHandle) -> Result<usize> {
        self.handles.get(handle.key()).copied().ok_or(Error::ClassNotFound)
    }

    /// Moves a class to another slot and updates its default flag. Validates everything before
    /// changing anything.
    pub(crate) fn relocate(&mut self, handle: ClassHandle, pri: u8, default: bool) -> Result<usize> {
        let from = self.pri_of(handle)?;
        let to = Self::check_pri(pri)?;
        if to != from && self.slots[to].is_some() {
            return Err(Error::PriorityInUse(pri));
        }
        if default && self.default.is_some_and(|d| d != from) {
            return Err(Error::DefaultClassExists);
        }

        if to != from {
            self.slots[to] = self.slots[from].take();
            if let Some(idx) = self.handles.get_mut(handle.key()) {
                *idx = to;
            }
        }
        if default {
            self.default = Some(to);
        } else if self.default == Some(from) {
            self.default = None;
        }
        Ok(to)
    }

    pub(crate) fn remove(&mut self, handle: ClassHandle) -> Result<T> {
        let idx = self.handles.remove(handle.key()).ok_or(Error::ClassNotFound)?;
        if self.default == Some(idx) {
            self.default = None;
        }
        self.slots[idx].take().ok_or(Error::ClassNotFound)
    }

    /// Empties the table, returning the classes in ascending priority.
    pub(crate) fn clear(&mut self) -> Vec<T> {
        self.handles.clear();
        self.default = None;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx)?.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx)?.as_mut()
    }

    pub(crate) fn by_handle(&self, handle: ClassHandle) -> Option<&T> {
        self.get(self.pri_of(handle).ok()?)
    }

    pub(crate) fn by_handle_mut(&mut self, handle: ClassHandle) -> Option<&mut T> {
        let idx = self.pri_of(handle).ok()?;
        self.get_mut(idx)
    }

    /// Slot of the class a packet belongs to: its attached class if still live, else the
    /// default class.
    pub(crate) fn resolve(&self, class: Option<ClassHandle>) -> Option<usize> {
        class.and_then(|h| self.pri_of(h).ok()).or(self.default)
    }

    #[inline]
    pub(crate) fn default_slot(&self) -> Option<usize> {
        self.default
    }

    /// Occupied slots in ascending priority.
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|c| (i, c)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = (usize, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| s.as_mut().map(|c| (i, c)))
    }

    pub(crate) fn max_pri(&self) -> Option<usize> {
        self.slots.iter().rposition(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_follow_relocation() {
        let mut t: ClassTable<&str, 4> = ClassTable::default();
        let a = t.insert(1, true, |_| "a").unwrap();
        let b = t.insert(2, false, |_| "b").unwrap();
        assert!(matches!(t.insert(2, false, |_| "c"), Err(Error::PriorityInUse(2))));
        assert!(matches!(t.insert(4, false, |_| "c"), Err(Error::InvalidPriority { .. })));
        assert!(matches!(t.insert(0, true, |_| "c"), Err(Error::DefaultClassExists)));

        assert!(matches!(t.relocate(a, 2, true), Err(Error::PriorityInUse(2))));
        assert_eq!(t.relocate(a, 3, true).unwrap(), 3);
        assert_eq!(t.by_handle(a), Some(&"a"));
        assert_eq!(t.default_slot(), Some(3));
        assert_eq!(t.max_pri(), Some(3));

        assert_eq!(t.remove(a).unwrap(), "a");
        assert_eq!(t.default_slot(), None);
        assert_eq!(t.resolve(Some(a)), None);
        assert_eq!(t.resolve(Some(b)), Some(2));
        assert_eq!(t.max_pri(), Some(2));
    }

    #[test]
    fn clear_invalidates_handles() {
        let mut t: ClassTable<u8, 2> = ClassTable::default();
        let h = t.insert(0, true, |_| 9).unwrap();
        assert_eq!(t.clear(), vec![9]);
        assert!(matches!(t.pri_of(h), Err(Error::ClassNotFound)));
        assert_eq!(t.iter().count(), 0);
    }
}
