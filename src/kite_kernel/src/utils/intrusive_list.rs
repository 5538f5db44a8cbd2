//! Intrusive circular doubly linked list over a slice of elements, linked by
//! slot indices.
//!
//! Every task control block lives in a static pool, so a queue only needs to
//! remember the index of its first element, and each element stores the
//! indices of its neighbors. An element can be on at most one list per link
//! field.
use core::fmt;

use super::Init;

/// Circular linked list header.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ListHead {
    pub first: Option<usize>,
}

impl fmt::Debug for ListHead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListHead({:?})", &self.first)
    }
}

impl Init for ListHead {
    const INIT: Self = Self { first: None };
}

impl ListHead {
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Links to neighbor items.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link {
    pub prev: usize,
    pub next: usize,
}

pub trait CellLike<Key> {
    type Target;

    fn get(&self, key: &Key) -> Self::Target;
    fn set(&self, key: &mut Key, value: Self::Target);

    #[inline]
    fn modify<T>(&self, key: &mut Key, f: impl FnOnce(&mut Self::Target) -> T) -> T
    where
        Self: Sized,
    {
        let mut x = self.get(key);
        let ret = f(&mut x);
        self.set(key, x);
        ret
    }
}

impl<Element: Copy> CellLike<()> for core::cell::Cell<Element> {
    type Target = Element;

    fn get(&self, _: &()) -> Self::Target {
        self.get()
    }
    fn set(&self, _: &mut (), value: Self::Target) {
        self.set(value);
    }
}

impl<Key, Element: CellLike<Key>> CellLike<Key> for &Element {
    type Target = Element::Target;

    fn get(&self, key: &Key) -> Self::Target {
        (*self).get(key)
    }
    fn set(&self, key: &mut Key, value: Self::Target) {
        (*self).set(key, value);
    }
}

/// An error type indicating inconsistency in a linked list structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InconsistentError;

/// `Cell`-based accessor to a linked list.
pub struct ListAccessorCell<'a, HeadCell, Element, MapLink, CellKey> {
    head: HeadCell,
    pool: &'a [Element],
    map_link: MapLink,
    /// `Key` used to read or write cells.
    cell_key: CellKey,
}

impl<'a, HeadCell, Element, MapLink, LinkCell, CellKey>
    ListAccessorCell<'a, HeadCell, Element, MapLink, CellKey>
where
    HeadCell: CellLike<CellKey, Target = ListHead>,
    MapLink: Fn(&'a Element) -> &'a LinkCell,
    LinkCell: 'a + CellLike<CellKey, Target = Option<Link>>,
{
    pub fn new(head: HeadCell, pool: &'a [Element], map_link: MapLink, cell_key: CellKey) -> Self {
        ListAccessorCell {
            head,
            pool,
            map_link,
            cell_key,
        }
    }

    /// Get the `Key` used to read or write cells.
    pub fn cell_key(&self) -> &CellKey {
        &self.cell_key
    }

    pub fn head(&self) -> ListHead {
        self.head.get(&self.cell_key)
    }

    fn set_head(&mut self, head: ListHead) {
        self.head.set(&mut self.cell_key, head);
    }

    pub fn is_empty(&self) -> bool {
        self.head().is_empty()
    }

    fn link(&self, i: usize) -> Result<&'a LinkCell, InconsistentError> {
        self.pool.get(i).map(&self.map_link).ok_or(InconsistentError)
    }

    fn get_link(&self, i: usize) -> Result<Link, InconsistentError> {
        self.link(i)?.get(&self.cell_key).ok_or(InconsistentError)
    }

    /// Return `true` if `item` is linked to any list through this accessor's
    /// link field.
    pub fn is_linked(&self, item: usize) -> Result<bool, InconsistentError> {
        Ok(self.link(item)?.get(&self.cell_key).is_some())
    }

    #[inline]
    pub fn front(&self) -> Option<usize> {
        self.head().first
    }

    #[cfg(test)]
    pub fn back(&self) -> Result<Option<usize>, InconsistentError> {
        self.head()
            .first
            .map(|p| Ok(self.get_link(p)?.prev))
            .transpose()
    }

    /// Insert `item` to the list's back. `item` must not be linked.
    pub fn push_back(&mut self, item: usize) -> Result<(), InconsistentError> {
        if self.is_linked(item)? {
            return Err(InconsistentError);
        }

        let mut head = self.head();

        if let Some(first) = head.first {
            let prev = self.get_link(first)?.prev;
            self.link(prev)?.modify(&mut self.cell_key, |l| {
                l.as_mut().ok_or(InconsistentError)?.next = item;
                Ok::<(), InconsistentError>(())
            })?;
            self.link(first)?.modify(&mut self.cell_key, |l| {
                l.as_mut().ok_or(InconsistentError)?.prev = item;
                Ok::<(), InconsistentError>(())
            })?;
            self.link(item)?.set(
                &mut self.cell_key,
                Some(Link {
                    prev,
                    next: first,
                }),
            );
        } else {
            self.link(item)?.set(
                &mut self.cell_key,
                Some(Link {
                    prev: item,
                    next: item,
                }),
            );

            head.first = Some(item);
            self.set_head(head);
        }

        Ok(())
    }

    /// Remove `item` from the list. `item` must be an element of this list.
    pub fn remove(&mut self, item: usize) -> Result<(), InconsistentError> {
        let link = self.get_link(item)?;
        let mut head = self.head();

        if head.first == Some(item) {
            if link.next == item {
                // The list just became empty
                head.first = None;
                self.set_head(head);
                self.link(item)?.set(&mut self.cell_key, None);
                return Ok(());
            }

            head.first = Some(link.next);
            self.set_head(head);
        }

        self.link(link.prev)?.modify(&mut self.cell_key, |l| {
            l.as_mut().ok_or(InconsistentError)?.next = link.next;
            Ok::<(), InconsistentError>(())
        })?;
        self.link(link.next)?.modify(&mut self.cell_key, |l| {
            l.as_mut().ok_or(InconsistentError)?.prev = link.prev;
            Ok::<(), InconsistentError>(())
        })?;
        self.link(item)?.set(&mut self.cell_key, None);

        Ok(())
    }

    #[cfg(test)]
    pub fn pop_front(&mut self) -> Result<Option<usize>, InconsistentError> {
        match self.front() {
            Some(item) => {
                self.remove(item)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Move the first element to the back. Since the list is circular, this
    /// only advances the head.
    pub fn rotate(&mut self) -> Result<(), InconsistentError> {
        let mut head = self.head();
        if let Some(first) = head.first {
            head.first = Some(self.get_link(first)?.next);
            self.set_head(head);
        }
        Ok(())
    }

    /// Get the next element of the specified element.
    #[inline]
    pub fn next(&self, i: usize) -> Result<Option<usize>, InconsistentError> {
        let next = self.get_link(i)?.next;
        Ok(if Some(next) == self.head().first {
            None
        } else {
            Some(next)
        })
    }

    pub fn iter(&self) -> Iter<'_, 'a, HeadCell, Element, MapLink, CellKey> {
        Iter {
            next: self.head().first,
            accessor: self,
        }
    }

    /// Get the element at slot `i` of the pool.
    pub fn element(&self, i: usize) -> Option<&'a Element> {
        self.pool.get(i)
    }
}

/// An iterator over the element indices of `ListAccessorCell`.
pub struct Iter<'b, 'a, HeadCell, Element, MapLink, CellKey> {
    accessor: &'b ListAccessorCell<'a, HeadCell, Element, MapLink, CellKey>,
    next: Option<usize>,
}

impl<'a, HeadCell, Element, MapLink, LinkCell, CellKey> Iterator
    for Iter<'_, 'a, HeadCell, Element, MapLink, CellKey>
where
    HeadCell: CellLike<CellKey, Target = ListHead>,
    MapLink: Fn(&'a Element) -> &'a LinkCell,
    LinkCell: 'a + CellLike<CellKey, Target = Option<Link>>,
{
    type Item = Result<usize, InconsistentError>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = match self.accessor.next(current) {
            Ok(x) => x,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct El(u32, Cell<Option<Link>>);

    fn pool(len: u32) -> Vec<El> {
        (0..len).map(|i| El(i, Cell::new(None))).collect()
    }

    macro_rules! get_accessor {
        ($head:expr, $pool:expr) => {
            ListAccessorCell::new($head, &$pool[..], |El(_, link)| link, ())
        };
    }

    fn values(head: &Cell<ListHead>, pool: &[El]) -> Vec<u32> {
        let accessor = get_accessor!(head, pool);
        accessor
            .iter()
            .map(|i| pool[i.unwrap()].0)
            .collect()
    }

    #[test]
    fn push_remove() {
        let pool = pool(3);
        let head = Cell::new(ListHead::INIT);

        let mut accessor = get_accessor!(&head, pool);
        accessor.push_back(1).unwrap();
        accessor.push_back(0).unwrap();
        accessor.push_back(2).unwrap();
        assert_eq!(accessor.front(), Some(1));
        assert_eq!(accessor.back().unwrap(), Some(2));
        assert_eq!(accessor.next(1).unwrap(), Some(0));
        assert_eq!(accessor.next(2).unwrap(), None);
        assert_eq!(values(&head, &pool), [1, 0, 2]);

        let mut accessor = get_accessor!(&head, pool);
        accessor.remove(0).unwrap();
        assert_eq!(values(&head, &pool), [1, 2]);

        let mut accessor = get_accessor!(&head, pool);
        accessor.remove(1).unwrap();
        accessor.remove(2).unwrap();
        assert!(accessor.is_empty());
        assert!(pool.iter().all(|e| e.1.get().is_none()));
    }

    #[test]
    fn double_push_is_rejected() {
        let pool = pool(2);
        let head = Cell::new(ListHead::INIT);
        let mut accessor = get_accessor!(&head, pool);
        accessor.push_back(0).unwrap();
        assert_eq!(accessor.push_back(0), Err(InconsistentError));
    }

    #[test]
    fn rotate_moves_head_to_tail() {
        let pool = pool(3);
        let head = Cell::new(ListHead::INIT);
        let mut accessor = get_accessor!(&head, pool);
        for i in 0..3 {
            accessor.push_back(i).unwrap();
        }
        accessor.rotate().unwrap();
        assert_eq!(values(&head, &pool), [1, 2, 0]);

        let mut accessor = get_accessor!(&head, pool);
        accessor.rotate().unwrap();
        accessor.rotate().unwrap();
        assert_eq!(values(&head, &pool), [0, 1, 2]);
    }

    #[test]
    fn pop_front_drains() {
        let pool = pool(4);
        let head = Cell::new(ListHead::INIT);
        let mut accessor = get_accessor!(&head, pool);
        for i in [3, 1, 2] {
            accessor.push_back(i).unwrap();
        }
        let mut popped = Vec::new();
        while let Some(i) = accessor.pop_front().unwrap() {
            popped.push(i);
        }
        assert_eq!(popped, [3, 1, 2]);
        assert_eq!(head.get().first, None);
    }
}
