//! Filtered, lazy iteration over one element kind.

use crate::topology::element::ElemRecord;
use crate::topology::grid::{GridElem, Slots};
use std::marker::PhantomData;

/// Restricts an element iteration by level, subset and leaf status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ElemFilter {
    pub level: Option<usize>,
    pub subset: Option<i32>,
    /// Only elements without children (the surface grid).
    pub leaves_only: bool,
}

impl ElemFilter {
    /// Every live element.
    pub fn all() -> Self {
        Self::default()
    }

    /// Elements of a single level.
    pub fn level(level: usize) -> Self {
        Self {
            level: Some(level),
            ..Self::default()
        }
    }

    /// Elements without children.
    pub fn leaves() -> Self {
        Self {
            leaves_only: true,
            ..Self::default()
        }
    }

    pub fn with_subset(mut self, subset: i32) -> Self {
        self.subset = Some(subset);
        self
    }

    pub fn with_level(mut self, level: usize) -> Self {
        self.level = Some(level);
        self
    }

    #[inline]
    fn accepts<R: ElemRecord>(&self, rec: &R) -> bool {
        let info = rec.info();
        self.level.is_none_or(|l| info.level() == l)
            && self.subset.is_none_or(|s| info.subset() == s)
            && !(self.leaves_only && info.has_children())
    }
}

/// Iterator over the handles of live elements passing an [`ElemFilter`],
/// in slot order.
pub struct ElemIter<'a, H: GridElem> {
    slots: &'a Slots<H::Record>,
    filter: ElemFilter,
    next: usize,
    _marker: PhantomData<H>,
}

impl<'a, H: GridElem> ElemIter<'a, H> {
    pub(crate) fn new(slots: &'a Slots<H::Record>, filter: ElemFilter) -> Self {
        Self {
            slots,
            filter,
            next: 0,
            _marker: PhantomData,
        }
    }
}

impl<H: GridElem> Clone for ElemIter<'_, H> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots,
            filter: self.filter,
            next: self.next,
            _marker: PhantomData,
        }
    }
}

impl<H: GridElem> Iterator for ElemIter<'_, H> {
    type Item = H;

    fn next(&mut self) -> Option<H> {
        while self.next < self.slots.capacity() {
            let index = self.next;
            self.next += 1;
            if let Some((rec, generation)) = self.slots.at(index) {
                if self.filter.accepts(rec) {
                    return Some(H::from_parts(index, generation));
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.capacity() - self.next))
    }
}
