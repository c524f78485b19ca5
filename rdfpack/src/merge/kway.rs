//! K-way merge of N sorted streams over a manual min-heap.
//!
//! The heap holds stream indices only; items stay inside their stream until
//! they are popped. Equal items are ordered by stream index, so the item from
//! the lowest-numbered input comes out first.

use std::cmp::Ordering;

use crate::error::Result;

/// Forward-only sorted stream that can be k-way merged.
pub trait MergeSource {
    type Item;

    /// Current item without advancing; `None` once exhausted.
    fn peek(&self) -> Option<&Self::Item>;

    /// Move past the current item and return it.
    fn advance(&mut self) -> Result<Option<Self::Item>>;

    fn is_exhausted(&self) -> bool {
        self.peek().is_none()
    }
}

/// Adapts any fallible iterator into a [`MergeSource`].
pub struct Peeked<T, I> {
    iter: I,
    head: Option<T>,
}

impl<T, I: Iterator<Item = Result<T>>> Peeked<T, I> {
    pub fn new(mut iter: I) -> Result<Self> {
        let head = iter.next().transpose()?;
        Ok(Peeked { iter, head })
    }
}

impl<T, I: Iterator<Item = Result<T>>> MergeSource for Peeked<T, I> {
    type Item = T;

    #[inline]
    fn peek(&self) -> Option<&T> {
        self.head.as_ref()
    }

    fn advance(&mut self) -> Result<Option<T>> {
        let cur = self.head.take();
        if cur.is_some() {
            self.head = self.iter.next().transpose()?;
        }
        Ok(cur)
    }
}

/// Merges N [`MergeSource`] streams into one sequence ordered by `F`.
pub struct KWayMerge<S: MergeSource, F: Fn(&S::Item, &S::Item) -> Ordering> {
    heap: Vec<usize>,
    streams: Vec<S>,
    cmp: F,
}

impl<S: MergeSource, F: Fn(&S::Item, &S::Item) -> Ordering> KWayMerge<S, F> {
    pub fn new(streams: Vec<S>, cmp: F) -> Self {
        let heap: Vec<usize> = (0..streams.len())
            .filter(|&i| !streams[i].is_exhausted())
            .collect();
        let mut me = Self { heap, streams, cmp };
        if me.heap.len() > 1 {
            let last_internal = (me.heap.len() / 2).saturating_sub(1);
            for i in (0..=last_internal).rev() {
                me.sift_down(i);
            }
        }
        me
    }

    fn head_cmp(&self, a: usize, b: usize) -> Ordering {
        match (self.streams[a].peek(), self.streams[b].peek()) {
            (Some(x), Some(y)) => (self.cmp)(x, y).then(a.cmp(&b)),
            // exhausted streams never stay in the heap
            _ => a.cmp(&b),
        }
    }

    #[inline]
    fn heap_less(&self, i: usize, j: usize) -> bool {
        self.head_cmp(self.heap[i], self.heap[j]) == Ordering::Less
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.heap_less(right, left) {
                smallest = right;
            }
            if !self.heap_less(smallest, pos) {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// Pop the next item in merge order, without deduplication.
    pub fn next_record(&mut self) -> Result<Option<S::Item>> {
        let Some(&idx) = self.heap.first() else {
            return Ok(None);
        };
        let item = self.streams[idx].advance()?;
        if self.streams[idx].is_exhausted() {
            let last = self.heap.len() - 1;
            self.heap.swap(0, last);
            self.heap.pop();
        }
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Ok(item)
    }

    /// Pop the next item, folding every following item that compares equal
    /// into it with `fold`. The kept item is the first one encountered.
    pub fn next_deduped<G>(&mut self, mut fold: G) -> Result<Option<S::Item>>
    where
        G: FnMut(&mut S::Item, S::Item),
    {
        let Some(mut best) = self.next_record()? else {
            return Ok(None);
        };
        while let Some(&idx) = self.heap.first() {
            let equal = match self.streams[idx].peek() {
                Some(next) => (self.cmp)(&best, next) == Ordering::Equal,
                None => false,
            };
            if !equal {
                break;
            }
            if let Some(dup) = self.next_record()? {
                fold(&mut best, dup);
            }
        }
        Ok(Some(best))
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }
}
