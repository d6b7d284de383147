//! Index-addressed object heap with mark/sweep collection
//!
//! Cells are addressed by slot index so that values can carry a plain `u32`
//! in their payload. Freed slots are recycled through a free list.

use crate::object::RObject;

/// Reference to a heap cell
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Rebuild a reference from a slot index
    #[inline]
    pub const fn from_index(index: u32) -> Self {
        ObjRef(index)
    }

    /// Slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

struct HeapCell {
    marked: bool,
    obj: RObject,
}

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,
    /// Total objects freed
    pub objects_freed: usize,
}

/// Object heap
#[derive(Default)]
pub struct Heap {
    cells: Vec<Option<HeapCell>>,
    free: Vec<u32>,
    live: usize,
    allocated_since_gc: usize,
    stats: GcStats,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `obj` in a free slot
    pub fn alloc(&mut self, obj: RObject) -> ObjRef {
        let cell = Some(HeapCell { marked: false, obj });
        let index = match self.free.pop() {
            Some(index) => {
                self.cells[index as usize] = cell;
                index
            }
            None => {
                self.cells.push(cell);
                (self.cells.len() - 1) as u32
            }
        };
        self.live += 1;
        self.allocated_since_gc += 1;
        ObjRef(index)
    }

    /// Borrow a live object
    #[inline]
    pub fn get(&self, r: ObjRef) -> Option<&RObject> {
        self.cells.get(r.0 as usize)?.as_ref().map(|c| &c.obj)
    }

    /// Mutably borrow a live object
    #[inline]
    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut RObject> {
        self.cells.get_mut(r.0 as usize)?.as_mut().map(|c| &mut c.obj)
    }

    /// Number of live cells
    pub fn live(&self) -> usize {
        self.live
    }

    /// Allocations since the last collection
    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    /// Collection statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Mark everything reachable from `roots`, then free the rest.
    ///
    /// Returns the number of cells freed. Freed data cells run their
    /// destructors here.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = ObjRef>) -> usize {
        let mut worklist: Vec<ObjRef> = roots.into_iter().collect();
        while let Some(r) = worklist.pop() {
            let Some(Some(cell)) = self.cells.get_mut(r.0 as usize) else {
                continue;
            };
            if cell.marked {
                continue;
            }
            cell.marked = true;
            cell.obj.trace(&mut worklist);
        }

        let mut freed = 0;
        for (index, slot) in self.cells.iter_mut().enumerate() {
            let Some(cell) = slot.as_mut() else {
                continue;
            };
            if cell.marked {
                cell.marked = false;
                continue;
            }
            // Dropping the cell runs RData's destructor.
            *slot = None;
            self.free.push(index as u32);
            freed += 1;
        }

        self.live -= freed;
        self.allocated_since_gc = 0;
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        freed
    }

    /// Drop every cell
    pub fn clear(&mut self) {
        self.cells.clear();
        self.free.clear();
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ClassKind, RClass};

    fn string(s: &str) -> RObject {
        RObject::String {
            bytes: s.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_alloc_and_get() {
        let mut heap = Heap::new();
        let r = heap.alloc(string("hi"));
        assert!(matches!(heap.get(r), Some(RObject::String { bytes }) if bytes == b"hi"));
        assert_eq!(heap.live(), 1);
    }

    #[test]
    fn test_collect_frees_unreachable() {
        let mut heap = Heap::new();
        let kept = heap.alloc(string("kept"));
        let dropped = heap.alloc(string("dropped"));
        let freed = heap.collect([kept]);
        assert_eq!(freed, 1);
        assert!(heap.get(kept).is_some());
        assert!(heap.get(dropped).is_none());
        assert_eq!(heap.stats().collections, 1);
    }

    #[test]
    fn test_collect_traces_through_objects() {
        let mut heap = Heap::new();
        let class = heap.alloc(RObject::Class(RClass::new(None, ClassKind::Class, None, None)));
        let inst = heap.alloc(RObject::Instance { class });
        assert_eq!(heap.collect([inst]), 0);
        assert!(heap.get(class).is_some());
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let mut heap = Heap::new();
        let a = heap.alloc(string("a"));
        heap.collect([]);
        let b = heap.alloc(string("b"));
        assert_eq!(a, b);
        assert_eq!(heap.live(), 1);
    }
}
