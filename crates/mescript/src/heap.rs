//! Reference-counted arena for heap values.
//!
//! Strings and files live here; everything else is an immediate `Value`
//! variant. Entries are recycled through a free list. Reference counts are
//! driven explicitly by the VM through `inc_ref`/`dec_ref`; `Value` carries
//! the discipline via `clone_with_heap`/`drop_with_heap`.

use std::fs::File;

/// Index of an entry in the heap arena.
pub type HeapId = usize;

/// An open (or already closed) script-level file.
#[derive(Debug)]
pub struct MeFile {
    pub name: String,
    /// `None` once `close()` has run.
    pub handle: Option<File>,
}

/// Payload of a heap entry.
#[derive(Debug)]
pub enum HeapData {
    Str(String),
    File(MeFile),
}

#[derive(Debug)]
struct HeapEntry {
    refcount: usize,
    data: HeapData,
}

/// The arena. `entries[id] == None` marks a freed slot awaiting reuse.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `data` with a reference count of 1.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let entry = HeapEntry { refcount: 1, data };
        match self.free_list.pop() {
            Some(id) => {
                self.entries[id] = Some(entry);
                id
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    pub fn inc_ref(&mut self, id: HeapId) {
        let entry = self.entry_mut(id);
        entry.refcount += 1;
    }

    /// Drops one reference, freeing the entry when the count reaches zero.
    pub fn dec_ref(&mut self, id: HeapId) {
        let entry = self.entry_mut(id);
        if entry.refcount > 1 {
            entry.refcount -= 1;
        } else {
            self.entries[id] = None;
            self.free_list.push(id);
        }
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id)
            .and_then(Option::as_ref)
            .expect("access to freed heap entry")
            .data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entry_mut(id).data
    }

    /// Current reference count of a live entry. Test hook.
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id)
            .and_then(Option::as_ref)
            .expect("access to freed heap entry")
            .refcount
    }

    /// Number of live entries. A balanced run drains back to zero.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    fn entry_mut(&mut self, id: HeapId) -> &mut HeapEntry {
        self.entries
            .get_mut(id)
            .and_then(Option::as_mut)
            .expect("access to freed heap entry")
    }
}
