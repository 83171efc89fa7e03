pub(crate) const NONE: u32 = u32::MAX;

enum Entry<T> {
    Vacant { next: u32, generation: u32 },
    Occupied { value: T, generation: u32 },
}

/// Growable slab with generation-checked keys.
///
/// Vacant entries form a LIFO free list. Every removal bumps the entry's
/// generation, so a `(index, generation)` pair held across a removal and
/// a reuse of the same index no longer resolves.
pub(crate) struct Slab<T> {
    entries: Vec<Entry<T>>,
    free_head: u32,
    len: usize,
}

impl<T> Slab<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: NONE,
            len: 0,
        }
    }

    /// Insert a value. Returns `(index, generation)`.
    pub fn insert(&mut self, value: T) -> (u32, u32) {
        self.len += 1;

        if self.free_head == NONE {
            let index = self.entries.len() as u32;
            assert!(index != NONE, "slab index space exhausted");
            self.entries.push(Entry::Occupied {
                value,
                generation: 0,
            });
            return (index, 0);
        }

        let index = self.free_head;
        let entry = &mut self.entries[index as usize];
        let Entry::Vacant { next, generation } = *entry else {
            unreachable!("free list points at occupied entry {index}");
        };

        self.free_head = next;
        *entry = Entry::Occupied { value, generation };
        (index, generation)
    }

    /// Remove by key. Returns `None` if the key is stale.
    pub fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        if !self.contains(index, generation) {
            return None;
        }

        let entry = &mut self.entries[index as usize];
        let old = std::mem::replace(
            entry,
            Entry::Vacant {
                next: self.free_head,
                generation: generation.wrapping_add(1),
            },
        );
        self.free_head = index;
        self.len -= 1;

        match old {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => unreachable!("entry {index} checked occupied"),
        }
    }

    #[inline(always)]
    pub fn contains(&self, index: u32, generation: u32) -> bool {
        matches!(
            self.entries.get(index as usize),
            Some(Entry::Occupied { generation: g, .. }) if *g == generation
        )
    }

    #[inline]
    pub fn get(&self, index: u32, generation: u32) -> Option<&T> {
        match self.entries.get(index as usize) {
            Some(Entry::Occupied { value, generation: g }) if *g == generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        match self.entries.get_mut(index as usize) {
            Some(Entry::Occupied { value, generation: g }) if *g == generation => Some(value),
            _ => None,
        }
    }

    /// Generation of an occupied entry.
    #[inline]
    pub fn generation(&self, index: u32) -> Option<u32> {
        match self.entries.get(index as usize) {
            Some(Entry::Occupied { generation, .. }) => Some(*generation),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl<T> std::ops::Index<u32> for Slab<T> {
    type Output = T;

    #[inline(always)]
    fn index(&self, index: u32) -> &T {
        match &self.entries[index as usize] {
            Entry::Occupied { value, .. } => value,
            Entry::Vacant { .. } => unreachable!("vacant slab entry {index} addressed"),
        }
    }
}

impl<T> std::ops::IndexMut<u32> for Slab<T> {
    #[inline(always)]
    fn index_mut(&mut self, index: u32) -> &mut T {
        match &mut self.entries[index as usize] {
            Entry::Occupied { value, .. } => value,
            Entry::Vacant { .. } => unreachable!("vacant slab entry {index} addressed"),
        }
    }
}
