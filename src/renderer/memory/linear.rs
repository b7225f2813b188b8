//! Linear Sub-Allocator
//!
//! A pure logical structure that does not hold GPU resources; it only hands
//! out aligned byte ranges from `[0, capacity)` by bumping a cursor.

/// A byte range inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &BufferRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Bump allocator with a fixed alignment.
#[derive(Debug, Clone)]
pub struct LinearAllocator {
    capacity: u64,
    alignment: u64,
    cursor: u64,
}

impl LinearAllocator {
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    #[must_use]
    pub fn new(capacity: u64, alignment: u64) -> Self {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        Self {
            capacity,
            alignment,
            cursor: 0,
        }
    }

    /// Reserves `size` bytes at the next aligned offset, or `None` when the
    /// remaining space is too small.
    pub fn allocate(&mut self, size: u64) -> Option<BufferRange> {
        let offset = self.cursor.next_multiple_of(self.alignment);
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.cursor = end;
        Some(BufferRange { offset, size })
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.capacity
            .saturating_sub(self.cursor.next_multiple_of(self.alignment))
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
