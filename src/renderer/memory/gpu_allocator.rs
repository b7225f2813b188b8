//! GPU Memory Allocator
//!
//! Owns a set of large device buffers ("pages") and carves them into
//! sub-allocations addressed by [`BufferHandle`]s. One real allocation per
//! logical buffer is avoided: ray buffers, mesh buffers and constant buffer
//! pools all live inside a handful of pages.
//!
//! # Layout
//!
//! ```text
//! Page 0 (CPU visible, 16 MiB)  [ h1 | h2 |   free   | h4 |      free      ]
//! Page 1 (GPU only,    16 MiB)  [        h3        |         free         ]
//! Page 2 (GPU only,    40 MiB)  [                 h5 (dedicated)         ]
//! ```
//!
//! Pages are segregated by [`BufferFlags`]; each page keeps a sorted list of
//! free ranges, allocation is first fit and freeing coalesces neighbours.
//! Requests larger than the page size get a dedicated page.
//!
//! # Handle lifetime
//!
//! The 24-bit handle index packs a slot (low 16 bits) and the slot's
//! generation (high 8 bits):
//!
//! ```text
//! handle index  [ generation : 8 | slot : 16 ]
//! ```
//!
//! Freeing a handle bumps its slot's generation and queues the slot for
//! reuse, so a stale handle resolves to [`SirMetalError::StaleHandle`] rather
//! than to whatever data later took over its bytes. Freed slots are reused
//! oldest first; a stale handle can only alias once its slot has been
//! recycled 256 times.

use std::collections::VecDeque;

use crate::errors::{Result, SirMetalError};
use crate::handle::{BufferHandle, MAX_HANDLE_INDEX};
use crate::renderer::device::{BufferDescriptor, BufferFlags, GpuDevice};
use crate::renderer::memory::linear::BufferRange;
use crate::settings::AllocatorSettings;

const SLOT_BITS: u32 = 16;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
const GENERATION_MASK: u32 = MAX_HANDLE_INDEX >> SLOT_BITS;

/// Number of allocations that can be live at the same time.
pub const MAX_LIVE_ALLOCATIONS: usize = 1 << SLOT_BITS;

struct Page<B> {
    buffer: B,
    size: u64,
    flags: BufferFlags,
    /// Sorted by offset, never adjacent (coalesced on free).
    free_ranges: Vec<BufferRange>,
}

impl<B> Page<B> {
    fn carve(&mut self, size: u64) -> Option<BufferRange> {
        let slot = self.free_ranges.iter().position(|r| r.size >= size)?;
        let free = &mut self.free_ranges[slot];
        let range = BufferRange {
            offset: free.offset,
            size,
        };
        free.offset += size;
        free.size -= size;
        if free.size == 0 {
            self.free_ranges.remove(slot);
        }
        Some(range)
    }

    fn release(&mut self, range: BufferRange) {
        let slot = self
            .free_ranges
            .partition_point(|r| r.offset < range.offset);
        self.free_ranges.insert(slot, range);

        if slot + 1 < self.free_ranges.len()
            && self.free_ranges[slot].end() == self.free_ranges[slot + 1].offset
        {
            let next = self.free_ranges.remove(slot + 1);
            self.free_ranges[slot].size += next.size;
        }
        if slot > 0 && self.free_ranges[slot - 1].end() == self.free_ranges[slot].offset {
            let current = self.free_ranges.remove(slot);
            self.free_ranges[slot - 1].size += current.size;
        }
    }

    fn free_bytes(&self) -> u64 {
        self.free_ranges.iter().map(|r| r.size).sum()
    }
}

/// Placement of a live sub-allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Index of the page holding the range.
    pub page: usize,
    /// Byte range inside the page, rounded to the allocator granularity.
    pub range: BufferRange,
    /// Size the caller asked for.
    pub requested_size: u64,
    pub flags: BufferFlags,
    pub name: String,
}

struct Slot {
    generation: u32,
    info: Option<AllocationInfo>,
}

/// Paged sub-allocator over device buffers.
///
/// The allocator does not keep the device; every call that may touch the GPU
/// receives it explicitly.
pub struct GpuMemoryAllocator<D: GpuDevice> {
    settings: AllocatorSettings,
    pages: Vec<Page<D::Buffer>>,
    /// Indexed by the slot part of a handle.
    slots: Vec<Slot>,
    /// Freed slots, oldest first.
    free_slots: VecDeque<u32>,
}

impl<D: GpuDevice> GpuMemoryAllocator<D> {
    /// No pages are created until the first allocation.
    #[must_use]
    pub fn new(settings: AllocatorSettings) -> Self {
        Self {
            settings,
            pages: Vec::new(),
            slots: Vec::new(),
            free_slots: VecDeque::new(),
        }
    }

    /// Reserves `size` bytes and returns the handle of the new range.
    ///
    /// The size is rounded up to the allocator granularity. An existing page
    /// with the same flags is reused when it has a large enough free range,
    /// otherwise a new page is created. Device exhaustion is returned as
    /// [`SirMetalError::OutOfMemory`]; no retry is attempted. With
    /// [`MAX_LIVE_ALLOCATIONS`] handles live the request fails with
    /// [`SirMetalError::HandlesExhausted`] before any memory is reserved.
    pub fn allocate(
        &mut self,
        device: &D,
        size: u64,
        name: &str,
        flags: BufferFlags,
    ) -> Result<BufferHandle> {
        if self.free_slots.is_empty() && self.slots.len() >= MAX_LIVE_ALLOCATIONS {
            return Err(SirMetalError::HandlesExhausted {
                max: MAX_LIVE_ALLOCATIONS,
            });
        }
        let aligned = size.max(1).next_multiple_of(self.settings.granularity);

        let placement = self
            .pages
            .iter_mut()
            .enumerate()
            .filter(|(_, page)| page.flags == flags)
            .find_map(|(index, page)| page.carve(aligned).map(|range| (index, range)));

        let (page, range) = match placement {
            Some(found) => found,
            None => self.create_page(device, aligned, flags, name)?,
        };

        let slot = match self.free_slots.pop_front() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    info: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        entry.info = Some(AllocationInfo {
            page,
            range,
            requested_size: size,
            flags,
            name: name.to_string(),
        });
        let handle = BufferHandle::new((entry.generation << SLOT_BITS) | slot);

        log::trace!(
            "Allocated '{name}' ({size} bytes) in page {page} at offset {}",
            range.offset
        );
        Ok(handle)
    }

    /// Returns the range of `handle` to its page. The handle becomes stale.
    pub fn free(&mut self, handle: BufferHandle) -> Result<()> {
        let (slot, generation) = Self::unpack(handle);
        let entry = self.slot_mut(handle, slot);
        if entry.generation != generation {
            return Err(SirMetalError::StaleHandle(handle.raw()));
        }
        let info = entry
            .info
            .take()
            .ok_or(SirMetalError::StaleHandle(handle.raw()))?;
        entry.generation = (entry.generation + 1) & GENERATION_MASK;
        self.free_slots.push_back(slot);
        self.pages[info.page].release(info.range);
        Ok(())
    }

    /// Resolves a handle to the page buffer and the base offset of its range.
    pub fn get_buffer(&self, handle: BufferHandle) -> Result<(&D::Buffer, u64)> {
        let info = self.info(handle)?;
        Ok((&self.pages[info.page].buffer, info.range.offset))
    }

    /// Range of `handle` inside its page.
    pub fn range(&self, handle: BufferHandle) -> Result<BufferRange> {
        Ok(self.info(handle)?.range)
    }

    /// Placement of a live allocation.
    pub fn info(&self, handle: BufferHandle) -> Result<&AllocationInfo> {
        let (slot, generation) = Self::unpack(handle);
        assert!(
            (slot as usize) < self.slots.len(),
            "buffer handle {:#010x} was not minted by this allocator",
            handle.raw()
        );
        let entry = &self.slots[slot as usize];
        entry
            .info
            .as_ref()
            .filter(|_| entry.generation == generation)
            .ok_or(SirMetalError::StaleHandle(handle.raw()))
    }

    /// Copies `data` into the allocation at `offset` (relative to its start).
    ///
    /// `offset` must be a multiple of [`wgpu::COPY_BUFFER_ALIGNMENT`]; the
    /// length may be anything, the device pads the copy inside the range.
    pub fn write(&self, device: &D, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let info = self.info(handle)?;
        if !info.flags.is_cpu_visible() {
            return Err(SirMetalError::NotCpuVisible);
        }

        let len = data.len() as u64;
        if offset + len > info.range.size {
            return Err(SirMetalError::WriteOutOfBounds {
                offset,
                len,
                size: info.range.size,
            });
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(SirMetalError::BufferWrite {
                offset,
                details: format!(
                    "offset is not a multiple of {} bytes",
                    wgpu::COPY_BUFFER_ALIGNMENT
                ),
            });
        }

        device.write_buffer(&self.pages[info.page].buffer, info.range.offset + offset, data)
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn page_size(&self, page: usize) -> u64 {
        self.pages[page].size
    }

    #[must_use]
    pub fn page_free_bytes(&self, page: usize) -> u64 {
        self.pages[page].free_bytes()
    }

    /// Number of handles that are still live.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.live().count()
    }

    /// Bytes held by live allocations, including granularity padding.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.live().map(|a| a.range.size).sum()
    }

    /// Drops every page. All outstanding handles become stale and their
    /// slots are queued for reuse.
    pub fn clear(&mut self) {
        self.pages.clear();
        for (index, entry) in self.slots.iter_mut().enumerate() {
            if entry.info.take().is_some() {
                entry.generation = (entry.generation + 1) & GENERATION_MASK;
                self.free_slots.push_back(index as u32);
            }
        }
    }

    /// Creates a page and carves the first `first_alloc` bytes out of it.
    fn create_page(
        &mut self,
        device: &D,
        first_alloc: u64,
        flags: BufferFlags,
        name: &str,
    ) -> Result<(usize, BufferRange)> {
        let size = self.settings.page_size.max(first_alloc);
        let index = self.pages.len();
        let label = format!("GpuPage{index}");

        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: &label,
                size,
                usage: flags.page_usages(),
            })
            .inspect_err(|e| log::error!("Could not create page for '{name}': {e}"))?;

        log::info!("GPU allocator: created page {index} ({size} bytes, {flags:?})");
        let mut free_ranges = Vec::new();
        if size > first_alloc {
            free_ranges.push(BufferRange {
                offset: first_alloc,
                size: size - first_alloc,
            });
        }
        self.pages.push(Page {
            buffer,
            size,
            flags,
            free_ranges,
        });

        let range = BufferRange {
            offset: 0,
            size: first_alloc,
        };
        Ok((index, range))
    }

    fn live(&self) -> impl Iterator<Item = &AllocationInfo> {
        self.slots.iter().filter_map(|entry| entry.info.as_ref())
    }

    /// Splits a handle into (slot, generation).
    fn unpack(handle: BufferHandle) -> (u32, u32) {
        let index = handle.index() as u32;
        (index & SLOT_MASK, index >> SLOT_BITS)
    }

    fn slot_mut(&mut self, handle: BufferHandle, slot: u32) -> &mut Slot {
        assert!(
            (slot as usize) < self.slots.len(),
            "buffer handle {:#010x} was not minted by this allocator",
            handle.raw()
        );
        &mut self.slots[slot as usize]
    }
}
