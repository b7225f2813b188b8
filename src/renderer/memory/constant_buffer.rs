//! Constant Buffer Manager
//!
//! Hands out small uniform ranges carved from pooled allocations of the
//! [`GpuMemoryAllocator`]. Requests are bucketed into size classes; every class
//! owns one or more pools, each a linear sub-allocator over one allocator
//! range.
//!
//! # Buffered constant buffers
//!
//! With [`ConstantBufferFlags::BUFFERED`] the reservation holds one slot per
//! frame in flight and the active slot rotates with the frame index:
//!
//! ```text
//! offset = pool_base + range_offset + (frame_index % frames_in_flight) * slot_size
//! ```
//!
//! The CPU therefore writes frame `f` into a slot the GPU cannot still be
//! reading for frames `f - N + 1 ..= f - 1`, without any locking. Unbuffered
//! constant buffers have a single slot; the caller must make sure the GPU is
//! done with the previous contents before updating them.
//!
//! Constant buffers live as long as the manager. There is no `free`.

use crate::errors::{Result, SirMetalError};
use crate::handle::{BufferHandle, ConstantBufferHandle};
use crate::renderer::device::{BufferFlags, GpuDevice};
use crate::renderer::memory::gpu_allocator::GpuMemoryAllocator;
use crate::renderer::memory::linear::{BufferRange, LinearAllocator};
use crate::settings::{CONSTANT_BUFFER_ALIGNMENT, ConstantBufferSettings};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConstantBufferFlags: u32 {
        /// Replicate the buffer once per frame in flight.
        const BUFFERED = 1 << 0;
    }
}

/// Everything needed to bind a constant buffer to a shader stage.
#[derive(Debug)]
pub struct BindInfo<'a, B> {
    pub buffer: &'a B,
    /// Absolute byte offset inside `buffer`. Always a multiple of 256.
    pub offset: u64,
    /// Binding size: the size the buffer was requested with.
    pub size: u64,
}

impl<B> Clone for BindInfo<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for BindInfo<'_, B> {}

struct Pool {
    buffer: BufferHandle,
    linear: LinearAllocator,
}

struct SizeClass {
    slot_size: u64,
    pools: Vec<Pool>,
}

struct ConstantBufferData {
    class: usize,
    pool: usize,
    range: BufferRange,
    slot_size: u64,
    requested_size: u64,
    flags: ConstantBufferFlags,
}

/// Pooled allocator for small per-draw and per-frame uniform data.
pub struct ConstantBufferManager {
    pool_size: u64,
    frames_in_flight: u32,
    classes: Vec<SizeClass>,
    buffers: Vec<ConstantBufferData>,
}

impl ConstantBufferManager {
    /// Creates the manager with the configured size classes. No pool is
    /// allocated until the first request lands in a class.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    #[must_use]
    pub fn new(settings: &ConstantBufferSettings, frames_in_flight: u32) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        let mut slot_sizes: Vec<u64> = settings
            .size_classes
            .iter()
            .map(|&size| size.max(1).next_multiple_of(CONSTANT_BUFFER_ALIGNMENT))
            .collect();
        slot_sizes.sort_unstable();
        slot_sizes.dedup();

        Self {
            pool_size: settings.pool_size,
            frames_in_flight,
            classes: slot_sizes
                .into_iter()
                .map(|slot_size| SizeClass {
                    slot_size,
                    pools: Vec::new(),
                })
                .collect(),
            buffers: Vec::new(),
        }
    }

    /// Returns the index of the smallest size class whose slot holds `size`
    /// bytes.
    ///
    /// When no class is large enough a new class is added at the next power of
    /// two, provided the whole reservation (one slot per frame in flight when
    /// buffered) fits in a pool. Otherwise the request is rejected with
    /// [`SirMetalError::AllocationTooLarge`]; it is never truncated. Empty
    /// requests fail with [`SirMetalError::ZeroSizedAllocation`].
    pub fn find_allocator(&mut self, size: u64, flags: ConstantBufferFlags) -> Result<usize> {
        if size == 0 {
            return Err(SirMetalError::ZeroSizedAllocation);
        }
        if let Some(index) = self.classes.iter().position(|c| c.slot_size >= size) {
            return Ok(index);
        }

        let slot_size = size
            .next_power_of_two()
            .max(CONSTANT_BUFFER_ALIGNMENT);
        let copies = self.copies(flags);
        if slot_size * copies > self.pool_size {
            return Err(SirMetalError::AllocationTooLarge {
                requested: size,
                max: self.max_request(flags),
            });
        }

        log::debug!("Adding constant buffer size class of {slot_size} bytes");
        self.classes.push(SizeClass {
            slot_size,
            pools: Vec::new(),
        });
        Ok(self.classes.len() - 1)
    }

    /// Reserves a constant buffer of `size` bytes.
    ///
    /// A new pool is requested from `allocator` when every pool of the chosen
    /// class is full; device exhaustion surfaces as
    /// [`SirMetalError::OutOfMemory`]. A `size` of zero is rejected since
    /// the binding would cover no bytes.
    pub fn allocate<D: GpuDevice>(
        &mut self,
        device: &D,
        allocator: &mut GpuMemoryAllocator<D>,
        size: u64,
        flags: ConstantBufferFlags,
    ) -> Result<ConstantBufferHandle> {
        let class_index = self.find_allocator(size, flags)?;
        let copies = self.copies(flags);
        let pool_size = self.pool_size;

        let max = self.max_request(flags);
        let class = &mut self.classes[class_index];
        let slot_size = class.slot_size;
        let reservation = slot_size * copies;
        if reservation > pool_size {
            return Err(SirMetalError::AllocationTooLarge {
                requested: size,
                max,
            });
        }

        let placement = class
            .pools
            .iter_mut()
            .enumerate()
            .find_map(|(index, pool)| pool.linear.allocate(reservation).map(|r| (index, r)));

        let (pool, range) = match placement {
            Some(found) => found,
            None => {
                let mut linear = LinearAllocator::new(pool_size, CONSTANT_BUFFER_ALIGNMENT);
                let Some(range) = linear.allocate(reservation) else {
                    return Err(SirMetalError::AllocationTooLarge {
                        requested: size,
                        max,
                    });
                };
                let name = format!("ConstantBufferPool_{slot_size}_{}", class.pools.len());
                let buffer = allocator.allocate(device, pool_size, &name, BufferFlags::empty())?;
                class.pools.push(Pool { buffer, linear });
                (class.pools.len() - 1, range)
            }
        };

        let handle = ConstantBufferHandle::new(self.buffers.len() as u32);
        self.buffers.push(ConstantBufferData {
            class: class_index,
            pool,
            range,
            slot_size,
            requested_size: size,
            flags,
        });
        Ok(handle)
    }

    /// Copies `data` into the slot used by `frame_index`.
    ///
    /// # Panics
    ///
    /// Panics if the handle was not minted by this manager or if `data` is
    /// larger than the size the buffer was allocated with.
    pub fn update<D: GpuDevice>(
        &self,
        device: &D,
        allocator: &GpuMemoryAllocator<D>,
        handle: ConstantBufferHandle,
        frame_index: u64,
        data: &[u8],
    ) -> Result<()> {
        let cb = self.data(handle);
        assert!(
            data.len() as u64 <= cb.requested_size,
            "update of {} bytes overflows constant buffer {:#010x} of {} bytes",
            data.len(),
            handle.raw(),
            cb.requested_size
        );

        let buffer = self.classes[cb.class].pools[cb.pool].buffer;
        let offset = cb.range.offset + self.rotation_offset(cb, frame_index);
        allocator.write(device, buffer, offset, data)
    }

    /// Typed variant of [`update`](Self::update).
    pub fn update_value<D: GpuDevice, T: bytemuck::Pod>(
        &self,
        device: &D,
        allocator: &GpuMemoryAllocator<D>,
        handle: ConstantBufferHandle,
        frame_index: u64,
        value: &T,
    ) -> Result<()> {
        self.update(
            device,
            allocator,
            handle,
            frame_index,
            bytemuck::bytes_of(value),
        )
    }

    /// Resolves `handle` to the buffer, offset and size to bind for
    /// `frame_index`.
    pub fn get_bind_info<'a, D: GpuDevice>(
        &self,
        allocator: &'a GpuMemoryAllocator<D>,
        handle: ConstantBufferHandle,
        frame_index: u64,
    ) -> Result<BindInfo<'a, D::Buffer>> {
        let cb = self.data(handle);
        let (buffer, base) = allocator.get_buffer(self.classes[cb.class].pools[cb.pool].buffer)?;

        Ok(BindInfo {
            buffer,
            offset: base + cb.range.offset + self.rotation_offset(cb, frame_index),
            size: cb.requested_size,
        })
    }

    #[must_use]
    pub fn is_buffered(&self, handle: ConstantBufferHandle) -> bool {
        self.data(handle)
            .flags
            .contains(ConstantBufferFlags::BUFFERED)
    }

    #[must_use]
    pub fn requested_size(&self, handle: ConstantBufferHandle) -> u64 {
        self.data(handle).requested_size
    }

    /// Slot size of the class the buffer was placed in.
    #[must_use]
    pub fn slot_size(&self, handle: ConstantBufferHandle) -> u64 {
        self.data(handle).slot_size
    }

    /// Slot sizes of all size classes, ascending for the configured ones.
    #[must_use]
    pub fn size_classes(&self) -> Vec<u64> {
        self.classes.iter().map(|c| c.slot_size).collect()
    }

    /// Total number of pools across every size class.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.classes.iter().map(|c| c.pools.len()).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[must_use]
    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    fn copies(&self, flags: ConstantBufferFlags) -> u64 {
        if flags.contains(ConstantBufferFlags::BUFFERED) {
            u64::from(self.frames_in_flight)
        } else {
            1
        }
    }

    fn max_request(&self, flags: ConstantBufferFlags) -> u64 {
        let per_slot = self.pool_size / self.copies(flags);
        if per_slot == 0 {
            return 0;
        }
        // Largest power of two that still fits.
        1 << per_slot.ilog2()
    }

    fn rotation_offset(&self, cb: &ConstantBufferData, frame_index: u64) -> u64 {
        if cb.flags.contains(ConstantBufferFlags::BUFFERED) {
            (frame_index % u64::from(self.frames_in_flight)) * cb.slot_size
        } else {
            0
        }
    }

    fn data(&self, handle: ConstantBufferHandle) -> &ConstantBufferData {
        let index = handle.index();
        assert!(
            index < self.buffers.len(),
            "constant buffer handle {:#010x} was not minted by this manager",
            handle.raw()
        );
        &self.buffers[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;
    use crate::settings::AllocatorSettings;

    fn setup() -> (
        HeadlessDevice,
        GpuMemoryAllocator<HeadlessDevice>,
        ConstantBufferManager,
    ) {
        let device = HeadlessDevice::new();
        let allocator = GpuMemoryAllocator::new(AllocatorSettings::default());
        let manager = ConstantBufferManager::new(&ConstantBufferSettings::default(), 3);
        (device, allocator, manager)
    }

    #[test]
    fn smallest_fitting_class_is_selected() {
        let (_, _, mut manager) = setup();
        let flags = ConstantBufferFlags::empty();

        assert_eq!(manager.find_allocator(1, flags).unwrap(), 0);
        assert_eq!(manager.find_allocator(256, flags).unwrap(), 0);
        assert_eq!(manager.find_allocator(300, flags).unwrap(), 1);
        assert_eq!(manager.find_allocator(4096, flags).unwrap(), 2);
        assert_eq!(manager.size_classes(), vec![256, 1024, 4096]);
    }

    #[test]
    fn classes_share_pools() {
        let (device, mut allocator, mut manager) = setup();

        for _ in 0..4 {
            manager
                .allocate(&device, &mut allocator, 64, ConstantBufferFlags::empty())
                .unwrap();
        }
        assert_eq!(manager.pool_count(), 1);
        assert_eq!(manager.len(), 4);
    }

    #[test]
    fn full_pool_spills_into_a_new_pool() {
        let device = HeadlessDevice::new();
        let mut allocator = GpuMemoryAllocator::new(AllocatorSettings::default());
        let settings = ConstantBufferSettings {
            pool_size: 1024,
            size_classes: vec![256],
        };
        let mut manager = ConstantBufferManager::new(&settings, 3);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                manager
                    .allocate(&device, &mut allocator, 256, ConstantBufferFlags::empty())
                    .unwrap()
            })
            .collect();

        assert_eq!(manager.pool_count(), 2);
        let first = manager.get_bind_info(&allocator, handles[0], 0).unwrap();
        let fifth = manager.get_bind_info(&allocator, handles[4], 0).unwrap();
        assert_ne!(first.offset, fifth.offset);
    }

    #[test]
    #[should_panic(expected = "overflows constant buffer")]
    fn oversized_update_panics() {
        let (device, mut allocator, mut manager) = setup();
        let handle = manager
            .allocate(&device, &mut allocator, 16, ConstantBufferFlags::empty())
            .unwrap();
        let _ = manager.update(&device, &allocator, handle, 0, &[0u8; 32]);
    }
}
