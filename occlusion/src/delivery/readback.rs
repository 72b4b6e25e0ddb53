use std::time::Duration;

use occlusion_types::{BufferRange, FenceHandle, MappingHandle};
use smallvec::SmallVec;

use crate::{
    delivery::all_visible,
    executor::{CommandExecutor, Stage},
    util::math::bit_words,
    CullError,
};

/// Copies the bitset into a staging buffer and reads it back with a full stall.
///
/// Simple and always correct, meant as a reference and for debugging.
#[derive(Debug)]
pub struct ReadbackBlocking {
    staging: BufferRange,
    words: u32,
    host: Vec<u32>,
}

impl ReadbackBlocking {
    /// `staging` must be readable by [`CommandExecutor::read_buffer`] and hold the whole bitset.
    pub fn new(staging: BufferRange) -> Self {
        Self {
            staging,
            words: 0,
            host: Vec::new(),
        }
    }

    pub(super) fn materialize<E: CommandExecutor + ?Sized>(&mut self, exec: &mut E, bits: BufferRange, object_count: u32) {
        profiling::scope!("readback blocking");

        self.words = bit_words(object_count);
        let bytes = self.words as u64 * 4;
        assert!(
            self.staging.size >= bytes,
            "readback staging of {} bytes cannot hold {} bitset words",
            self.staging.size,
            self.words
        );
        if bytes == 0 {
            return;
        }
        exec.copy_buffer(bits.slice(0, bytes), self.staging.slice(0, bytes));
        exec.barrier(Stage::Transfer, Stage::Host);
    }

    pub(super) fn client_sync<E: CommandExecutor + ?Sized>(&mut self, exec: &mut E) -> Result<(), CullError> {
        profiling::scope!("readback blocking sync");

        self.host.resize(self.words as usize, 0);
        if self.words == 0 {
            return Ok(());
        }
        exec.read_buffer(self.staging.slice(0, self.words as u64 * 4), &mut self.host)
    }

    pub fn bits(&self) -> &[u32] {
        &self.host
    }

    pub(super) fn reset_host_bits(&mut self, object_count: u32) {
        all_visible(&mut self.host, object_count);
    }
}

#[derive(Debug)]
struct FencedSlot {
    range: BufferRange,
    mapping: MappingHandle,
    fence: Option<FenceHandle>,
    words: u32,
}

/// Copies the bitset into one of several persistently mapped buffers and
/// reads it back once the slot's fence signals.
///
/// With N slots the host can read frame `f - 1` while the device is still
/// writing frame `f`. A slot is only ever rewritten after its previous fence
/// was waited on, so the device never writes a slot the host may still read.
#[derive(Debug)]
pub struct ReadbackFenced {
    slots: SmallVec<[FencedSlot; 4]>,
    next: usize,
    latest: Option<usize>,
    timeout: Duration,
    host: Vec<u32>,
}

impl ReadbackFenced {
    /// Maps every range in `slots` for the lifetime of the executor.
    ///
    /// # Panics
    ///
    /// Panics if fewer than two slots are given.
    pub fn new<E: CommandExecutor + ?Sized>(
        exec: &mut E,
        slots: impl IntoIterator<Item = BufferRange>,
        timeout: Duration,
    ) -> Result<Self, CullError> {
        let slots = slots
            .into_iter()
            .map(|range| {
                Ok(FencedSlot {
                    range,
                    mapping: exec.map_persistent(range)?,
                    fence: None,
                    words: 0,
                })
            })
            .collect::<Result<SmallVec<_>, CullError>>()?;
        assert!(slots.len() >= 2, "fenced readback needs at least two slots, got {}", slots.len());

        Ok(Self {
            slots,
            next: 0,
            latest: None,
            timeout,
            host: Vec::new(),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn materialize<E: CommandExecutor + ?Sized>(
        &mut self,
        exec: &mut E,
        bits: BufferRange,
        object_count: u32,
    ) -> Result<(), CullError> {
        profiling::scope!("readback fenced");

        let index = self.next;
        let timeout = self.timeout;
        let slot = &mut self.slots[index];

        if let Some(fence) = slot.fence {
            // The host may not have consumed this slot yet. A failed wait leaves the slot guarded.
            wait(exec, fence, timeout)?;
            exec.delete_fence(fence);
            slot.fence = None;
        }

        let words = bit_words(object_count);
        let bytes = words as u64 * 4;
        assert!(
            slot.range.size >= bytes,
            "readback slot of {} bytes cannot hold {} bitset words",
            slot.range.size,
            words
        );
        if bytes != 0 {
            exec.copy_buffer(bits.slice(0, bytes), slot.range.slice(0, bytes));
            exec.barrier(Stage::Transfer, Stage::Host);
        }
        slot.words = words;
        slot.fence = Some(exec.create_fence());

        self.latest = Some(index);
        self.next = (index + 1) % self.slots.len();
        Ok(())
    }

    pub(super) fn client_sync<E: CommandExecutor + ?Sized>(&mut self, exec: &mut E) -> Result<(), CullError> {
        profiling::scope!("readback fenced sync");

        let Some(index) = self.latest else {
            return Ok(());
        };
        let slot = &self.slots[index];
        if let Some(fence) = slot.fence {
            wait(exec, fence, self.timeout)?;
        }
        let words = slot.words as usize;
        let mapped = exec.mapped_words(slot.mapping)?;
        self.host.clear();
        self.host.extend_from_slice(&mapped[..words]);
        Ok(())
    }

    pub fn bits(&self) -> &[u32] {
        &self.host
    }

    pub(super) fn reset_host_bits(&mut self, object_count: u32) {
        all_visible(&mut self.host, object_count);
    }
}

fn wait<E: CommandExecutor + ?Sized>(exec: &mut E, fence: FenceHandle, timeout: Duration) -> Result<(), CullError> {
    exec.wait_fence(fence, timeout).map_err(|e| {
        log::error!("readback fence wait failed: {}", e);
        e
    })
}
