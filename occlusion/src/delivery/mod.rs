//! Ways of handing a visibility bitset to its consumer.
//!
//! Every variant implements the same two operations: `materialize` records
//! the work turning the current bitset into something the consumer reads,
//! `client_sync` blocks until the host can read that result. For variants
//! that never leave the device `client_sync` does nothing.

mod indirect;
mod readback;
mod token;

pub use indirect::*;
pub use readback::*;
pub use token::*;

use occlusion_types::BufferRange;
use smallvec::SmallVec;

use crate::{executor::CommandExecutor, scan::ScanEngine, CullError};

/// The result consumer of a job.
#[derive(Debug)]
pub enum ResultDelivery {
    ReadbackBlocking(ReadbackBlocking),
    ReadbackFenced(ReadbackFenced),
    IndirectUnordered(IndirectUnordered),
    TokenCompaction(TokenCompaction),
}

impl ResultDelivery {
    /// Records the work consuming `bits`, which hold `object_count` bits.
    ///
    /// Only the fenced readback can fail here, when the slot it is about to
    /// reuse is still guarded by a fence that does not signal.
    pub fn materialize<E: CommandExecutor + ?Sized>(
        &mut self,
        exec: &mut E,
        scan: &ScanEngine,
        bits: BufferRange,
        object_count: u32,
    ) -> Result<(), CullError> {
        match self {
            Self::ReadbackBlocking(r) => {
                r.materialize(exec, bits, object_count);
                Ok(())
            }
            Self::ReadbackFenced(r) => r.materialize(exec, bits, object_count),
            Self::IndirectUnordered(r) => {
                r.materialize(exec, bits, object_count);
                Ok(())
            }
            Self::TokenCompaction(r) => {
                r.materialize(exec, scan, bits);
                Ok(())
            }
        }
    }

    /// Waits until the last materialized result is readable by the host.
    pub fn client_sync<E: CommandExecutor + ?Sized>(&mut self, exec: &mut E) -> Result<(), CullError> {
        match self {
            Self::ReadbackBlocking(r) => r.client_sync(exec),
            Self::ReadbackFenced(r) => r.client_sync(exec),
            Self::IndirectUnordered(_) | Self::TokenCompaction(_) => Ok(()),
        }
    }

    /// Ranges the delivery kernels bind as storage buffers. Readbacks only copy.
    pub fn bound_ranges(&self) -> SmallVec<[BufferRange; 8]> {
        match self {
            Self::ReadbackBlocking(_) | Self::ReadbackFenced(_) => SmallVec::new(),
            Self::IndirectUnordered(r) => SmallVec::from_slice(&[r.records, r.compacted, r.counter]),
            Self::TokenCompaction(r) => {
                let b = &r.buffers;
                SmallVec::from_slice(&[
                    b.source,
                    b.destination,
                    b.sizes,
                    b.offsets,
                    b.owners,
                    b.effective_sizes,
                    b.scanned,
                    b.scan_offsets,
                ])
            }
        }
    }

    /// Host copy of the bitset for the readback variants.
    pub fn host_bits(&self) -> Option<&[u32]> {
        match self {
            Self::ReadbackBlocking(r) => Some(r.bits()),
            Self::ReadbackFenced(r) => Some(r.bits()),
            Self::IndirectUnordered(_) | Self::TokenCompaction(_) => None,
        }
    }

    /// Overwrites the host copy of the readback variants with every object visible.
    pub(crate) fn reset_host_bits(&mut self, object_count: u32) {
        match self {
            Self::ReadbackBlocking(r) => r.reset_host_bits(object_count),
            Self::ReadbackFenced(r) => r.reset_host_bits(object_count),
            Self::IndirectUnordered(_) | Self::TokenCompaction(_) => {}
        }
    }
}

impl From<ReadbackBlocking> for ResultDelivery {
    fn from(r: ReadbackBlocking) -> Self {
        Self::ReadbackBlocking(r)
    }
}

impl From<ReadbackFenced> for ResultDelivery {
    fn from(r: ReadbackFenced) -> Self {
        Self::ReadbackFenced(r)
    }
}

impl From<IndirectUnordered> for ResultDelivery {
    fn from(r: IndirectUnordered) -> Self {
        Self::IndirectUnordered(r)
    }
}

impl From<TokenCompaction> for ResultDelivery {
    fn from(r: TokenCompaction) -> Self {
        Self::TokenCompaction(r)
    }
}

/// Sets the low `object_count` bits of `words`, clearing the rest.
pub(crate) fn all_visible(words: &mut Vec<u32>, object_count: u32) {
    let word_count = crate::util::math::bit_words(object_count) as usize;
    words.clear();
    words.resize(word_count, !0);
    let tail = object_count % 32;
    if let (Some(last), true) = (words.last_mut(), tail != 0) {
        *last = (1 << tail) - 1;
    }
}
