use occlusion_types::{BufferRange, JobConfig};

use crate::{
    delivery::ResultDelivery,
    hi_z::DepthPyramid,
    setup::Capabilities,
    util::math::{bit_words, output_lanes},
    CapabilityError,
};

/// Where the per-object data of a job lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ObjectBuffers {
    /// [`MatrixData`](occlusion_types::MatrixData) array.
    pub matrices: BufferRange,
    /// One u32 matrix index per object.
    pub object_matrix: BufferRange,
    /// One [`BoundingBox`](occlusion_types::BoundingBox) per object, or one
    /// u32 index into `bboxes` per object in dual index mode.
    pub object_bbox: BufferRange,
    /// [`BoundingBox`](occlusion_types::BoundingBox) array. Present exactly in dual index mode.
    pub bboxes: Option<BufferRange>,
}

/// The two visibility bitsets of a job and which one currently plays which role.
///
/// `current` holds the bits of this frame, `last` the ones published before.
/// [`swap`](Self::swap) exchanges the roles without touching either buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VisibilityBits {
    slots: [BufferRange; 2],
    current_slot: usize,
}

impl VisibilityBits {
    pub fn new(current: BufferRange, last: BufferRange) -> Self {
        Self {
            slots: [current, last],
            current_slot: 0,
        }
    }

    pub fn current(&self) -> BufferRange {
        self.slots[self.current_slot]
    }

    pub fn last(&self) -> BufferRange {
        self.slots[self.current_slot ^ 1]
    }

    pub fn swap(&mut self) {
        self.current_slot ^= 1;
    }

    pub fn slots(&self) -> [BufferRange; 2] {
        self.slots
    }
}

/// One unit of culling work.
///
/// A job only refers to storage allocated by its owner; nothing in here is
/// created or resized by the culling system.
#[derive(Debug)]
pub struct Job {
    pub config: JobConfig,
    pub objects: ObjectBuffers,
    /// One u32 lane per object, rounded up to whole bitset words.
    pub output: BufferRange,
    pub bits: VisibilityBits,
    /// Required by the hi-z and raster tests.
    pub depth: Option<DepthPyramid>,
    pub delivery: ResultDelivery,
}

impl Job {
    /// # Panics
    ///
    /// Panics if `output` or either bitset is too small for `config.object_count` objects.
    pub fn new(
        config: JobConfig,
        objects: ObjectBuffers,
        output: BufferRange,
        bits: VisibilityBits,
        delivery: ResultDelivery,
    ) -> Self {
        let count = config.object_count;
        assert!(
            output.words() >= output_lanes(count),
            "visibility output holds {} lanes but {} objects need {}",
            output.words(),
            count,
            output_lanes(count)
        );
        for slot in bits.slots() {
            assert!(
                slot.words() >= bit_words(count),
                "visibility bitset holds {} words but {} objects need {}",
                slot.words(),
                count,
                bit_words(count)
            );
        }
        assert_eq!(
            config.dual_index,
            objects.bboxes.is_some(),
            "dual index jobs need a bounding box buffer and only they may have one"
        );
        Self {
            config,
            objects,
            output,
            bits,
            depth: None,
            delivery,
        }
    }

    pub fn with_depth(mut self, depth: DepthPyramid) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn object_count(&self) -> u32 {
        self.config.object_count
    }

    /// Number of bitset words covering all objects.
    pub fn bit_words(&self) -> u32 {
        bit_words(self.config.object_count)
    }

    /// The output lanes covering all objects.
    pub fn output_range(&self) -> BufferRange {
        self.output.slice(0, output_lanes(self.config.object_count) as u64 * 4)
    }

    /// The current bitset, trimmed to the words covering all objects.
    pub fn current_bits(&self) -> BufferRange {
        self.bits.current().slice(0, self.bit_words() as u64 * 4)
    }

    pub fn last_bits(&self) -> BufferRange {
        self.bits.last().slice(0, self.bit_words() as u64 * 4)
    }

    /// Checks every range the kernels bind for this job against the executor's binding size limit.
    pub fn check_bindings(&self, capabilities: &Capabilities) -> Result<(), CapabilityError> {
        let objects = &self.objects;
        [
            self.output_range(),
            self.current_bits(),
            self.last_bits(),
            objects.matrices,
            objects.object_matrix,
            objects.object_bbox,
        ]
        .into_iter()
        .chain(objects.bboxes)
        .chain(self.delivery.bound_ranges())
        .try_for_each(|range| capabilities.check_binding(range.size))
    }
}
