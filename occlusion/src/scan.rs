//! Multi-level parallel prefix sum.
//!
//! Elements are processed in groups of [`SCAN_BATCH`] values, each group by
//! [`SCAN_GROUP_LANES`] lanes handling four values apiece. The hierarchy has
//! exactly three levels:
//!
//! 1. every group scans its own slice;
//! 2. if there is more than one group, the group totals are scanned into
//!    `offsets`, again in batches;
//! 3. if there is more than one batch of group totals, the batch totals are
//!    scanned into a second region of `offsets` and folded back into the
//!    first region.
//!
//! This bounds a single scan to fewer than `SCAN_BATCH³` elements.
//!
//! The result is an inclusive prefix sum: `output[k]` is the sum of
//! `input[0..=k]`. The exclusive sum of element `k` is `output[k] - input[k]`.

use occlusion_types::BufferRange;

use crate::{
    executor::{dispatch_lanes, CommandExecutor, Kernel, Stage},
    util::math::round_up_div,
};

/// Lanes working on one group.
pub const SCAN_GROUP_LANES: u32 = 512;
/// Elements scanned by one group.
pub const SCAN_BATCH: u32 = SCAN_GROUP_LANES * 4;
/// Exclusive upper bound of elements of a single scan.
pub const SCAN_MAX_ELEMENTS: u64 = (SCAN_BATCH as u64) * (SCAN_BATCH as u64) * (SCAN_BATCH as u64);

// Any u32 element count fits into three levels.
const _: () = assert!(SCAN_MAX_ELEMENTS > u32::MAX as u64);

/// Records scans on a [`CommandExecutor`].
#[derive(Debug, Default, Copy, Clone)]
pub struct ScanEngine;

impl ScanEngine {
    pub fn new() -> Self {
        Self
    }

    /// Bytes of `offsets` storage a scan of `elements` values uses.
    pub const fn offset_size(elements: u32) -> u64 {
        let groups = (elements as u64 + SCAN_BATCH as u64 - 1) / SCAN_BATCH as u64;
        if groups <= 1 {
            return 0;
        }
        let batch = SCAN_BATCH as u64;
        let groupcombines = (groups + batch - 1) / batch;
        let mut size = groupcombines * batch * 4;
        if groupcombines > 1 {
            size += ((groupcombines + batch - 1) / batch) * batch * 4;
        }
        size
    }

    /// Scans `elements` u32 values of `input` into `output`.
    ///
    /// Returns true if the groups still need their carries applied, in which
    /// case [`combine_with_offsets`](Self::combine_with_offsets) must be
    /// called with the same `elements`, `output` and `offsets`.
    ///
    /// # Panics
    ///
    /// Panics if `elements` is not a multiple of 4 or any buffer is smaller
    /// than the scan needs.
    pub fn scan_data<E: CommandExecutor + ?Sized>(
        &self,
        exec: &mut E,
        elements: u32,
        input: BufferRange,
        output: BufferRange,
        offsets: BufferRange,
    ) -> bool {
        profiling::scope!("scan data");

        assert_eq!(elements % 4, 0, "scan element count {elements} is not a multiple of 4");
        assert!(
            input.size >= elements as u64 * 4,
            "scan input of {} bytes cannot hold {elements} elements",
            input.size
        );
        assert!(
            input.size <= output.size,
            "scan output of {} bytes is smaller than its {} byte input",
            output.size,
            input.size
        );
        let offset_size = Self::offset_size(elements);
        assert!(
            offsets.size >= offset_size,
            "scan offsets of {} bytes are smaller than the {offset_size} bytes needed",
            offsets.size
        );

        let groups = round_up_div(elements, SCAN_BATCH);
        dispatch_lanes(
            exec,
            &Kernel::ScanPrefix {
                elements,
                input,
                output,
            },
            groups * SCAN_GROUP_LANES,
        );
        exec.barrier(Stage::Scan, Stage::Scan);

        if groups <= 1 {
            return false;
        }

        let groupcombines = round_up_div(groups, SCAN_BATCH);
        let combine_elements = groupcombines * SCAN_BATCH;
        let first = offsets.slice(0, combine_elements as u64 * 4);
        dispatch_lanes(
            exec,
            &Kernel::ScanOffsets {
                elements,
                input: output,
                offsets: first,
            },
            groupcombines * SCAN_GROUP_LANES,
        );
        exec.barrier(Stage::Scan, Stage::Scan);

        if groupcombines > 1 {
            let second_batches = round_up_div(groupcombines, SCAN_BATCH);
            let second = offsets.slice(first.size, (second_batches * SCAN_BATCH) as u64 * 4);
            dispatch_lanes(
                exec,
                &Kernel::ScanOffsets {
                    elements: combine_elements,
                    input: first,
                    offsets: second,
                },
                second_batches * SCAN_GROUP_LANES,
            );
            exec.barrier(Stage::Scan, Stage::Scan);

            self.combine_with_offsets(exec, combine_elements, first, second);
        }

        true
    }

    /// Adds the carry of all preceding groups to every element of `output` past the first group.
    pub fn combine_with_offsets<E: CommandExecutor + ?Sized>(
        &self,
        exec: &mut E,
        elements: u32,
        output: BufferRange,
        offsets: BufferRange,
    ) {
        profiling::scope!("scan combine");

        assert_eq!(elements % 4, 0, "combine element count {elements} is not a multiple of 4");
        assert!(
            output.size >= elements as u64 * 4,
            "combine output of {} bytes cannot hold {elements} elements",
            output.size
        );

        dispatch_lanes(
            exec,
            &Kernel::ScanCombine {
                elements,
                output,
                offsets,
            },
            elements,
        );
        exec.barrier(Stage::Scan, Stage::Scan);
    }

    /// Scan followed by the combine when one is needed.
    pub fn scan<E: CommandExecutor + ?Sized>(
        &self,
        exec: &mut E,
        elements: u32,
        input: BufferRange,
        output: BufferRange,
        offsets: BufferRange,
    ) {
        if self.scan_data(exec, elements, input, output, offsets) {
            self.combine_with_offsets(exec, elements, output, offsets);
        }
    }
}

#[cfg(test)]
mod test {
    use occlusion_types::BufferRange;

    use super::{ScanEngine, SCAN_BATCH, SCAN_GROUP_LANES};
    use crate::{cpu::CpuExecutor, executor::Kernel, CommandExecutor};

    const GUARD: u32 = 0xDEAD_BEEF;
    const GUARD_WORDS: u64 = 16;

    struct ScanSetup {
        exec: CpuExecutor,
        output: BufferRange,
        offsets: BufferRange,
        guard: BufferRange,
    }

    /// Scans `input` with offsets storage of exactly the reported size, followed by guard words.
    fn scan(input: &[u32]) -> ScanSetup {
        let elements = input.len() as u32;
        let mut exec = CpuExecutor::new();
        let input_range = exec.create_buffer_init(input);
        let output = exec.create_buffer(input.len());

        let offset_size = ScanEngine::offset_size(elements);
        let storage = exec.create_buffer((offset_size / 4 + GUARD_WORDS) as usize);
        exec.fill_buffer(storage, GUARD);
        let offsets = storage.slice(0, offset_size);
        let guard = storage.slice(offset_size, GUARD_WORDS * 4);

        ScanEngine::new().scan(&mut exec, elements, input_range, output, offsets);
        ScanSetup {
            exec,
            output,
            offsets,
            guard,
        }
    }

    fn assert_inclusive_ones(setup: &ScanSetup) {
        let output = setup.exec.words(setup.output);
        for (k, &value) in output.iter().enumerate() {
            assert_eq!(value, k as u32 + 1, "element {k}");
        }
        assert!(setup.exec.words(setup.guard).iter().all(|&w| w == GUARD));
    }

    #[test]
    fn offset_size_tiers() {
        let batch = SCAN_BATCH as u64;
        assert_eq!(ScanEngine::offset_size(0), 0);
        assert_eq!(ScanEngine::offset_size(SCAN_BATCH / 2), 0);
        assert_eq!(ScanEngine::offset_size(SCAN_BATCH), 0);
        assert_eq!(ScanEngine::offset_size(SCAN_BATCH + 4), batch * 4);
        assert_eq!(ScanEngine::offset_size(SCAN_BATCH * SCAN_BATCH), batch * 4);
        assert_eq!(
            ScanEngine::offset_size(SCAN_BATCH * SCAN_BATCH * 2),
            2 * batch * 4 + batch * 4
        );
        // The largest u32 count still fits three levels.
        assert_eq!(ScanEngine::offset_size(u32::MAX - 3), 1024 * batch * 4 + batch * 4);
    }

    #[test]
    #[should_panic(expected = "cannot hold 4294967292 elements")]
    fn largest_count_is_checked_against_the_input() {
        let mut exec = CpuExecutor::new();
        let data = exec.create_buffer(4);
        ScanEngine::new().scan(&mut exec, u32::MAX - 3, data, data, data);
    }

    #[test]
    fn single_group() {
        let setup = scan(&[1; 1024]);
        assert_inclusive_ones(&setup);
        assert_eq!(setup.offsets.size, 0);
        assert_eq!(setup.exec.dispatched(), ["scan prefix"]);
    }

    #[test]
    fn arbitrary_values() {
        let input: Vec<u32> = (0..3 * SCAN_BATCH + 12).map(|i| (i * 7 + 3) % 11).collect();
        let setup = scan(&input);
        let mut sum = 0;
        for (k, &value) in setup.exec.words(setup.output).iter().enumerate() {
            sum += input[k];
            assert_eq!(value, sum, "element {k}");
        }
        assert!(setup.exec.words(setup.guard).iter().all(|&w| w == GUARD));
    }

    #[test]
    fn two_levels() {
        let setup = scan(&vec![1; (SCAN_BATCH * SCAN_BATCH) as usize]);
        assert_inclusive_ones(&setup);
        assert_eq!(
            setup.exec.dispatched(),
            ["scan prefix", "scan offsets", "scan combine"]
        );
    }

    #[test]
    fn three_levels() {
        let elements = SCAN_BATCH * SCAN_BATCH * 2;
        let setup = scan(&vec![1; elements as usize]);
        assert_inclusive_ones(&setup);
        assert_eq!(
            setup.exec.dispatched(),
            [
                "scan prefix",
                "scan offsets",
                "scan offsets",
                "scan combine",
                "scan combine"
            ]
        );
        assert_eq!(*setup.exec.words(setup.output).last().unwrap(), elements);
    }

    #[test]
    fn three_levels_uneven() {
        // One group more than a full batch of groups, the second offsets level is mostly padding.
        let setup = scan(&vec![1; (SCAN_BATCH * (SCAN_BATCH + 1)) as usize]);
        assert_inclusive_ones(&setup);
    }

    #[test]
    #[should_panic(expected = "not a multiple of 4")]
    fn unaligned_element_count() {
        scan(&[1; 6]);
    }

    #[test]
    #[should_panic(expected = "smaller than the")]
    fn offsets_too_small() {
        let mut exec = CpuExecutor::new();
        let data = exec.create_buffer(2 * SCAN_BATCH as usize);
        let offsets = exec.create_buffer(16);
        ScanEngine::new().scan(&mut exec, 2 * SCAN_BATCH, data, data, offsets);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn kernel_writes_stay_inside_their_range() {
        let mut exec = CpuExecutor::new();
        let input = exec.create_buffer(2 * SCAN_BATCH as usize);
        let storage = exec.create_buffer(SCAN_BATCH as usize + 16);
        let offsets = storage.slice(0, 64);
        exec.dispatch(
            &Kernel::ScanOffsets {
                elements: 2 * SCAN_BATCH,
                input,
                offsets,
            },
            SCAN_GROUP_LANES,
        );
    }
}
