use occlusion_types::{BufferRange, DrawIndexedIndirect};

use crate::executor::{dispatch_lanes, CommandExecutor, Kernel, Stage};

const RECORD_SIZE: u64 = std::mem::size_of::<DrawIndexedIndirect>() as u64;

/// Appends the indirect draw record of every visible object to a compacted list.
///
/// The order of the compacted records is unspecified, only the multiset and
/// `counter` are. The draw count for a multi-draw-indirect-count call is read
/// from `counter` by the consumer.
#[derive(Debug)]
pub struct IndirectUnordered {
    /// One [`DrawIndexedIndirect`] per object.
    pub records: BufferRange,
    /// Room for one [`DrawIndexedIndirect`] per object.
    pub compacted: BufferRange,
    /// A single u32.
    pub counter: BufferRange,
    /// Zero `compacted` before appending, useful when inspecting the buffer.
    pub clear_results: bool,
}

impl IndirectUnordered {
    pub fn new(records: BufferRange, compacted: BufferRange, counter: BufferRange) -> Self {
        Self {
            records,
            compacted,
            counter,
            clear_results: false,
        }
    }

    pub fn with_clear_results(mut self, clear_results: bool) -> Self {
        self.clear_results = clear_results;
        self
    }

    pub(super) fn materialize<E: CommandExecutor + ?Sized>(&mut self, exec: &mut E, bits: BufferRange, object_count: u32) {
        profiling::scope!("indirect compaction");

        let bytes = object_count as u64 * RECORD_SIZE;
        assert!(
            self.records.size >= bytes && self.compacted.size >= bytes,
            "indirect buffers of {} and {} bytes cannot hold {} records",
            self.records.size,
            self.compacted.size,
            object_count
        );
        assert!(self.counter.size >= 4, "indirect counter must hold a u32");

        let counter = self.counter.slice(0, 4);
        exec.fill_buffer(counter, 0);
        if self.clear_results {
            exec.fill_buffer(self.compacted, 0);
        }
        exec.barrier(Stage::Transfer, Stage::Deliver);

        dispatch_lanes(
            exec,
            &Kernel::IndirectCompact {
                bits,
                records: self.records,
                compacted: self.compacted,
                counter,
            },
            object_count,
        );
        exec.barrier(Stage::Deliver, Stage::Draw);
    }
}

#[cfg(test)]
mod test {
    use occlusion_types::DrawIndexedIndirect;

    use crate::{
        cpu::{fixtures, CpuExecutor},
        delivery::ResultDelivery,
        scan::ScanEngine,
        CommandExecutor,
    };

    fn compact(object_count: u32, bits: &[u32], clear_results: bool) -> (CpuExecutor, ResultDelivery) {
        let mut exec = CpuExecutor::new();
        let bits = exec.create_buffer_init(bits);
        let mut delivery = fixtures::indirect(&mut exec, object_count);
        if let ResultDelivery::IndirectUnordered(indirect) = &mut delivery {
            indirect.clear_results = clear_results;
            // Stale contents from an earlier frame.
            exec.fill_buffer(indirect.counter, 77);
            exec.fill_buffer(indirect.compacted, 0xFFFF_FFFF);
        }
        delivery.materialize(&mut exec, &ScanEngine::new(), bits, object_count).unwrap();
        (exec, delivery)
    }

    fn compacted(exec: &CpuExecutor, delivery: &ResultDelivery) -> (u32, Vec<DrawIndexedIndirect>) {
        let ResultDelivery::IndirectUnordered(indirect) = delivery else {
            unreachable!()
        };
        (exec.words(indirect.counter)[0], exec.read(indirect.compacted))
    }

    #[test]
    fn appends_exactly_the_visible_records() {
        let visible = [1, 5, 31, 32, 63, 64, 99];
        let mut bits = [0u32; 4];
        for object in visible {
            bits[object / 32] |= 1 << (object % 32);
        }
        let (exec, delivery) = compact(100, &bits, false);

        let (count, records) = compacted(&exec, &delivery);
        assert_eq!(count, visible.len() as u32);
        let mut got: Vec<u32> = records[..count as usize].iter().map(|r| r.first_instance).collect();
        got.sort_unstable();
        assert_eq!(got, visible.map(|v| v as u32));

        let all = fixtures::records(100);
        for record in &records[..count as usize] {
            assert_eq!(*record, all[record.first_instance as usize]);
        }
    }

    #[test]
    fn clear_results_zeroes_the_tail() {
        let (exec, delivery) = compact(64, &[0b101, 0], true);
        let (count, records) = compacted(&exec, &delivery);
        assert_eq!(count, 2);
        assert!(records[2..].iter().all(|r| *r == DrawIndexedIndirect::default()));

        let (exec, delivery) = compact(64, &[0b101, 0], false);
        let (_, records) = compacted(&exec, &delivery);
        assert_eq!(records[2].index_count, 0xFFFF_FFFF);
    }

    #[test]
    fn nothing_visible() {
        let (exec, delivery) = compact(40, &[0, 0], false);
        assert_eq!(compacted(&exec, &delivery).0, 0);
    }

    #[test]
    fn zero_objects_leave_the_counter_at_zero() {
        let (exec, delivery) = compact(0, &[], true);
        assert_eq!(compacted(&exec, &delivery).0, 0);
        assert!(!exec.dispatched().contains(&"indirect compact"));
    }
}
