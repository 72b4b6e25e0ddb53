//! Packing of the per-object test output into visibility bitsets.

use occlusion_types::BitMode;

use crate::{
    executor::{dispatch_lanes, CommandExecutor, Kernel, Stage},
    job::Job,
};

/// The bit `mode` produces for an object with test output `output` and previous bit `last`.
pub fn expected_bit(mode: BitMode, output: u32, last: bool) -> bool {
    let visible = output != 0;
    match mode {
        BitMode::Current => visible,
        BitMode::CurrentAndLast => visible && last,
        BitMode::CurrentAndNotLast => visible && !last,
    }
}

/// Packs 32 output lanes into one bitset word. Lane `i` becomes bit `i`.
pub fn pack_word(mode: BitMode, lanes: &[u32], last: u32) -> u32 {
    debug_assert!(lanes.len() <= 32);
    lanes.iter().enumerate().fold(0, |word, (bit, &output)| {
        let last_bit = last & (1 << bit) != 0;
        word | ((expected_bit(mode, output, last_bit) as u32) << bit)
    })
}

/// Packs `job`'s output into its current bitset.
///
/// The output must have been made visible to [`Stage::Pack`], which
/// [`geometry::record`](crate::geometry::record) does.
pub fn pack<E: CommandExecutor + ?Sized>(exec: &mut E, job: &Job, mode: BitMode) {
    profiling::scope!("pack visibility bits");

    dispatch_lanes(
        exec,
        &Kernel::PackBits {
            mode,
            output: job.output_range(),
            last: job.last_bits(),
            current: job.current_bits(),
        },
        job.bit_words(),
    );
    exec.barrier(Stage::Pack, Stage::Deliver);
}

#[cfg(test)]
mod test {
    use occlusion_types::BitMode;

    use super::{expected_bit, pack, pack_word};
    use crate::{
        cpu::{fixtures, CpuCommand, CpuExecutor},
        executor::Stage,
    };

    #[test]
    fn truth_table() {
        let table = [
            (BitMode::Current, [false, false, true, true]),
            (BitMode::CurrentAndLast, [false, false, false, true]),
            (BitMode::CurrentAndNotLast, [false, false, true, false]),
        ];
        for (mode, expected) in table {
            // (output, last) in the order (0, 0), (0, 1), (1, 0), (1, 1)
            let got = [
                expected_bit(mode, 0, false),
                expected_bit(mode, 0, true),
                expected_bit(mode, 7, false),
                expected_bit(mode, 7, true),
            ];
            assert_eq!(got, expected, "{mode:?}");
        }
    }

    #[test]
    fn word_packing() {
        let lanes: Vec<u32> = (0..32).map(|i| (i % 3 == 0) as u32).collect();
        let current = pack_word(BitMode::Current, &lanes, 0);
        assert_eq!(current, 0b01001001001001001001001001001001);
        assert_eq!(pack_word(BitMode::CurrentAndLast, &lanes, 0xFFFF), current & 0xFFFF);
        assert_eq!(pack_word(BitMode::CurrentAndNotLast, &lanes, 0xFFFF), current & !0xFFFF);
        assert_eq!(pack_word(BitMode::Current, &lanes[..4], 0), 0b1001);
    }

    #[test]
    fn packs_every_mode_on_the_executor() {
        let count = 70;
        for mode in [BitMode::Current, BitMode::CurrentAndLast, BitMode::CurrentAndNotLast] {
            let mut exec = CpuExecutor::new();
            let objects = fixtures::objects(&mut exec, &[], fixtures::cube(1.0));
            let delivery = fixtures::readback(&mut exec, count);
            let job = fixtures::job(&mut exec, objects, count, delivery);

            let output: Vec<u32> = (0..96).map(|i| if i < count { i % 2 } else { 0 }).collect();
            let last: Vec<u32> = vec![0x0F0F_0F0F, 0x3333_3333, 0x0000_003F];
            exec.write_buffer(job.output, &output);
            exec.write_buffer(job.last_bits(), &last);

            pack(&mut exec, &job, mode);

            let current = exec.words(job.current_bits()).to_vec();
            for object in 0..count as usize {
                let last_bit = last[object / 32] & (1 << (object % 32)) != 0;
                let bit = current[object / 32] & (1 << (object % 32)) != 0;
                assert_eq!(bit, expected_bit(mode, output[object], last_bit), "{mode:?} object {object}");
            }
            // Lanes past the object count were zero, so are their bits.
            assert_eq!(current[2] >> 6, 0);
            assert_eq!(exec.words(job.last_bits()), &last[..]);
            assert!(exec.trace().contains(&CpuCommand::Barrier {
                writer: Stage::Pack,
                reader: Stage::Deliver
            }));
        }
    }
}
