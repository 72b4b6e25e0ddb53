use occlusion_types::{BitMode, BufferRange, Sequence};

use super::{cull, depth, raster, CpuExecutor};
use crate::{
    bits::pack_word,
    executor::Kernel,
    scan::{SCAN_BATCH, SCAN_GROUP_LANES},
};

/// Words of one indirect draw record.
const RECORD_WORDS: usize = 5;

impl CpuExecutor {
    pub(super) fn run(&mut self, kernel: &Kernel<'_>, lanes: u32) {
        match *kernel {
            Kernel::CullFrustum { view, objects, output } => {
                let results = cull::frustum(self, view, objects, lanes);
                self.write_lanes(output, &results);
            }
            Kernel::CullHiZ {
                view,
                objects,
                output,
                depth,
            } => {
                let results = cull::hi_z(self, view, objects, depth, lanes);
                self.write_lanes(output, &results);
            }
            Kernel::RasterPrepare { view, objects, output } => {
                let results = cull::raster_prepare(self, view, objects, lanes);
                self.write_lanes(output, &results);
            }
            Kernel::RasterBoxes {
                view,
                objects,
                output,
                depth,
                strategy: _,
            } => {
                let visible = raster::boxes(self, view, objects, depth, lanes);
                let out = self.words_mut(output);
                // Fragments only ever store 1, lanes without any keep their value.
                for object in visible {
                    out[object as usize] = 1;
                }
            }
            Kernel::PackBits {
                mode,
                output,
                last,
                current,
            } => self.pack_bits(mode, output, last, current, lanes),
            Kernel::IndirectCompact {
                bits,
                records,
                compacted,
                counter,
            } => self.indirect_compact(bits, records, compacted, counter, lanes),
            Kernel::TokenSizes {
                bits,
                owners,
                sizes,
                effective_sizes,
            } => self.token_sizes(bits, owners, sizes, effective_sizes, lanes),
            Kernel::TokenScatter {
                sequence,
                terminator,
                source,
                destination,
                offsets,
                effective_sizes,
                scanned,
            } => self.token_scatter(
                sequence,
                terminator,
                source,
                destination,
                offsets,
                effective_sizes,
                scanned,
                lanes,
            ),
            Kernel::ScanPrefix { elements, input, output } => self.scan_prefix(elements, input, output, lanes),
            Kernel::ScanOffsets {
                elements,
                input,
                offsets,
            } => self.scan_offsets(elements, input, offsets, lanes),
            Kernel::ScanCombine {
                elements,
                output,
                offsets,
            } => self.scan_combine(elements, output, offsets, lanes),
            Kernel::DepthDownsample { depth, level } => {
                let texture = self.texture_mut(depth);
                let (width, height) = depth.level_size(level);
                let (src_width, src_height) = depth.level_size(level - 1);
                let (below, above) = texture.levels.split_at_mut(level as usize);
                depth::downsample(&below[level as usize - 1], src_width, src_height, &mut above[0], width, height);
            }
        }
    }

    fn write_lanes(&mut self, output: BufferRange, results: &[u32]) {
        self.words_mut(output)[..results.len()].copy_from_slice(results);
    }

    fn pack_bits(&mut self, mode: BitMode, output: BufferRange, last: BufferRange, current: BufferRange, lanes: u32) {
        let words: Vec<u32> = {
            let output = self.words(output);
            let last = self.words(last);
            (0..lanes as usize)
                .map(|word| pack_word(mode, &output[word * 32..word * 32 + 32], last[word]))
                .collect()
        };
        self.words_mut(current)[..words.len()].copy_from_slice(&words);
    }

    fn indirect_compact(
        &mut self,
        bits: BufferRange,
        records: BufferRange,
        compacted: BufferRange,
        counter: BufferRange,
        lanes: u32,
    ) {
        let bits = self.words(bits).to_vec();
        let records = self.words(records).to_vec();
        let mut count = self.words(counter)[0];
        {
            let out = self.words_mut(compacted);
            for object in 0..lanes as usize {
                if bits[object / 32] & (1 << (object % 32)) == 0 {
                    continue;
                }
                let slot = count as usize;
                count += 1;
                out[slot * RECORD_WORDS..(slot + 1) * RECORD_WORDS]
                    .copy_from_slice(&records[object * RECORD_WORDS..(object + 1) * RECORD_WORDS]);
            }
        }
        self.words_mut(counter)[0] = count;
    }

    fn token_sizes(
        &mut self,
        bits: BufferRange,
        owners: BufferRange,
        sizes: BufferRange,
        effective_sizes: BufferRange,
        lanes: u32,
    ) {
        let effective: Vec<u32> = {
            let bits = self.words(bits);
            let owners = self.words(owners);
            let sizes = self.words(sizes);
            (0..lanes as usize)
                .map(|token| {
                    let owner = owners[token] as i32;
                    let visible = owner < 0 || bits[owner as usize / 32] & (1 << (owner % 32)) != 0;
                    if visible {
                        sizes[token]
                    } else {
                        0
                    }
                })
                .collect()
        };
        self.write_lanes(effective_sizes, &effective);
    }

    #[allow(clippy::too_many_arguments)]
    fn token_scatter(
        &mut self,
        sequence: Sequence,
        terminator: u32,
        source: BufferRange,
        destination: BufferRange,
        offsets: BufferRange,
        effective_sizes: BufferRange,
        scanned: BufferRange,
        lanes: u32,
    ) {
        let start_byte = sequence.start_byte_offset;
        let end_byte = sequence.end_byte_offset;

        if sequence.token_count == 0 {
            if lanes > 0 && start_byte + 4 <= end_byte {
                self.words_mut(destination)[start_byte as usize / 4] = terminator;
            }
            return;
        }

        let source = self.words(source).to_vec();
        let offsets = self.words(offsets).to_vec();
        let sizes = self.words(effective_sizes).to_vec();
        let scanned = self.words(scanned).to_vec();
        let out = self.words_mut(destination);

        let first = sequence.start_token as usize;
        let exclusive = |token: usize| scanned[token] - sizes[token];
        let base = exclusive(first);
        for lane in 0..lanes.min(sequence.token_count) as usize {
            let token = first + lane;
            let size = sizes[token];
            if size != 0 {
                let dest = (start_byte + exclusive(token) - base) as usize / 4;
                let src = offsets[token] as usize / 4;
                let words = size as usize / 4;
                out[dest..dest + words].copy_from_slice(&source[src..src + words]);
            }
            if lane as u32 == sequence.token_count - 1 {
                let end = start_byte + scanned[token] - base;
                if end + 4 <= end_byte {
                    out[end as usize / 4] = terminator;
                }
            }
        }
    }

    fn scan_prefix(&mut self, elements: u32, input: BufferRange, output: BufferRange, lanes: u32) {
        let groups = (lanes / SCAN_GROUP_LANES) as usize;
        let batch = SCAN_BATCH as usize;
        let elements = elements as usize;
        let data = self.words(input)[..elements].to_vec();
        let out = self.words_mut(output);
        for group in 0..groups {
            let start = group * batch;
            let end = ((group + 1) * batch).min(elements);
            let mut sum = 0u32;
            for k in start..end {
                sum = sum.wrapping_add(data[k]);
                out[k] = sum;
            }
        }
    }

    fn scan_offsets(&mut self, elements: u32, input: BufferRange, offsets: BufferRange, lanes: u32) {
        let batch = SCAN_BATCH as usize;
        let entries = (lanes / SCAN_GROUP_LANES) as usize * batch;
        let elements = elements as usize;
        let groups = (elements + batch - 1) / batch;
        let scanned: Vec<u32> = {
            let input = self.words(input);
            let mut sum = 0u32;
            (0..entries)
                .map(|entry| {
                    if entry % batch == 0 {
                        sum = 0;
                    }
                    if entry < groups {
                        let last = ((entry + 1) * batch).min(elements) - 1;
                        sum = sum.wrapping_add(input[last]);
                    }
                    sum
                })
                .collect()
        };
        self.write_lanes(offsets, &scanned);
    }

    fn scan_combine(&mut self, elements: u32, output: BufferRange, offsets: BufferRange, lanes: u32) {
        let batch = SCAN_BATCH as usize;
        let end = elements.min(lanes) as usize;
        if end <= batch {
            return;
        }
        let offsets = self.words(offsets).to_vec();
        let out = self.words_mut(output);
        for (k, value) in out.iter_mut().enumerate().take(end).skip(batch) {
            *value = value.wrapping_add(offsets[k / batch - 1]);
        }
    }
}
