use occlusion_types::{BufferRange, Sequence};
use smallvec::SmallVec;

use crate::{
    executor::{dispatch_lanes, CommandExecutor, Kernel, Stage},
    scan::ScanEngine,
    token::{TokenHeaders, TokenStream, TokenType},
};

/// Device storage used by a [`TokenCompaction`].
///
/// `sizes`, `offsets`, `owners`, `effective_sizes` and `scanned` hold one u32
/// per token of the padded stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TokenBuffers {
    /// The encoded stream, terminators included.
    pub source: BufferRange,
    /// At least as large as `source`.
    pub destination: BufferRange,
    pub sizes: BufferRange,
    pub offsets: BufferRange,
    pub owners: BufferRange,
    pub effective_sizes: BufferRange,
    pub scanned: BufferRange,
    /// At least [`ScanEngine::offset_size`] of the padded token count.
    pub scan_offsets: BufferRange,
}

/// Rewrites a token stream so that every sequence only contains the tokens of visible objects.
///
/// Each token's surviving size is written, the sizes are scanned, and every
/// token is then copied to its compacted position inside its sequence. Each
/// compacted sequence is terminated right after its last surviving token.
#[derive(Debug)]
pub struct TokenCompaction {
    pub buffers: TokenBuffers,
    sequences: SmallVec<[Sequence; 4]>,
    padded_token_count: u32,
    terminator: u32,
}

impl TokenCompaction {
    /// Compaction of `stream`, whose words and side arrays were uploaded into `buffers`.
    ///
    /// # Panics
    ///
    /// Panics if any of `buffers` is too small for `stream`.
    pub fn new(buffers: TokenBuffers, stream: &TokenStream, headers: &TokenHeaders) -> Self {
        let padded = stream.padded_token_count();
        assert!(
            buffers.destination.size >= buffers.source.size && buffers.source.size >= stream.byte_len() as u64,
            "token stream of {} bytes does not fit source {} and destination {}",
            stream.byte_len(),
            buffers.source.size,
            buffers.destination.size
        );
        for (name, range) in [
            ("sizes", buffers.sizes),
            ("offsets", buffers.offsets),
            ("owners", buffers.owners),
            ("effective sizes", buffers.effective_sizes),
            ("scanned", buffers.scanned),
        ] {
            assert!(
                range.words() >= padded,
                "token {} buffer holds {} entries, stream has {}",
                name,
                range.words(),
                padded
            );
        }
        let offset_size = ScanEngine::offset_size(padded);
        assert!(
            buffers.scan_offsets.size >= offset_size,
            "token scan offsets of {} bytes are smaller than the {} bytes needed",
            buffers.scan_offsets.size,
            offset_size
        );

        Self {
            buffers,
            sequences: stream.sequences.clone(),
            padded_token_count: padded,
            terminator: headers.header(TokenType::TerminateSequence),
        }
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub(super) fn materialize<E: CommandExecutor + ?Sized>(&mut self, exec: &mut E, scan: &ScanEngine, bits: BufferRange) {
        profiling::scope!("token compaction");

        let padded = self.padded_token_count;
        let b = self.buffers;
        let token_bytes = padded as u64 * 4;
        let effective_sizes = b.effective_sizes.slice(0, token_bytes);
        let scanned = b.scanned.slice(0, token_bytes);

        if padded != 0 {
            dispatch_lanes(
                exec,
                &Kernel::TokenSizes {
                    bits,
                    owners: b.owners.slice(0, token_bytes),
                    sizes: b.sizes.slice(0, token_bytes),
                    effective_sizes,
                },
                padded,
            );
            exec.barrier(Stage::Deliver, Stage::Scan);

            scan.scan(exec, padded, effective_sizes, scanned, b.scan_offsets);
            exec.barrier(Stage::Scan, Stage::Deliver);
        }

        for &sequence in &self.sequences {
            // An empty sequence still gets one lane to write its terminator.
            dispatch_lanes(
                exec,
                &Kernel::TokenScatter {
                    sequence,
                    terminator: self.terminator,
                    source: b.source,
                    destination: b.destination,
                    offsets: b.offsets,
                    effective_sizes,
                    scanned,
                },
                sequence.token_count.max(1),
            );
        }
        exec.barrier(Stage::Deliver, Stage::Draw);
    }
}

#[cfg(test)]
mod test {
    use occlusion_types::BufferRange;

    use super::TokenCompaction;
    use crate::{
        cpu::CpuExecutor,
        delivery::ResultDelivery,
        scan::{ScanEngine, SCAN_BATCH},
        token::{emulate_draws, Token, TokenHeaders, TokenReader, TokenStream, TokenStreamBuilder},
        CommandExecutor,
    };

    fn draw(first_index: u32) -> Token {
        Token::DrawElements {
            count: 36,
            first_index,
            base_vertex: 0,
        }
    }

    fn compact(exec: &mut CpuExecutor, stream: &TokenStream, bits: &[u32]) -> BufferRange {
        let headers = exec.capabilities().token_headers.clone();
        let buffers = exec.upload_token_stream(stream);
        let bits = exec.create_buffer_init(bits);
        let mut delivery = ResultDelivery::from(TokenCompaction::new(buffers, stream, &headers));
        delivery.materialize(exec, &ScanEngine::new(), bits, 0).unwrap();
        buffers.destination
    }

    fn sequence_tokens(exec: &CpuExecutor, destination: BufferRange, stream: &TokenStream, index: usize) -> Vec<Token> {
        let headers = &exec.capabilities().token_headers;
        let words = exec.words(destination);
        TokenReader::new(words, headers, stream.sequences[index].start_byte_offset)
            .collect_terminated()
            .unwrap()
    }

    #[test]
    fn keeps_order_and_terminates_every_sequence() {
        let mut exec = CpuExecutor::new();
        let headers = exec.capabilities().token_headers.clone();
        let mut builder = TokenStreamBuilder::new(&headers);
        let element_address = Token::ElementAddress {
            address: 0x1_0000_0000,
            type_size: 4,
        };
        let attribute = Token::AttributeAddress {
            index: 0,
            address: 0x2000,
        };
        let viewport = Token::Viewport {
            x: 0,
            y: 0,
            width: 64,
            height: 64,
        };
        builder
            .begin_sequence()
            .push(element_address, None)
            .push(draw(0), Some(0))
            .push(draw(36), Some(1))
            .push(attribute, Some(2))
            .push(draw(72), Some(2))
            .push(viewport, None)
            .end_sequence();
        builder
            .begin_sequence()
            .push(draw(108), Some(3))
            .push(draw(144), Some(4))
            .end_sequence();
        builder.begin_sequence().end_sequence();
        let stream = builder.finish();

        let destination = compact(&mut exec, &stream, &[0b101]);

        assert_eq!(
            sequence_tokens(&exec, destination, &stream, 0),
            [element_address, draw(0), attribute, draw(72), viewport]
        );
        assert!(sequence_tokens(&exec, destination, &stream, 1).is_empty());
        assert!(sequence_tokens(&exec, destination, &stream, 2).is_empty());

        let draws = emulate_draws(exec.words(destination), &headers, 0).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[1].state.attributes.as_slice(), &[(0, 0x2000)]);
        assert_eq!(draws[1].state.element_address, Some((0x1_0000_0000, 4)));
    }

    #[test]
    fn everything_visible_reproduces_the_stream() {
        let mut exec = CpuExecutor::new();
        let headers = exec.capabilities().token_headers.clone();
        let mut builder = TokenStreamBuilder::new(&headers);
        builder.begin_sequence();
        for object in 0..10 {
            builder.push(draw(object * 36), Some(object));
        }
        builder.end_sequence();
        let stream = builder.finish();

        let destination = compact(&mut exec, &stream, &[!0]);
        assert_eq!(exec.words(destination), &stream.words[..]);
    }

    #[test]
    fn multi_group_stream() {
        let mut exec = CpuExecutor::new();
        let headers = TokenHeaders::software();
        let objects = 100u32;
        let mut builder = TokenStreamBuilder::new(&headers);
        let mut expected = Vec::new();
        for sequence in 0..3u32 {
            builder.begin_sequence();
            let mut tokens = Vec::new();
            for i in 0..SCAN_BATCH {
                let owner = (sequence * SCAN_BATCH + i) % objects;
                let token = draw(sequence * SCAN_BATCH + i);
                builder.push(token, Some(owner));
                if owner % 3 == 0 {
                    tokens.push(token);
                }
            }
            builder.end_sequence();
            expected.push(tokens);
        }
        let stream = builder.finish();
        assert!(stream.padded_token_count() > SCAN_BATCH);

        let mut bits = vec![0u32; 4];
        for owner in (0..objects).step_by(3) {
            bits[owner as usize / 32] |= 1 << (owner % 32);
        }
        let destination = compact(&mut exec, &stream, &bits);

        for (index, tokens) in expected.iter().enumerate() {
            assert_eq!(&sequence_tokens(&exec, destination, &stream, index), tokens, "sequence {index}");
        }
    }

    #[test]
    fn empty_stream() {
        let mut exec = CpuExecutor::new();
        let headers = exec.capabilities().token_headers.clone();
        let stream = TokenStreamBuilder::new(&headers).finish();
        compact(&mut exec, &stream, &[]);
        assert!(exec.dispatched().is_empty());
    }
}
