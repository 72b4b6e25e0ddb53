//! Command token streams.
//!
//! A token stream is a sequence of fixed-format commands, each starting with
//! a one word header. Draw tokens are owned by an object and are removed by
//! [`TokenCompaction`](crate::delivery::TokenCompaction) when that object is
//! culled; state tokens have no owner and always survive.
//!
//! The header words are described by an immutable [`TokenHeaders`] table that
//! is built once, before any stream is encoded, and shared by everything that
//! reads or writes streams afterwards.

use occlusion_types::{Sequence, NO_OWNER};
use smallvec::SmallVec;
use thiserror::Error;

use crate::util::{math::round_up, typedefs::FastHashMap};

/// Number of distinct token types.
pub const TOKEN_TYPES: usize = 19;

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TokenType {
    Nop = 0,
    DrawElements,
    DrawArrays,
    DrawElementsStrip,
    DrawArraysStrip,
    DrawElementsInstanced,
    DrawArraysInstanced,
    ElementAddress,
    AttributeAddress,
    UniformAddress,
    BlendColor,
    StencilRef,
    LineWidth,
    PolygonOffset,
    AlphaRef,
    Viewport,
    Scissor,
    FrontFace,
    TerminateSequence,
}

impl TokenType {
    pub const ALL: [TokenType; TOKEN_TYPES] = [
        Self::Nop,
        Self::DrawElements,
        Self::DrawArrays,
        Self::DrawElementsStrip,
        Self::DrawArraysStrip,
        Self::DrawElementsInstanced,
        Self::DrawArraysInstanced,
        Self::ElementAddress,
        Self::AttributeAddress,
        Self::UniformAddress,
        Self::BlendColor,
        Self::StencilRef,
        Self::LineWidth,
        Self::PolygonOffset,
        Self::AlphaRef,
        Self::Viewport,
        Self::Scissor,
        Self::FrontFace,
        Self::TerminateSequence,
    ];

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Encoded size including the header word.
    pub const fn words(self) -> u32 {
        match self {
            Self::Nop | Self::TerminateSequence => 1,
            Self::LineWidth | Self::AlphaRef | Self::FrontFace => 2,
            Self::DrawArrays | Self::DrawArraysStrip | Self::StencilRef | Self::PolygonOffset => 3,
            Self::DrawElements
            | Self::DrawElementsStrip
            | Self::ElementAddress
            | Self::AttributeAddress
            | Self::UniformAddress => 4,
            Self::BlendColor | Self::Viewport | Self::Scissor => 5,
            Self::DrawArraysInstanced => 6,
            Self::DrawElementsInstanced => 7,
        }
    }

    pub const fn size_bytes(self) -> u32 {
        self.words() * 4
    }

    pub fn is_draw(self) -> bool {
        matches!(
            self,
            Self::DrawElements
                | Self::DrawArrays
                | Self::DrawElementsStrip
                | Self::DrawArraysStrip
                | Self::DrawElementsInstanced
                | Self::DrawArraysInstanced
        )
    }
}

/// Immutable table of header words per token type.
///
/// The software layout is `type | (size_bytes << 16)`. An executor that
/// consumes tokens natively supplies its own headers through
/// [`TokenHeaders::probe`]; in that case sizes are taken from the token type.
#[derive(Debug, Clone)]
pub struct TokenHeaders {
    headers: [u32; TOKEN_TYPES],
    lookup: FastHashMap<u32, TokenType>,
    software: bool,
}

impl TokenHeaders {
    pub fn software() -> Self {
        Self::build(|ty| ty as u32 | (ty.size_bytes() << 16), true)
    }

    /// Queries `header_of` once for every token type.
    ///
    /// # Panics
    ///
    /// Panics if two token types report the same header.
    pub fn probe(header_of: impl FnMut(TokenType) -> u32) -> Self {
        Self::build(header_of, false)
    }

    fn build(mut header_of: impl FnMut(TokenType) -> u32, software: bool) -> Self {
        let mut headers = [0; TOKEN_TYPES];
        let mut lookup = FastHashMap::default();
        for ty in TokenType::ALL {
            let header = header_of(ty);
            headers[ty as usize] = header;
            let previous = lookup.insert(header, ty);
            assert!(previous.is_none(), "header {header:#x} of {ty:?} is not unique");
        }
        log::debug!("token headers probed, software layout: {}", software);
        Self {
            headers,
            lookup,
            software,
        }
    }

    pub fn header(&self, ty: TokenType) -> u32 {
        self.headers[ty as usize]
    }

    pub fn token_type(&self, header: u32) -> Option<TokenType> {
        self.lookup.get(&header).copied()
    }

    pub fn is_software(&self) -> bool {
        self.software
    }
}

/// Decoded command.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Token {
    Nop,
    DrawElements {
        count: u32,
        first_index: u32,
        base_vertex: u32,
    },
    DrawArrays {
        count: u32,
        first: u32,
    },
    DrawElementsStrip {
        count: u32,
        first_index: u32,
        base_vertex: u32,
    },
    DrawArraysStrip {
        count: u32,
        first: u32,
    },
    DrawElementsInstanced {
        mode: u32,
        count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: u32,
        base_instance: u32,
    },
    DrawArraysInstanced {
        mode: u32,
        count: u32,
        instance_count: u32,
        first: u32,
        base_instance: u32,
    },
    ElementAddress {
        address: u64,
        type_size: u32,
    },
    AttributeAddress {
        index: u32,
        address: u64,
    },
    UniformAddress {
        index: u16,
        stage: u16,
        address: u64,
    },
    BlendColor([f32; 4]),
    StencilRef {
        front: u32,
        back: u32,
    },
    LineWidth(f32),
    PolygonOffset {
        scale: f32,
        bias: f32,
    },
    AlphaRef(f32),
    Viewport {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Scissor {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    FrontFace {
        counter_clockwise: bool,
    },
    TerminateSequence,
}

fn split(address: u64) -> [u32; 2] {
    [address as u32, (address >> 32) as u32]
}

fn join(lo: u32, hi: u32) -> u64 {
    lo as u64 | ((hi as u64) << 32)
}

impl Token {
    pub fn token_type(&self) -> TokenType {
        match self {
            Self::Nop => TokenType::Nop,
            Self::DrawElements { .. } => TokenType::DrawElements,
            Self::DrawArrays { .. } => TokenType::DrawArrays,
            Self::DrawElementsStrip { .. } => TokenType::DrawElementsStrip,
            Self::DrawArraysStrip { .. } => TokenType::DrawArraysStrip,
            Self::DrawElementsInstanced { .. } => TokenType::DrawElementsInstanced,
            Self::DrawArraysInstanced { .. } => TokenType::DrawArraysInstanced,
            Self::ElementAddress { .. } => TokenType::ElementAddress,
            Self::AttributeAddress { .. } => TokenType::AttributeAddress,
            Self::UniformAddress { .. } => TokenType::UniformAddress,
            Self::BlendColor(_) => TokenType::BlendColor,
            Self::StencilRef { .. } => TokenType::StencilRef,
            Self::LineWidth(_) => TokenType::LineWidth,
            Self::PolygonOffset { .. } => TokenType::PolygonOffset,
            Self::AlphaRef(_) => TokenType::AlphaRef,
            Self::Viewport { .. } => TokenType::Viewport,
            Self::Scissor { .. } => TokenType::Scissor,
            Self::FrontFace { .. } => TokenType::FrontFace,
            Self::TerminateSequence => TokenType::TerminateSequence,
        }
    }

    /// Appends the encoded token, header included, to `out`.
    pub fn encode(&self, headers: &TokenHeaders, out: &mut Vec<u32>) {
        let start = out.len();
        out.push(headers.header(self.token_type()));
        match *self {
            Self::Nop | Self::TerminateSequence => {}
            Self::DrawElements {
                count,
                first_index,
                base_vertex,
            }
            | Self::DrawElementsStrip {
                count,
                first_index,
                base_vertex,
            } => out.extend_from_slice(&[count, first_index, base_vertex]),
            Self::DrawArrays { count, first } | Self::DrawArraysStrip { count, first } => {
                out.extend_from_slice(&[count, first])
            }
            Self::DrawElementsInstanced {
                mode,
                count,
                instance_count,
                first_index,
                base_vertex,
                base_instance,
            } => out.extend_from_slice(&[mode, count, instance_count, first_index, base_vertex, base_instance]),
            Self::DrawArraysInstanced {
                mode,
                count,
                instance_count,
                first,
                base_instance,
            } => out.extend_from_slice(&[mode, count, instance_count, first, base_instance]),
            Self::ElementAddress { address, type_size } => {
                out.extend_from_slice(&split(address));
                out.push(type_size);
            }
            Self::AttributeAddress { index, address } => {
                out.push(index);
                out.extend_from_slice(&split(address));
            }
            Self::UniformAddress { index, stage, address } => {
                out.push(index as u32 | ((stage as u32) << 16));
                out.extend_from_slice(&split(address));
            }
            Self::BlendColor(color) => out.extend(color.map(f32::to_bits)),
            Self::StencilRef { front, back } => out.extend_from_slice(&[front, back]),
            Self::LineWidth(width) => out.push(width.to_bits()),
            Self::PolygonOffset { scale, bias } => out.extend_from_slice(&[scale.to_bits(), bias.to_bits()]),
            Self::AlphaRef(value) => out.push(value.to_bits()),
            Self::Viewport { x, y, width, height } | Self::Scissor { x, y, width, height } => {
                out.extend_from_slice(&[x, y, width, height])
            }
            Self::FrontFace { counter_clockwise } => out.push(counter_clockwise as u32),
        }
        debug_assert_eq!(out.len() - start, self.token_type().words() as usize);
    }

    /// Decodes the token at the start of `words`.
    pub fn decode(words: &[u32], headers: &TokenHeaders) -> Result<Self, TokenDecodeError> {
        let header = *words.first().ok_or(TokenDecodeError::Truncated { needed: 1, available: 0 })?;
        let ty = headers
            .token_type(header)
            .ok_or(TokenDecodeError::UnknownHeader { header })?;
        let needed = ty.words() as usize;
        if words.len() < needed {
            return Err(TokenDecodeError::Truncated {
                needed,
                available: words.len(),
            });
        }
        let w = &words[1..needed];
        let float = |i: usize| f32::from_bits(w[i]);

        Ok(match ty {
            TokenType::Nop => Self::Nop,
            TokenType::TerminateSequence => Self::TerminateSequence,
            TokenType::DrawElements => Self::DrawElements {
                count: w[0],
                first_index: w[1],
                base_vertex: w[2],
            },
            TokenType::DrawElementsStrip => Self::DrawElementsStrip {
                count: w[0],
                first_index: w[1],
                base_vertex: w[2],
            },
            TokenType::DrawArrays => Self::DrawArrays { count: w[0], first: w[1] },
            TokenType::DrawArraysStrip => Self::DrawArraysStrip { count: w[0], first: w[1] },
            TokenType::DrawElementsInstanced => Self::DrawElementsInstanced {
                mode: w[0],
                count: w[1],
                instance_count: w[2],
                first_index: w[3],
                base_vertex: w[4],
                base_instance: w[5],
            },
            TokenType::DrawArraysInstanced => Self::DrawArraysInstanced {
                mode: w[0],
                count: w[1],
                instance_count: w[2],
                first: w[3],
                base_instance: w[4],
            },
            TokenType::ElementAddress => Self::ElementAddress {
                address: join(w[0], w[1]),
                type_size: w[2],
            },
            TokenType::AttributeAddress => Self::AttributeAddress {
                index: w[0],
                address: join(w[1], w[2]),
            },
            TokenType::UniformAddress => Self::UniformAddress {
                index: w[0] as u16,
                stage: (w[0] >> 16) as u16,
                address: join(w[1], w[2]),
            },
            TokenType::BlendColor => Self::BlendColor([float(0), float(1), float(2), float(3)]),
            TokenType::StencilRef => Self::StencilRef { front: w[0], back: w[1] },
            TokenType::LineWidth => Self::LineWidth(float(0)),
            TokenType::PolygonOffset => Self::PolygonOffset {
                scale: float(0),
                bias: float(1),
            },
            TokenType::AlphaRef => Self::AlphaRef(float(0)),
            TokenType::Viewport => Self::Viewport {
                x: w[0],
                y: w[1],
                width: w[2],
                height: w[3],
            },
            TokenType::Scissor => Self::Scissor {
                x: w[0],
                y: w[1],
                width: w[2],
                height: w[3],
            },
            TokenType::FrontFace => Self::FrontFace {
                counter_clockwise: w[0] != 0,
            },
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenDecodeError {
    #[error("Header {header:#x} does not belong to any token type")]
    UnknownHeader { header: u32 },
    #[error("Token needs {needed} words but only {available} are left in the stream")]
    Truncated { needed: usize, available: usize },
    #[error("Stream ended at byte {offset} without a terminator")]
    Unterminated { offset: usize },
}

/// Encoded token stream plus its per-token side arrays.
///
/// The side arrays are padded to a multiple of 4 entries with owner-less,
/// zero sized entries so the stream can be scanned directly.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    pub words: Vec<u32>,
    /// Size of each token in bytes.
    pub sizes: Vec<u32>,
    /// Byte offset of each token in `words`.
    pub offsets: Vec<u32>,
    /// Owning object of each token or [`NO_OWNER`].
    pub owners: Vec<i32>,
    pub sequences: SmallVec<[Sequence; 4]>,
}

impl TokenStream {
    pub fn byte_len(&self) -> u32 {
        self.words.len() as u32 * 4
    }

    /// Number of entries in the side arrays, padding included.
    pub fn padded_token_count(&self) -> u32 {
        self.sizes.len() as u32
    }
}

/// Builds a [`TokenStream`] one sequence at a time.
pub struct TokenStreamBuilder<'a> {
    headers: &'a TokenHeaders,
    stream: TokenStream,
    open: Option<(u32, u32)>,
}

impl<'a> TokenStreamBuilder<'a> {
    pub fn new(headers: &'a TokenHeaders) -> Self {
        Self {
            headers,
            stream: TokenStream::default(),
            open: None,
        }
    }

    pub fn begin_sequence(&mut self) -> &mut Self {
        assert!(self.open.is_none(), "previous sequence was not ended");
        self.open = Some((self.stream.sizes.len() as u32, self.stream.byte_len()));
        self
    }

    /// Appends a token owned by `owner`, or by nobody if `None`.
    pub fn push(&mut self, token: Token, owner: Option<u32>) -> &mut Self {
        assert!(self.open.is_some(), "tokens must be pushed inside of a sequence");
        assert!(
            token.token_type() != TokenType::TerminateSequence,
            "terminators are written by end_sequence"
        );
        self.stream.offsets.push(self.stream.byte_len());
        self.stream.sizes.push(token.token_type().size_bytes());
        self.stream.owners.push(owner.map_or(NO_OWNER, |o| o as i32));
        token.encode(self.headers, &mut self.stream.words);
        self
    }

    /// Closes the sequence with a terminator.
    ///
    /// The terminator is not part of the token arrays; its space is reserved
    /// at the end of the sequence's byte range so a compacted copy of the
    /// sequence always has room for its own terminator.
    pub fn end_sequence(&mut self) -> &mut Self {
        let (start_token, start_byte_offset) = self.open.take().expect("no sequence to end");
        Token::TerminateSequence.encode(self.headers, &mut self.stream.words);
        self.stream.sequences.push(Sequence {
            start_token,
            token_count: self.stream.sizes.len() as u32 - start_token,
            start_byte_offset,
            end_byte_offset: self.stream.byte_len(),
        });
        self
    }

    pub fn finish(mut self) -> TokenStream {
        assert!(self.open.is_none(), "last sequence was not ended");
        let count = self.stream.sizes.len() as u32;
        let padded = round_up(count, 4);
        let end = self.stream.byte_len();
        for _ in count..padded {
            self.stream.sizes.push(0);
            self.stream.offsets.push(end);
            self.stream.owners.push(NO_OWNER);
        }
        self.stream
    }
}

/// Iterates the tokens of one sequence, stopping after its terminator.
pub struct TokenReader<'a> {
    words: &'a [u32],
    headers: &'a TokenHeaders,
    cursor: usize,
    done: bool,
}

impl<'a> TokenReader<'a> {
    pub fn new(words: &'a [u32], headers: &'a TokenHeaders, start_byte_offset: u32) -> Self {
        Self {
            words,
            headers,
            cursor: start_byte_offset as usize / 4,
            done: false,
        }
    }

    /// Collects the tokens before the terminator, failing if there is none.
    pub fn collect_terminated(self) -> Result<Vec<Token>, TokenDecodeError> {
        let end = self.words.len() * 4;
        let mut tokens = Vec::new();
        for token in self {
            match token? {
                (_, Token::TerminateSequence) => return Ok(tokens),
                (_, token) => tokens.push(token),
            }
        }
        Err(TokenDecodeError::Unterminated { offset: end })
    }
}

impl<'a> Iterator for TokenReader<'a> {
    /// Byte offset and token.
    type Item = Result<(u32, Token), TokenDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cursor >= self.words.len() {
            self.done = true;
            return Some(Err(TokenDecodeError::Unterminated {
                offset: self.cursor * 4,
            }));
        }
        let offset = self.cursor as u32 * 4;
        match Token::decode(&self.words[self.cursor..], self.headers) {
            Ok(token) => {
                self.cursor += token.token_type().words() as usize;
                self.done = token == Token::TerminateSequence;
                Some(Ok((offset, token)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Per-type token counts of a byte range.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TokenStats {
    pub counts: [u32; TOKEN_TYPES],
    pub bytes: u32,
}

impl TokenStats {
    pub fn count(&self, ty: TokenType) -> u32 {
        self.counts[ty as usize]
    }

    pub fn draws(&self) -> u32 {
        TokenType::ALL
            .iter()
            .filter(|ty| ty.is_draw())
            .map(|&ty| self.count(ty))
            .sum()
    }
}

/// Walks `[start_byte, end_byte)` token by token, ignoring terminators.
pub fn token_stats(
    words: &[u32],
    headers: &TokenHeaders,
    start_byte: u32,
    end_byte: u32,
) -> Result<TokenStats, TokenDecodeError> {
    let mut stats = TokenStats::default();
    let mut cursor = start_byte as usize / 4;
    let end = (end_byte as usize / 4).min(words.len());
    while cursor < end {
        let token = Token::decode(&words[cursor..end], headers)?;
        let ty = token.token_type();
        stats.counts[ty as usize] += 1;
        stats.bytes += ty.size_bytes();
        cursor += ty.words() as usize;
    }
    Ok(stats)
}

/// Bound state at the time of an emulated draw.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrawState {
    pub element_address: Option<(u64, u32)>,
    pub attributes: SmallVec<[(u32, u64); 4]>,
    pub uniforms: SmallVec<[(u16, u16, u64); 4]>,
    pub polygon_offset: Option<(f32, f32)>,
    pub counter_clockwise: bool,
}

impl DrawState {
    fn apply(&mut self, token: &Token) {
        match *token {
            Token::ElementAddress { address, type_size } => self.element_address = Some((address, type_size)),
            Token::AttributeAddress { index, address } => {
                match self.attributes.iter_mut().find(|(i, _)| *i == index) {
                    Some(slot) => slot.1 = address,
                    None => self.attributes.push((index, address)),
                }
            }
            Token::UniformAddress { index, stage, address } => {
                match self.uniforms.iter_mut().find(|(i, s, _)| *i == index && *s == stage) {
                    Some(slot) => slot.2 = address,
                    None => self.uniforms.push((index, stage, address)),
                }
            }
            Token::PolygonOffset { scale, bias } => self.polygon_offset = Some((scale, bias)),
            Token::FrontFace { counter_clockwise } => self.counter_clockwise = counter_clockwise,
            _ => {}
        }
    }
}

/// A draw a software executor of the stream would issue.
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatedDraw {
    pub draw: Token,
    pub state: DrawState,
}

/// Executes a sequence in software up to its terminator and returns the draws it issues.
pub fn emulate_draws(
    words: &[u32],
    headers: &TokenHeaders,
    start_byte: u32,
) -> Result<Vec<EmulatedDraw>, TokenDecodeError> {
    profiling::scope!("emulate_draws");

    let mut state = DrawState::default();
    let mut draws = Vec::new();
    for token in TokenReader::new(words, headers, start_byte) {
        let (_, token) = token?;
        if token == Token::TerminateSequence {
            return Ok(draws);
        }
        if token.token_type().is_draw() {
            draws.push(EmulatedDraw {
                draw: token,
                state: state.clone(),
            });
        } else {
            state.apply(&token);
        }
    }
    Err(TokenDecodeError::Unterminated {
        offset: words.len() * 4,
    })
}
