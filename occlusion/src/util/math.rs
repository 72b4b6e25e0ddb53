//! Integer helpers for sizing dispatches and buffers.

use num_traits::PrimInt;

/// Performs integer division between a and b rounding up, instead of down.
///
/// Does not overflow for any `a`.
pub fn round_up_div<T: PrimInt>(a: T, b: T) -> T {
    let quotient = a / b;
    if a % b == T::zero() {
        quotient
    } else {
        quotient + T::one()
    }
}

/// Rounds `src` up to a multiple of `factor`.
pub fn round_up<T: PrimInt>(src: T, factor: T) -> T {
    round_up_div(src, factor) * factor
}

/// Number of 32-bit words needed to hold one bit per object.
pub fn bit_words(object_count: u32) -> u32 {
    round_up_div(object_count, 32)
}

/// Number of output lanes allocated for `object_count` objects. Output lanes
/// are allocated in whole words of the packed bitset.
pub fn output_lanes(object_count: u32) -> u32 {
    bit_words(object_count) * 32
}

/// Full mip chain length of a 2d texture.
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Size of `level` of a mip chain starting at `size`, never smaller than 1.
pub fn mip_size(size: u32, level: u32) -> u32 {
    (size >> level).max(1)
}
