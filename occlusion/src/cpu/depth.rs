/// Max-reduces `src` into the next smaller level `dst`.
///
/// Every destination texel covers a 2x2 block of the source. When a source
/// dimension is odd, the last texel of that dimension also covers the extra
/// row or column so nothing of the source is skipped.
pub(super) fn downsample(src: &[f32], src_width: u32, src_height: u32, dst: &mut [f32], width: u32, height: u32) {
    let span = |dst_coord: u32, dst_size: u32, src_size: u32| {
        let start = dst_coord * 2;
        let mut end = (start + 2).min(src_size);
        if dst_coord == dst_size - 1 && src_size % 2 == 1 {
            end = src_size;
        }
        start..end.max(start + 1).min(src_size)
    };

    for y in 0..height {
        let rows = span(y, height, src_height);
        for x in 0..width {
            let cols = span(x, width, src_width);
            let mut farthest = 0.0f32;
            for sy in rows.clone() {
                for sx in cols.clone() {
                    farthest = farthest.max(src[(sy * src_width + sx) as usize]);
                }
            }
            dst[(y * width + x) as usize] = farthest;
        }
    }
}

#[cfg(test)]
mod test {
    use super::downsample;

    #[test]
    fn even_level() {
        #[rustfmt::skip]
        let src = [
            0.1, 0.2, 0.3, 0.3,
            0.4, 0.1, 0.3, 0.9,
            0.0, 0.0, 0.5, 0.5,
            0.0, 0.7, 0.5, 0.5,
        ];
        let mut dst = [0.0; 4];
        downsample(&src, 4, 4, &mut dst, 2, 2);
        assert_eq!(dst, [0.4, 0.9, 0.7, 0.5]);
    }

    #[test]
    fn odd_level_covers_the_last_row_and_column() {
        #[rustfmt::skip]
        let src = [
            0.1, 0.1, 0.1,
            0.1, 0.1, 0.1,
            0.1, 0.1, 0.8,
        ];
        let mut dst = [0.0; 1];
        downsample(&src, 3, 3, &mut dst, 1, 1);
        assert_eq!(dst, [0.8]);
    }

    #[test]
    fn thin_level() {
        let src = [0.2, 0.3, 0.6];
        let mut dst = [0.0; 1];
        downsample(&src, 3, 1, &mut dst, 1, 1);
        assert_eq!(dst, [0.6]);
    }
}
