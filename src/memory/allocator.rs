//! jemalloc size classes, as used by Redis's default allocator.

const SIZE_CLASSES: [u64; 72] = [
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640,
    768, 896, 1024, 1280, 1536, 1792, 2048, 2560, 3072, 3584, 4096, 5120, 6144, 7168, 8192, 10240,
    12288, 14336, 16384, 20480, 24576, 28672, 32768, 40960, 49152, 57344, 65536, 81920, 98304,
    114688, 131072, 163840, 196608, 229376, 262144, 327680, 393216, 458752, 524288, 655360, 786432,
    917504, 1048576, 1310720, 1572864, 1835008, 2097152, 2621440, 3145728, 3670016, 4194304,
];

/// Bytes actually handed out for a request of `size` bytes.
///
/// Sizes past the largest class are returned as is.
pub fn malloc_size(size: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    let idx = SIZE_CLASSES.partition_point(|&class| class < size);
    SIZE_CLASSES.get(idx).copied().unwrap_or(size)
}

/// Smallest power of two strictly greater than `size`, saturating at `1 << 63`.
pub fn next_power(size: u64) -> u64 {
    const LIMIT: u64 = 1 << 63;
    if size >= LIMIT {
        return LIMIT;
    }
    let mut power = 1u64;
    while power <= size {
        power <<= 1;
    }
    power
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 8)]
    #[case(8, 8)]
    #[case(9, 16)]
    #[case(65, 80)]
    #[case(4194304, 4194304)]
    #[case(4194305, 4194305)]
    fn rounds_up_to_class(#[case] size: u64, #[case] expected: u64) {
        assert_eq!(malloc_size(size), expected);
    }

    #[test]
    fn classes_are_ascending() {
        assert!(SIZE_CLASSES.windows(2).all(|w| w[0] < w[1]));
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(4, 8)]
    #[case(5, 8)]
    #[case(u64::MAX, 1 << 63)]
    #[case(1 << 62, 1 << 63)]
    fn next_power_saturates(#[case] size: u64, #[case] expected: u64) {
        assert_eq!(next_power(size), expected);
    }
}
