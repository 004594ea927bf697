//! Numeric helpers for alignment arithmetic.

/// Types that can be rounded up to a power-of-two boundary.
pub trait AlignableTo: Sized {
    /// Round `self` up to the next multiple of `align`. `align` must be a power of two.
    fn align_up(self, align: Self) -> Self;
}

impl AlignableTo for usize {
    #[inline(always)]
    fn align_up(self, align: usize) -> usize {
        (self + align - 1) & !(align - 1)
    }
}
