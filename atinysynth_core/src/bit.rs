//! Small bit-twiddling helpers shared by the oscillator and envelope.

/// Returns `true` if bit `bit` of `val` is set.
#[inline]
pub(crate) fn test_bit(val: u32, bit: u32) -> bool {
    (val & (1 << bit)) != 0
}
