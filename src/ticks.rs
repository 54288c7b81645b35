// SPDX-License-Identifier: Apache-2.0

/// Unsigned time value of a fixed width.
///
/// All arithmetic on tick values is modulo `2^BITS`. Whether a value lies in
/// the past or the future is only meaningful relative to a reference "now",
/// and the trait only offers wrapping operations.
pub trait Ticks: Copy + Eq + Ord + Default + core::fmt::Debug + 'static {
    /// Width of the representation, in bits.
    const BITS: u32;
    const ZERO: Self;
    const MAX: Self;

    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;

    /// Widens to u64, never loses bits.
    fn into_u64(self) -> u64;

    /// Truncates `v` to the width of `Self`.
    fn from_u64(v: u64) -> Self;
}

macro_rules! impl_ticks {
    ($($t:ty),+) => {
        $(
            impl Ticks for $t {
                const BITS: u32 = <$t>::BITS;
                const ZERO: Self = 0;
                const MAX: Self = <$t>::MAX;

                #[inline]
                fn wrapping_add(self, rhs: Self) -> Self {
                    <$t>::wrapping_add(self, rhs)
                }
                #[inline]
                fn wrapping_sub(self, rhs: Self) -> Self {
                    <$t>::wrapping_sub(self, rhs)
                }
                #[inline]
                fn into_u64(self) -> u64 {
                    self as u64
                }
                #[inline]
                fn from_u64(v: u64) -> Self {
                    v as $t
                }
            }
        )+
    };
}

impl_ticks!(u8, u16, u32, u64);

/// Compile-time marker fixing the tick rate of a time value.
///
/// Markers are never instantiated, they only appear as type parameters so
/// that values of different precision cannot be mixed up.
pub trait Precision: 'static {
    /// Ticks per second.
    const HZ: u32;
}

/// Binary milliseconds, 1024 ticks per second.
pub enum TMilli {}

/// 32768 ticks per second, the rate of a watch crystal.
pub enum T32khz {}

/// Binary microseconds, 1048576 ticks per second.
pub enum TMicro {}

impl Precision for TMilli {
    const HZ: u32 = 1024;
}

impl Precision for T32khz {
    const HZ: u32 = 32768;
}

impl Precision for TMicro {
    const HZ: u32 = 1024 * 1024;
}

/// True when `later` is at or after `earlier + dt`, with `earlier` taken to be
/// in the past relative to `later`.
#[inline]
pub(crate) fn elapsed_at_least<W: Ticks>(earlier: W, later: W, dt: W) -> bool {
    later.wrapping_sub(earlier) >= dt
}
