// SPDX-License-Identifier: Apache-2.0

use core::cell::Cell;
use core::marker::PhantomData;

use critical_section::Mutex;

use crate::counter::{Counter, OverflowClient};
use crate::ticks::{Precision, Ticks};
use crate::trace;

/// A coarser and/or wider view of another [Counter].
///
/// The source value is shifted right by `SHIFT` bits, and the bits lost off
/// the top are replaced by a count of source overflows. With a 16-bit
/// 32 kHz source and `SHIFT = 5` this gives a 32-bit binary millisecond
/// counter:
///
/// ```text
///  target:  [ upper (21 bits) | source >> 5 (11 bits) ]
/// ```
///
/// The target precision must be exactly the source precision divided by
/// `2^SHIFT`, and the target must be at least as wide as the shifted
/// source. Both are checked at compile time.
///
/// Transforms compose: a [CounterTransform] is itself a [Counter] and can be
/// the source of another one.
pub struct CounterTransform<'a, C, To, P, const SHIFT: u32>
where
    C: Counter<'a>,
    To: Ticks,
    P: Precision,
{
    source: &'a C,
    upper: Mutex<Cell<u64>>,
    client: Cell<Option<&'a dyn OverflowClient>>,
    _target: PhantomData<(To, P)>,
}

impl<'a, C, To, P, const SHIFT: u32> CounterTransform<'a, C, To, P, SHIFT>
where
    C: Counter<'a>,
    To: Ticks,
    P: Precision,
{
    const CONSISTENT: () = {
        assert!(SHIFT < <C::Size as Ticks>::BITS, "shift wider than the source");
        assert!(
            To::BITS >= <C::Size as Ticks>::BITS - SHIFT,
            "target narrower than the shifted source"
        );
        assert!(
            (P::HZ as u64) << SHIFT == <C::Precision as Precision>::HZ as u64,
            "target precision is not source precision >> shift"
        );
    };

    /// Bits of the target contributed by the source.
    const LOW_BITS: u32 = <C::Size as Ticks>::BITS - SHIFT;

    /// Bits of the target contributed by the overflow count.
    const UPPER_BITS: u32 = To::BITS - Self::LOW_BITS;

    const OVERFLOW_MASK: u64 = if Self::UPPER_BITS >= 64 {
        u64::MAX
    } else {
        (1u64 << Self::UPPER_BITS) - 1
    };

    /// Builds the transform. Register it as the source's overflow client
    /// before the source can wrap.
    pub fn new(source: &'a C) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CONSISTENT;
        Self {
            source,
            upper: Mutex::new(Cell::new(0)),
            client: Cell::new(None),
            _target: PhantomData,
        }
    }

    fn compose(upper: u64, low: C::Size) -> To {
        let high = upper.checked_shl(Self::LOW_BITS).unwrap_or(0);
        To::from_u64(high | (low.into_u64() >> SHIFT))
    }

    /// True if bumping `upper` once more wraps the overflow bits to zero.
    fn upper_saturated(upper: u64) -> bool {
        upper & Self::OVERFLOW_MASK == Self::OVERFLOW_MASK
    }
}

impl<'a, C, To, P, const SHIFT: u32> Counter<'a> for CounterTransform<'a, C, To, P, SHIFT>
where
    C: Counter<'a>,
    To: Ticks,
    P: Precision,
{
    type Precision = P;
    type Size = To;

    fn get(&self) -> To {
        critical_section::with(|cs| {
            let mut upper = self.upper.borrow(cs).get();
            let mut low = self.source.get();
            if self.source.is_overflow_pending() {
                // The source wrapped but we haven't heard about it yet.
                // Count the wrap here without signalling anything, and read
                // again since the first read may predate the wrap.
                upper = upper.wrapping_add(1);
                low = self.source.get();
            }
            Self::compose(upper, low)
        })
    }

    fn is_overflow_pending(&self) -> bool {
        critical_section::with(|cs| {
            Self::upper_saturated(self.upper.borrow(cs).get()) && self.source.is_overflow_pending()
        })
    }

    fn clear_overflow(&self) {
        critical_section::with(|cs| {
            let upper = self.upper.borrow(cs);
            if Self::upper_saturated(upper.get()) && self.source.is_overflow_pending() {
                // Consume the pending source wrap, it is ours now
                upper.set(upper.get().wrapping_add(1));
                self.source.clear_overflow();
            }
        })
    }

    fn set_overflow_client(&self, client: &'a dyn OverflowClient) {
        self.client.set(Some(client));
    }
}

impl<'a, C, To, P, const SHIFT: u32> OverflowClient for CounterTransform<'a, C, To, P, SHIFT>
where
    C: Counter<'a>,
    To: Ticks,
    P: Precision,
{
    fn overflow(&self) {
        let wrapped = critical_section::with(|cs| {
            let upper = self.upper.borrow(cs);
            let next = upper.get().wrapping_add(1);
            upper.set(next);
            next & Self::OVERFLOW_MASK == 0
        });
        if wrapped {
            trace!("counter transform wrapped, {} upper bits", Self::UPPER_BITS);
            if let Some(client) = self.client.get() {
                client.overflow();
            }
        }
    }
}
