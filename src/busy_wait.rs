// SPDX-License-Identifier: Apache-2.0

use crate::counter::Counter;
use crate::ticks::{Precision, Ticks};

/// Blocks the calling context for a number of ticks.
pub trait BusyWait {
    type Precision: Precision;
    type Size: Ticks;

    /// Returns once at least `dt` ticks have passed. There is no upper bound
    /// on the actual delay.
    fn wait(&self, dt: Self::Size);
}

/// [BusyWait] that spins on a [Counter].
///
/// Interrupts are left alone, so any time spent in handlers while waiting
/// counts towards the delay.
pub struct CounterBusyWait<'a, C> {
    counter: &'a C,
}

impl<'a, C: Counter<'a>> CounterBusyWait<'a, C> {
    pub fn new(counter: &'a C) -> Self {
        Self { counter }
    }

    fn spin_until(&self, t0: C::Size, dt: C::Size) {
        while self.counter.get().wrapping_sub(t0) < dt {
            core::hint::spin_loop();
        }
    }
}

impl<'a, C: Counter<'a>> BusyWait for CounterBusyWait<'a, C> {
    type Precision = C::Precision;
    type Size = C::Size;

    fn wait(&self, dt: C::Size) {
        let mut t0 = self.counter.get();
        let half = <C::Size as Ticks>::from_u64(<C::Size as Ticks>::MAX.into_u64() >> 1);
        let mut dt = dt;
        // Past half the range a slow poll could miss the window and spin
        // for another full wrap, so wait in two halves
        if dt > half {
            let first = dt.wrapping_sub(half);
            self.spin_until(t0, first);
            t0 = t0.wrapping_add(first);
            dt = half;
        }
        self.spin_until(t0, dt);
    }
}

#[cfg(feature = "embedded-hal")]
impl<'a, C: Counter<'a>> embedded_hal::delay::DelayNs for CounterBusyWait<'a, C> {
    fn delay_ns(&mut self, ns: u32) {
        const NANOS: u64 = 1_000_000_000;
        let hz = <C::Precision as Precision>::HZ as u64;
        let mut ticks = (ns as u64 * hz).div_ceil(NANOS);
        let max = <C::Size as Ticks>::MAX.into_u64();
        while ticks > 0 {
            let chunk = ticks.min(max);
            self.wait(<C::Size as Ticks>::from_u64(chunk));
            ticks -= chunk;
        }
    }
}
