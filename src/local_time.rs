// SPDX-License-Identifier: Apache-2.0

use crate::counter::Counter;
use crate::ticks::Precision;

/// Reads the current local time as a 32-bit value.
pub trait LocalTime {
    type Precision: Precision;

    fn get(&self) -> u32;
}

/// [LocalTime] read straight off a 32-bit [Counter].
pub struct CounterLocalTime<'a, C> {
    counter: &'a C,
}

impl<'a, C: Counter<'a, Size = u32>> CounterLocalTime<'a, C> {
    pub fn new(counter: &'a C) -> Self {
        Self { counter }
    }
}

impl<'a, C: Counter<'a, Size = u32>> LocalTime for CounterLocalTime<'a, C> {
    type Precision = C::Precision;

    fn get(&self) -> u32 {
        self.counter.get()
    }
}
