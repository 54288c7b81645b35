// SPDX-License-Identifier: Apache-2.0

//! Precision and width transforms.
//!
//! A hardware timer usually ticks faster, and is narrower, than what the
//! application wants to schedule with. The transforms here trade precision
//! for range: a [CounterTransform] divides by a power of two and extends the
//! result with an overflow count, an [AlarmTransform] converts deadlines back
//! down to the hardware precision.

mod alarm;
mod counter;

pub use alarm::AlarmTransform;
pub use counter::CounterTransform;
