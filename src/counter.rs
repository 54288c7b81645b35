// SPDX-License-Identifier: Apache-2.0

use crate::ticks::{Precision, Ticks};

/// A free-running time source of fixed precision and width.
///
/// All operations may be called from interrupt context. The overflow
/// notification is delivered to the registered [OverflowClient] exactly once
/// per wrap from `Size::MAX` to zero.
pub trait Counter<'a> {
    type Precision: Precision;
    type Size: Ticks;

    /// Current counter value.
    fn get(&self) -> Self::Size;

    /// True if an overflow notification will be delivered once the current
    /// critical section ends.
    ///
    /// Only meaningful when called with interrupts disabled, otherwise the
    /// overflow may already have been delivered by the time the caller looks
    /// at the result.
    fn is_overflow_pending(&self) -> bool;

    /// Cancels the pending overflow notification, if any.
    fn clear_overflow(&self);

    fn set_overflow_client(&self, client: &'a dyn OverflowClient);
}

/// Receives counter wraparound notifications.
pub trait OverflowClient {
    /// Called in interrupt context when the counter wraps to zero.
    fn overflow(&self);
}
