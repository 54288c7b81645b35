// SPDX-License-Identifier: Apache-2.0

use crate::ticks::{Precision, Ticks};

/// A single-deadline compare resource.
///
/// At most one deadline is armed at any time. Once the deadline is reached
/// the alarm disarms itself and notifies its [AlarmClient] from interrupt
/// context. Periodic behaviour is built by higher layers.
pub trait Alarm<'a> {
    type Precision: Precision;
    type Size: Ticks;

    /// Arms the alarm `dt` ticks from now.
    fn start(&self, dt: Self::Size) {
        self.start_at(self.get_now(), dt);
    }

    /// Arms the alarm for `t0 + dt`, cancelling any previous deadline.
    ///
    /// `t0` is always taken to be no later than now: a `t0` numerically
    /// greater than the current time refers to a point before the last
    /// wraparound. If `t0 + dt` has already passed, the alarm fires as soon
    /// as possible.
    fn start_at(&self, t0: Self::Size, dt: Self::Size);

    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Current time, in the alarm's own precision.
    fn get_now(&self) -> Self::Size;

    /// The armed deadline, or the last one if the alarm is not running.
    fn get_alarm(&self) -> Self::Size;

    fn set_client(&self, client: &'a dyn AlarmClient);
}

/// Receives alarm expiry notifications.
pub trait AlarmClient {
    /// Called in interrupt context when the armed deadline is reached.
    fn fired(&self);
}
