// SPDX-License-Identifier: Apache-2.0

use crate::ticks::Precision;

/// Task context one-shot and periodic timer, with a fixed 32-bit width.
///
/// Expiry is delivered to the [TimerClient] from a deferred task, never from
/// interrupt context.
pub trait Timer<'a> {
    type Precision: Precision;

    /// Fires every `dt` ticks, starting `dt` ticks from now.
    fn start_periodic(&self, dt: u32) {
        self.start_periodic_at(self.get_now(), dt);
    }

    /// Fires once, `dt` ticks from now.
    fn start_one_shot(&self, dt: u32) {
        self.start_one_shot_at(self.get_now(), dt);
    }

    /// Fires at `t0 + dt`, `t0 + 2dt`, ... where `t0` is in the past.
    fn start_periodic_at(&self, t0: u32, dt: u32);

    /// Fires once at `t0 + dt`, where `t0` is in the past.
    fn start_one_shot_at(&self, t0: u32, dt: u32);

    fn stop(&self);

    fn is_running(&self) -> bool;

    fn is_one_shot(&self) -> bool;

    fn get_now(&self) -> u32;

    /// Reference point of the current (or last) interval.
    fn t0(&self) -> u32;

    /// Length of the current (or last) interval.
    fn dt(&self) -> u32;

    fn set_client(&self, client: &'a dyn TimerClient);
}

pub trait TimerClient {
    /// Called in task context when the timer expires.
    fn fired(&self);
}
