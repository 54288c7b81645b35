// SPDX-License-Identifier: Apache-2.0

//! Simulated timer hardware.
//!
//! [SimHardware] models a free-running counter of any supported width and
//! `K` compare channels, the way a typical microcontroller timer peripheral
//! looks. Time only moves when [SimHardware::tick] is called, and interrupts
//! are only delivered by [SimHardware::service], which makes it possible to
//! observe the window between a hardware event and its notification.

use core::cell::{Cell, RefCell};
use core::marker::PhantomData;

use critical_section::Mutex;

use crate::alarm::{Alarm, AlarmClient};
use crate::counter::{Counter, OverflowClient};
use crate::resource::{ResourcePool, Slot};
use crate::ticks::{elapsed_at_least, Precision, Ticks};

#[derive(Clone, Copy, Default)]
struct Channel<W> {
    deadline: W,
    armed: bool,
    fired_pending: bool,
}

struct Registers<W, const K: usize> {
    now: W,
    overflow_pending: bool,
    channels: [Channel<W>; K],
}

/// Counter and compare channels of one simulated timer peripheral.
pub struct SimHardware<'a, W: Ticks, P: Precision, const K: usize> {
    regs: Mutex<RefCell<Registers<W, K>>>,
    overflow_client: Cell<Option<&'a dyn OverflowClient>>,
    alarm_clients: [Cell<Option<&'a dyn AlarmClient>>; K],
    _precision: PhantomData<P>,
}

impl<'a, W: Ticks, P: Precision, const K: usize> Default for SimHardware<'a, W, P, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, W: Ticks, P: Precision, const K: usize> SimHardware<'a, W, P, K> {
    pub fn new() -> Self {
        Self::starting_at(W::ZERO)
    }

    /// Hardware whose counter reads `now` after reset.
    pub fn starting_at(now: W) -> Self {
        Self {
            regs: Mutex::new(RefCell::new(Registers {
                now,
                overflow_pending: false,
                channels: [Channel::default(); K],
            })),
            overflow_client: Cell::new(None),
            alarm_clients: core::array::from_fn(|_| Cell::new(None)),
            _precision: PhantomData,
        }
    }

    /// Compare channel reserved by `slot`.
    pub fn alarm<R: ResourcePool, const I: usize>(
        &'a self,
        slot: Slot<R, I>,
    ) -> SimAlarm<'a, W, P, K> {
        SimAlarm {
            hw: self,
            channel: slot.index_within::<K>(),
        }
    }

    /// Advances the counter by one tick, latching overflow and compare
    /// matches without notifying anybody.
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let mut regs = self.regs.borrow_ref_mut(cs);
            let now = regs.now.wrapping_add(W::from_u64(1));
            regs.now = now;
            if now == W::ZERO {
                regs.overflow_pending = true;
            }
            for channel in regs.channels.iter_mut() {
                if channel.armed && !channel.fired_pending && channel.deadline == now {
                    channel.fired_pending = true;
                }
            }
        })
    }

    /// Delivers latched notifications, overflow first.
    pub fn service(&self) {
        let overflow = critical_section::with(|cs| {
            let mut regs = self.regs.borrow_ref_mut(cs);
            core::mem::replace(&mut regs.overflow_pending, false)
        });
        if overflow {
            if let Some(client) = self.overflow_client.get() {
                client.overflow();
            }
        }
        for (index, client) in self.alarm_clients.iter().enumerate() {
            let fired = critical_section::with(|cs| {
                let mut regs = self.regs.borrow_ref_mut(cs);
                let channel = &mut regs.channels[index];
                if channel.fired_pending {
                    channel.fired_pending = false;
                    channel.armed = false;
                    true
                } else {
                    false
                }
            });
            if fired {
                if let Some(client) = client.get() {
                    client.fired();
                }
            }
        }
    }

    /// Ticks `n` times, servicing interrupts after every tick.
    pub fn advance(&self, n: u64) {
        for _ in 0..n {
            self.tick();
            self.service();
        }
    }

    fn with_channel<R>(&self, index: usize, f: impl FnOnce(W, &mut Channel<W>) -> R) -> R {
        critical_section::with(|cs| {
            let mut regs = self.regs.borrow_ref_mut(cs);
            let now = regs.now;
            f(now, &mut regs.channels[index])
        })
    }
}

impl<'a, W: Ticks, P: Precision, const K: usize> Counter<'a> for SimHardware<'a, W, P, K> {
    type Precision = P;
    type Size = W;

    fn get(&self) -> W {
        critical_section::with(|cs| self.regs.borrow_ref(cs).now)
    }

    fn is_overflow_pending(&self) -> bool {
        critical_section::with(|cs| self.regs.borrow_ref(cs).overflow_pending)
    }

    fn clear_overflow(&self) {
        critical_section::with(|cs| self.regs.borrow_ref_mut(cs).overflow_pending = false)
    }

    fn set_overflow_client(&self, client: &'a dyn OverflowClient) {
        self.overflow_client.set(Some(client));
    }
}

/// One compare channel of a [SimHardware].
pub struct SimAlarm<'a, W: Ticks, P: Precision, const K: usize> {
    hw: &'a SimHardware<'a, W, P, K>,
    channel: usize,
}

impl<'a, W: Ticks, P: Precision, const K: usize> SimAlarm<'a, W, P, K> {
    /// True if the channel has matched but not yet been serviced.
    pub fn is_fired_pending(&self) -> bool {
        self.hw.with_channel(self.channel, |_, c| c.fired_pending)
    }
}

impl<'a, W: Ticks, P: Precision, const K: usize> Alarm<'a> for SimAlarm<'a, W, P, K> {
    type Precision = P;
    type Size = W;

    fn start_at(&self, t0: W, dt: W) {
        self.hw.with_channel(self.channel, |now, channel| {
            channel.deadline = t0.wrapping_add(dt);
            channel.armed = true;
            // A deadline already behind us matches on the next service
            channel.fired_pending = elapsed_at_least(t0, now, dt);
        })
    }

    fn stop(&self) {
        self.hw.with_channel(self.channel, |_, channel| {
            channel.armed = false;
            channel.fired_pending = false;
        })
    }

    fn is_running(&self) -> bool {
        self.hw.with_channel(self.channel, |_, c| c.armed)
    }

    fn get_now(&self) -> W {
        self.hw.get()
    }

    fn get_alarm(&self) -> W {
        self.hw.with_channel(self.channel, |_, c| c.deadline)
    }

    fn set_client(&self, client: &'a dyn AlarmClient) {
        self.hw.alarm_clients[self.channel].set(Some(client));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TMilli;

    #[derive(Default)]
    struct Count(Cell<u32>);

    impl OverflowClient for Count {
        fn overflow(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    impl AlarmClient for Count {
        fn fired(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_overflow_once_per_wrap() {
        let overflows = Count::default();
        let hw: SimHardware<u8, TMilli, 1> = SimHardware::starting_at(254);
        hw.set_overflow_client(&overflows);

        hw.tick();
        assert_eq!(hw.get(), 255);
        assert!(!hw.is_overflow_pending());
        hw.tick();
        assert_eq!(hw.get(), 0);
        assert!(hw.is_overflow_pending());
        assert_eq!(overflows.0.get(), 0);
        hw.service();
        assert_eq!(overflows.0.get(), 1);
        assert!(!hw.is_overflow_pending());

        hw.advance(256);
        assert_eq!(overflows.0.get(), 2);
        hw.advance(255);
        assert_eq!(overflows.0.get(), 2);
    }

    #[test]
    fn test_clear_overflow_cancels_notification() {
        let overflows = Count::default();
        let hw: SimHardware<u8, TMilli, 1> = SimHardware::starting_at(255);
        hw.set_overflow_client(&overflows);
        hw.tick();
        hw.clear_overflow();
        hw.service();
        assert_eq!(overflows.0.get(), 0);
    }

    #[test]
    fn test_start_at_wraps_deadline() {
        let fired = Count::default();
        let hw: SimHardware<u8, TMilli, 2> = SimHardware::starting_at(252);
        crate::unique_slots!(Compare => first, second);
        let alarm = hw.alarm(Compare::take().unwrap().second);
        alarm.set_client(&fired);

        alarm.start_at(250, 10);
        assert_eq!(alarm.get_alarm(), 4);
        assert!(alarm.is_running());
        hw.advance(7);
        assert_eq!(fired.0.get(), 0);
        hw.advance(1);
        assert_eq!(hw.get(), 4);
        assert_eq!(fired.0.get(), 1);
        assert!(!alarm.is_running());
    }

    #[test]
    fn test_past_deadline_fires_immediately() {
        let fired = Count::default();
        let hw: SimHardware<u16, TMilli, 2> = SimHardware::starting_at(100);
        crate::unique_slots!(Compare => first, second);
        let alarm = hw.alarm(Compare::take().unwrap().first);
        alarm.set_client(&fired);

        alarm.start_at(50, 20);
        assert!(alarm.is_fired_pending());
        hw.service();
        assert_eq!(fired.0.get(), 1);
    }

    #[test]
    fn test_stop_disarms() {
        let fired = Count::default();
        let hw: SimHardware<u16, TMilli, 2> = SimHardware::new();
        crate::unique_slots!(Compare => first, second);
        let alarm = hw.alarm(Compare::take().unwrap().first);
        alarm.set_client(&fired);
        alarm.start(5);
        hw.advance(2);
        alarm.stop();
        hw.advance(10);
        assert_eq!(fired.0.get(), 0);
        assert!(!alarm.is_running());
    }
}
