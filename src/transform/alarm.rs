// SPDX-License-Identifier: Apache-2.0

use core::cell::Cell;

use critical_section::Mutex;

use crate::alarm::{Alarm, AlarmClient};
use crate::counter::Counter;
use crate::ticks::{Precision, Ticks};
use crate::trace;

/// A coarser and/or wider view of another [Alarm].
///
/// "Now" is read from `counter`, which runs at the target precision and
/// width, usually a [CounterTransform](super::CounterTransform) over the
/// same hardware. Deadlines are converted to the source precision and armed
/// on the fine-grained `alarm`.
///
/// A target delay may be longer than the source alarm can represent. Such
/// delays are armed in chunks of at most `2^(source bits - 1 - SHIFT)`
/// target ticks, and the client only hears about the last one.
///
/// For drift free periodic use, re-arm from the previous deadline with
/// `start_at(get_alarm(), dt)` rather than with `start(dt)`.
pub struct AlarmTransform<'a, A, C, const SHIFT: u32>
where
    A: Alarm<'a>,
    C: Counter<'a>,
{
    alarm: &'a A,
    counter: &'a C,
    // (t0, dt) of the next chunk to arm; dt is zero once the final chunk is armed
    deadline: Mutex<Cell<(C::Size, C::Size)>>,
    client: Cell<Option<&'a dyn AlarmClient>>,
}

impl<'a, A, C, const SHIFT: u32> AlarmTransform<'a, A, C, SHIFT>
where
    A: Alarm<'a>,
    C: Counter<'a>,
{
    const CONSISTENT: () = {
        assert!(SHIFT < <A::Size as Ticks>::BITS, "shift wider than the source");
        assert!(
            <C::Size as Ticks>::BITS >= <A::Size as Ticks>::BITS - SHIFT,
            "target narrower than the shifted source"
        );
        assert!(
            (<C::Precision as Precision>::HZ as u64) << SHIFT
                == <A::Precision as Precision>::HZ as u64,
            "target precision is not source precision >> shift"
        );
    };

    const MAX_DELAY_LOG2: u32 = <A::Size as Ticks>::BITS - 1 - SHIFT;

    /// Builds the transform. Register it as the source alarm's client.
    pub fn new(alarm: &'a A, counter: &'a C) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CONSISTENT;
        Self {
            alarm,
            counter,
            deadline: Mutex::new(Cell::new((
                <C::Size as Ticks>::ZERO,
                <C::Size as Ticks>::ZERO,
            ))),
            client: Cell::new(None),
        }
    }

    fn max_delay() -> C::Size {
        <C::Size as Ticks>::from_u64(1u64 << Self::MAX_DELAY_LOG2)
    }

    /// Arms the source alarm for the next chunk of the stored deadline.
    /// Must be called with interrupts disabled.
    fn arm(&self, deadline: &Cell<(C::Size, C::Size)>) {
        let now = self.counter.get();
        let (mut t0, mut dt) = deadline.get();
        let expires = t0.wrapping_add(dt);
        let mut remaining = expires.wrapping_sub(now);

        // Has `expires` passed already? t0 is in the past, so the interval
        // t0..now may straddle a wrap.
        let passed = if t0 <= now {
            expires >= t0 && expires <= now
        } else {
            expires >= t0 || expires <= now
        };
        if passed {
            remaining = <C::Size as Ticks>::ZERO;
        }

        let max_delay = Self::max_delay();
        if remaining > max_delay {
            trace!(
                "alarm transform chunking, {} target ticks left",
                remaining.into_u64()
            );
            t0 = now.wrapping_add(max_delay);
            dt = remaining.wrapping_sub(max_delay);
            remaining = max_delay;
        } else {
            t0 = t0.wrapping_add(dt);
            dt = <C::Size as Ticks>::ZERO;
        }
        deadline.set((t0, dt));

        self.alarm.start_at(
            <A::Size as Ticks>::from_u64(now.into_u64() << SHIFT),
            <A::Size as Ticks>::from_u64(remaining.into_u64() << SHIFT),
        );
    }
}

impl<'a, A, C, const SHIFT: u32> Alarm<'a> for AlarmTransform<'a, A, C, SHIFT>
where
    A: Alarm<'a>,
    C: Counter<'a>,
{
    type Precision = C::Precision;
    type Size = C::Size;

    fn start_at(&self, t0: C::Size, dt: C::Size) {
        critical_section::with(|cs| {
            let deadline = self.deadline.borrow(cs);
            deadline.set((t0, dt));
            self.arm(deadline);
        })
    }

    fn stop(&self) {
        critical_section::with(|cs| {
            // Drop any chunks still to go, keeping the final deadline
            let deadline = self.deadline.borrow(cs);
            let (t0, dt) = deadline.get();
            deadline.set((t0.wrapping_add(dt), <C::Size as Ticks>::ZERO));
            self.alarm.stop();
        })
    }

    fn is_running(&self) -> bool {
        self.alarm.is_running()
    }

    fn get_now(&self) -> C::Size {
        self.counter.get()
    }

    fn get_alarm(&self) -> C::Size {
        critical_section::with(|cs| {
            let (t0, dt) = self.deadline.borrow(cs).get();
            t0.wrapping_add(dt)
        })
    }

    fn set_client(&self, client: &'a dyn AlarmClient) {
        self.client.set(Some(client));
    }
}

impl<'a, A, C, const SHIFT: u32> AlarmClient for AlarmTransform<'a, A, C, SHIFT>
where
    A: Alarm<'a>,
    C: Counter<'a>,
{
    fn fired(&self) {
        let done = critical_section::with(|cs| {
            let deadline = self.deadline.borrow(cs);
            if deadline.get().1 == <C::Size as Ticks>::ZERO {
                true
            } else {
                self.arm(deadline);
                false
            }
        });
        if done {
            if let Some(client) = self.client.get() {
                client.fired();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimAlarm, SimHardware};
    use crate::transform::CounterTransform;
    use crate::{T32khz, TMilli};

    type Hw<'a> = SimHardware<'a, u16, T32khz, 1>;
    type Millis<'a> = CounterTransform<'a, Hw<'a>, u32, TMilli, 5>;
    type MilliAlarm<'a> = AlarmTransform<'a, SimAlarm<'a, u16, T32khz, 1>, Millis<'a>, 5>;

    struct FiredAt<'r> {
        now: &'r dyn Fn() -> u32,
        at: Cell<Option<u32>>,
        count: Cell<u32>,
    }

    impl AlarmClient for FiredAt<'_> {
        fn fired(&self) {
            self.at.set(Some((self.now)()));
            self.count.set(self.count.get() + 1);
        }
    }

    #[test]
    fn test_max_delay() {
        assert_eq!(MilliAlarm::MAX_DELAY_LOG2, 10);
        assert_eq!(MilliAlarm::max_delay(), 1024);
    }

    #[test]
    fn test_short_delay() {
        let hw = Hw::new();
        let ms = Millis::new(&hw);
        hw.set_overflow_client(&ms);
        crate::unique_slots!(Compare => alarm);
        let raw = hw.alarm(Compare::take().unwrap().alarm);
        let alarm = MilliAlarm::new(&raw, &ms);
        raw.set_client(&alarm);
        let now = || ms.get();
        let fired = FiredAt {
            now: &now,
            at: Cell::new(None),
            count: Cell::new(0),
        };
        alarm.set_client(&fired);

        alarm.start(10);
        assert_eq!(alarm.get_alarm(), 10);
        assert_eq!(raw.get_alarm(), 320);
        assert!(alarm.is_running());
        hw.advance(319);
        assert_eq!(fired.count.get(), 0);
        hw.advance(1);
        assert_eq!(fired.at.get(), Some(10));
        assert!(!alarm.is_running());
    }

    #[test]
    fn test_long_delay_is_chunked() {
        let hw = Hw::new();
        let ms = Millis::new(&hw);
        hw.set_overflow_client(&ms);
        crate::unique_slots!(Compare => alarm);
        let raw = hw.alarm(Compare::take().unwrap().alarm);
        let alarm = MilliAlarm::new(&raw, &ms);
        raw.set_client(&alarm);
        let now = || ms.get();
        let fired = FiredAt {
            now: &now,
            at: Cell::new(None),
            count: Cell::new(0),
        };
        alarm.set_client(&fired);

        // Longer than a full wrap of the 16-bit source
        alarm.start(3000);
        assert_eq!(alarm.get_alarm(), 3000);
        hw.advance(2999 * 32);
        assert_eq!(fired.count.get(), 0);
        assert!(alarm.is_running());
        hw.advance(32);
        assert_eq!(fired.count.get(), 1);
        assert_eq!(fired.at.get(), Some(3000));
        assert_eq!(alarm.get_alarm(), 3000);
    }

    #[test]
    fn test_start_at_in_the_past() {
        let hw = Hw::starting_at(3200);
        let ms = Millis::new(&hw);
        hw.set_overflow_client(&ms);
        crate::unique_slots!(Compare => alarm);
        let raw = hw.alarm(Compare::take().unwrap().alarm);
        let alarm = MilliAlarm::new(&raw, &ms);
        raw.set_client(&alarm);
        let now = || ms.get();
        let fired = FiredAt {
            now: &now,
            at: Cell::new(None),
            count: Cell::new(0),
        };
        alarm.set_client(&fired);

        assert_eq!(ms.get(), 100);
        alarm.start_at(50, 20);
        hw.service();
        assert_eq!(fired.count.get(), 1);
        assert_eq!(alarm.get_alarm(), 70);
    }

    #[test]
    fn test_periodic_rearm_from_deadline() {
        let hw = Hw::new();
        let ms = Millis::new(&hw);
        hw.set_overflow_client(&ms);
        crate::unique_slots!(Compare => alarm);
        let raw = hw.alarm(Compare::take().unwrap().alarm);
        let alarm = MilliAlarm::new(&raw, &ms);
        raw.set_client(&alarm);
        let now = || ms.get();
        let fired = FiredAt {
            now: &now,
            at: Cell::new(None),
            count: Cell::new(0),
        };
        alarm.set_client(&fired);

        alarm.start(7);
        hw.advance(7 * 32);
        for period in 1..=400u32 {
            assert_eq!(fired.at.get(), Some(7 * period));
            // Late handler: some time passes before the next deadline is set
            hw.advance(3);
            alarm.start_at(alarm.get_alarm(), 7);
            hw.advance(7 * 32 - 3);
        }
        assert_eq!(fired.count.get(), 401);
    }

    #[test]
    fn test_stop_between_chunks() {
        let hw = Hw::new();
        let ms = Millis::new(&hw);
        hw.set_overflow_client(&ms);
        crate::unique_slots!(Compare => alarm);
        let raw = hw.alarm(Compare::take().unwrap().alarm);
        let alarm = MilliAlarm::new(&raw, &ms);
        raw.set_client(&alarm);
        let now = || ms.get();
        let fired = FiredAt {
            now: &now,
            at: Cell::new(None),
            count: Cell::new(0),
        };
        alarm.set_client(&fired);

        alarm.start(3000);
        // Past the first chunk, the second one is armed
        hw.advance(1500 * 32);
        assert!(alarm.is_running());
        alarm.stop();
        assert!(!alarm.is_running());
        assert!(!raw.is_running());
        assert_eq!(alarm.get_alarm(), 3000);
        hw.advance(3000 * 32);
        assert_eq!(fired.count.get(), 0);

        // A source expiry racing the stop does not arm another chunk
        AlarmClient::fired(&alarm);
        assert!(!raw.is_running());
    }
}
