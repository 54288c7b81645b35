// SPDX-License-Identifier: Apache-2.0

use core::cell::{Cell, RefCell};
use core::marker::PhantomData;

use critical_section::Mutex;

use crate::resource::{ResourcePool, Slot};
use crate::timer::{Timer, TimerClient};
use crate::{debug, trace};

#[derive(Clone, Copy, Default)]
struct Entry {
    t0: u32,
    dt: u32,
    one_shot: bool,
    running: bool,
    // Started by a callback of the current pass, not due until it ends
    fresh: bool,
}

impl Entry {
    /// Ticks until the deadline, negative once it has passed.
    fn remaining(&self, now: u32) -> i64 {
        self.dt as i64 - now.wrapping_sub(self.t0) as i64
    }
}

/// Multiplexes one [Timer] into up to `N` independent logical timers.
///
/// The underlying timer is always armed for the earliest deadline among the
/// running logical timers, and stopped when none is running. Expired logical
/// timers are signalled in deadline order, ties broken by the lower id.
///
/// Logical timers are handed out by slots of the pool `P`, which must not
/// hold more than `N` slots:
///
/// ```
/// use vtimer::sim::SimHardware;
/// use vtimer::{unique_slots, AlarmTimer, TaskId, TaskQueue, TMilli, Timer, TimerMux};
/// # use vtimer::Alarm;
///
/// unique_slots!(Compare => timer_alarm);
/// unique_slots!(Tasks => timer_task);
/// unique_slots!(Timers => led, radio);
///
/// let hw: SimHardware<u32, TMilli, 1> = SimHardware::new();
/// let alarm = hw.alarm(Compare::take().unwrap().timer_alarm);
/// let task = Tasks::take().unwrap().timer_task;
/// let tasks: TaskQueue<Tasks, 1> = TaskQueue::new();
/// let timer = AlarmTimer::new(&alarm, &tasks, TaskId::from(&task));
/// tasks.set_task(task, &timer);
/// alarm.set_client(&timer);
///
/// let mux: TimerMux<_, Timers, 2> = TimerMux::new(&timer);
/// timer.set_client(&mux);
/// let slots = Timers::take().unwrap();
/// let led = mux.timer(slots.led);
/// let radio = mux.timer(slots.radio);
/// led.start_periodic(500);
/// radio.start_one_shot(100);
/// assert_eq!(timer.t0() + timer.dt(), 100);
/// ```
pub struct TimerMux<'a, T: Timer<'a>, P: ResourcePool, const N: usize> {
    timer: &'a T,
    entries: Mutex<RefCell<[Entry; N]>>,
    // Set while expired timers are being signalled; rescheduling waits
    // until the pass is over
    dispatching: Mutex<Cell<bool>>,
    clients: [Cell<Option<&'a dyn TimerClient>>; N],
    _pool: PhantomData<P>,
}

impl<'a, T: Timer<'a>, P: ResourcePool, const N: usize> TimerMux<'a, T, P, N> {
    const FITS: () = assert!(
        P::CAPACITY <= N && N <= u8::MAX as usize,
        "timer pool does not fit the multiplexer"
    );

    /// Register the multiplexer as `timer`'s client before starting any
    /// logical timer.
    pub fn new(timer: &'a T) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::FITS;
        Self {
            timer,
            entries: Mutex::new(RefCell::new([Entry::default(); N])),
            dispatching: Mutex::new(Cell::new(false)),
            clients: core::array::from_fn(|_| Cell::new(None)),
            _pool: PhantomData,
        }
    }

    /// The logical timer reserved by `slot`.
    pub fn timer<const I: usize>(&'a self, slot: Slot<P, I>) -> VirtualTimer<'a, T, P, N> {
        VirtualTimer {
            mux: self,
            id: slot.index_within::<N>(),
        }
    }

    fn entry(&self, id: usize) -> Entry {
        critical_section::with(|cs| self.entries.borrow_ref(cs)[id])
    }

    fn is_dispatching(&self) -> bool {
        critical_section::with(|cs| self.dispatching.borrow(cs).get())
    }

    fn start_timer(&self, id: usize, t0: u32, dt: u32, one_shot: bool) {
        let dispatching = critical_section::with(|cs| {
            let dispatching = self.dispatching.borrow(cs).get();
            self.entries.borrow_ref_mut(cs)[id] = Entry {
                t0,
                dt,
                one_shot,
                running: true,
                fresh: dispatching,
            };
            dispatching
        });
        if !dispatching {
            self.reschedule();
        }
    }

    fn stop_timer(&self, id: usize) {
        let was = critical_section::with(|cs| {
            let mut entries = self.entries.borrow_ref_mut(cs);
            let was = entries[id];
            entries[id].running = false;
            was
        });
        if !was.running || self.is_dispatching() {
            return;
        }
        // Only the timer holding the armed deadline forces a reschedule
        let armed = self.timer.t0().wrapping_add(self.timer.dt());
        if !self.timer.is_running() || was.t0.wrapping_add(was.dt) == armed {
            self.reschedule();
        }
    }

    /// Arms the underlying timer for the earliest running deadline, or
    /// stops it if nothing is running.
    fn reschedule(&self) {
        let now = self.timer.get_now();
        let earliest = critical_section::with(|cs| {
            self.entries
                .borrow_ref(cs)
                .iter()
                .filter(|e| e.running)
                .map(|e| e.remaining(now))
                .min()
        });
        match earliest {
            None => {
                trace!("no logical timer running");
                self.timer.stop();
            }
            Some(remaining) => {
                let dt = remaining.max(0) as u32;
                trace!("next logical deadline in {}", dt);
                self.timer.start_one_shot_at(now, dt);
            }
        }
    }

    /// Picks the most overdue running timer not yet signalled in this pass,
    /// and updates its entry as if it had fired.
    fn take_expired(&self, now: u32, signalled: &[bool; N]) -> Option<usize> {
        critical_section::with(|cs| {
            let mut entries = self.entries.borrow_ref_mut(cs);
            let mut best: Option<(usize, u32)> = None;
            for (id, entry) in entries.iter().enumerate() {
                if !entry.running || entry.fresh || signalled[id] {
                    continue;
                }
                let elapsed = now.wrapping_sub(entry.t0);
                if elapsed < entry.dt {
                    continue;
                }
                let overdue = elapsed - entry.dt;
                // Strictly greater keeps the lowest id on ties
                if best.map_or(true, |(_, most)| overdue > most) {
                    best = Some((id, overdue));
                }
            }
            let (id, _) = best?;
            let entry = &mut entries[id];
            if entry.one_shot {
                entry.running = false;
            } else {
                entry.t0 = entry.t0.wrapping_add(entry.dt);
            }
            Some(id)
        })
    }
}

impl<'a, T: Timer<'a>, P: ResourcePool, const N: usize> TimerClient for TimerMux<'a, T, P, N> {
    fn fired(&self) {
        let now = self.timer.get_now();
        critical_section::with(|cs| self.dispatching.borrow(cs).set(true));
        let mut signalled = [false; N];
        while let Some(id) = self.take_expired(now, &signalled) {
            signalled[id] = true;
            match self.clients[id].get() {
                Some(client) => client.fired(),
                None => debug!("logical timer {} expired without a client", id),
            }
        }
        critical_section::with(|cs| {
            self.dispatching.borrow(cs).set(false);
            for entry in self.entries.borrow_ref_mut(cs).iter_mut() {
                entry.fresh = false;
            }
        });
        self.reschedule();
    }
}

/// One logical timer of a [TimerMux].
pub struct VirtualTimer<'a, T: Timer<'a>, P: ResourcePool, const N: usize> {
    mux: &'a TimerMux<'a, T, P, N>,
    id: usize,
}

impl<'a, T: Timer<'a>, P: ResourcePool, const N: usize> VirtualTimer<'a, T, P, N> {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl<'a, T: Timer<'a>, P: ResourcePool, const N: usize> Timer<'a> for VirtualTimer<'a, T, P, N> {
    type Precision = T::Precision;

    fn start_periodic_at(&self, t0: u32, dt: u32) {
        self.mux.start_timer(self.id, t0, dt, false);
    }

    fn start_one_shot_at(&self, t0: u32, dt: u32) {
        self.mux.start_timer(self.id, t0, dt, true);
    }

    fn stop(&self) {
        self.mux.stop_timer(self.id);
    }

    fn is_running(&self) -> bool {
        self.mux.entry(self.id).running
    }

    fn is_one_shot(&self) -> bool {
        self.mux.entry(self.id).one_shot
    }

    fn get_now(&self) -> u32 {
        self.mux.timer.get_now()
    }

    fn t0(&self) -> u32 {
        self.mux.entry(self.id).t0
    }

    fn dt(&self) -> u32 {
        self.mux.entry(self.id).dt
    }

    fn set_client(&self, client: &'a dyn TimerClient) {
        self.mux.clients[self.id].set(Some(client));
    }
}
