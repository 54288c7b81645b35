// SPDX-License-Identifier: Apache-2.0

use core::cell::Cell;

use critical_section::Mutex;

use crate::alarm::{Alarm, AlarmClient};
use crate::task::{Post, Task, TaskId};
use crate::timer::{Timer, TimerClient};
use crate::{debug, trace};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    Stopped,
    OneShot,
    Periodic,
}

#[derive(Clone, Copy)]
struct State {
    mode: Mode,
    dt: u32,
    // An expiry happened that the client has not heard about yet
    due: bool,
}

/// Turns an interrupt context [Alarm] into a task context [Timer].
///
/// Alarm expiry posts a deferred task, which then calls the client. Periodic
/// timers are re-armed from the previous deadline straight from the alarm
/// interrupt, so the period stays exact however late the task runs. Expiries
/// that happen before the task gets to run are coalesced into one call.
pub struct AlarmTimer<'a, A: Alarm<'a, Size = u32>> {
    alarm: &'a A,
    tasks: &'a dyn Post,
    task: TaskId,
    state: Mutex<Cell<State>>,
    client: Cell<Option<&'a dyn TimerClient>>,
}

impl<'a, A: Alarm<'a, Size = u32>> AlarmTimer<'a, A> {
    /// `task` is the id this timer is registered under in `tasks`.
    pub fn new(alarm: &'a A, tasks: &'a dyn Post, task: TaskId) -> Self {
        Self {
            alarm,
            tasks,
            task,
            state: Mutex::new(Cell::new(State {
                mode: Mode::Stopped,
                dt: 0,
                due: false,
            })),
            client: Cell::new(None),
        }
    }

    fn start(&self, t0: u32, dt: u32, mode: Mode) {
        critical_section::with(|cs| {
            self.state.borrow(cs).set(State {
                mode,
                dt,
                due: false,
            });
            self.alarm.start_at(t0, dt);
        })
    }

    fn state(&self) -> State {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }
}

impl<'a, A: Alarm<'a, Size = u32>> Timer<'a> for AlarmTimer<'a, A> {
    type Precision = A::Precision;

    fn start_periodic_at(&self, t0: u32, dt: u32) {
        self.start(t0, dt, Mode::Periodic);
    }

    fn start_one_shot_at(&self, t0: u32, dt: u32) {
        self.start(t0, dt, Mode::OneShot);
    }

    fn stop(&self) {
        critical_section::with(|cs| {
            let state = self.state.borrow(cs);
            state.set(State {
                mode: Mode::Stopped,
                due: false,
                ..state.get()
            });
            self.alarm.stop();
        })
    }

    fn is_running(&self) -> bool {
        self.state().mode != Mode::Stopped
    }

    fn is_one_shot(&self) -> bool {
        self.state().mode == Mode::OneShot
    }

    fn get_now(&self) -> u32 {
        self.alarm.get_now()
    }

    fn t0(&self) -> u32 {
        critical_section::with(|cs| {
            let dt = self.state.borrow(cs).get().dt;
            self.alarm.get_alarm().wrapping_sub(dt)
        })
    }

    fn dt(&self) -> u32 {
        self.state().dt
    }

    fn set_client(&self, client: &'a dyn TimerClient) {
        self.client.set(Some(client));
    }
}

impl<'a, A: Alarm<'a, Size = u32>> AlarmClient for AlarmTimer<'a, A> {
    fn fired(&self) {
        let post = critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            match state.mode {
                Mode::Stopped => return false,
                Mode::Periodic => {
                    // Phase locked to the previous deadline, not to now
                    self.alarm.start_at(self.alarm.get_alarm(), state.dt);
                }
                Mode::OneShot => {}
            }
            let coalesced = state.due;
            state.due = true;
            cell.set(state);
            !coalesced
        });
        if !post {
            trace!("timer expiry coalesced");
            return;
        }
        if self.tasks.post(self.task).is_err() {
            trace!("timer task {} already queued", self.task.0);
        }
    }
}

impl<'a, A: Alarm<'a, Size = u32>> Task for AlarmTimer<'a, A> {
    fn run(&self) {
        let deliver = critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            if !state.due {
                return false;
            }
            state.due = false;
            if state.mode == Mode::OneShot {
                state.mode = Mode::Stopped;
            }
            cell.set(state);
            true
        });
        if !deliver {
            debug!("timer task {} ran with nothing due", self.task.0);
            return;
        }
        if let Some(client) = self.client.get() {
            client.fired();
        }
    }
}
