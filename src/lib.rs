// SPDX-License-Identifier: Apache-2.0

//! Hardware independent timing for small embedded nodes.
//!
//! The crate layers a handful of small components on top of two hardware
//! primitives, a free-running [Counter] with an overflow notification and a
//! single-shot compare [Alarm] with a fired notification:
//!
//! * [CounterTransform] and [AlarmTransform] turn a fine, narrow hardware
//!   clock into a coarser and/or wider one.
//! * [AlarmTimer] moves alarm expiry out of interrupt context into a
//!   deferred [Task], and re-arms periodic alarms without drift.
//! * [TimerMux] splits one [Timer] into many independent logical timers.
//! * [CounterLocalTime] and [CounterBusyWait] are thin utilities on top of
//!   any counter.
//! * [unique_slots!] hands out indexes into scarce hardware pools once, and
//!   fails the build when a pool is over-subscribed.
//!
//! Components are wired by hand: each one borrows the layer below it, and
//! registers itself as the notification client of that layer.
//!
//! ```
//! use vtimer::sim::SimHardware;
//! use vtimer::{unique_slots, Alarm, AlarmTimer, TaskId, TaskQueue, TMilli, Timer, TimerClient};
//!
//! unique_slots!(CompareRegisters => timer_alarm);
//! unique_slots!(Tasks => timer_task);
//!
//! struct Blink;
//! impl TimerClient for Blink {
//!     fn fired(&self) {}
//! }
//!
//! let hw: SimHardware<u32, TMilli, 1> = SimHardware::new();
//! let alarm = hw.alarm(CompareRegisters::take().unwrap().timer_alarm);
//! let task = Tasks::take().unwrap().timer_task;
//! let queue: TaskQueue<Tasks, 1> = TaskQueue::new();
//! let timer = AlarmTimer::new(&alarm, &queue, TaskId::from(&task));
//! queue.set_task(task, &timer);
//! alarm.set_client(&timer);
//!
//! let blink = Blink;
//! timer.set_client(&blink);
//! timer.start_periodic(250);
//! for _ in 0..1000 {
//!     hw.advance(1);
//!     queue.run_all();
//! }
//! assert_eq!(timer.t0(), 1000);
//! ```
#![cfg_attr(not(test), no_std)]

#[cfg(feature = "std")]
extern crate std;

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
pub(crate) use defmt::{debug, error, info, trace, warn};
#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
pub(crate) use log::{debug, error, info, trace, warn};

mod alarm;
mod alarm_timer;
mod busy_wait;
mod counter;
pub mod errors;
mod local_time;
pub mod resource;
pub mod sim;
pub mod systick;
mod task;
mod ticks;
mod timer;
mod transform;
mod virtualize;

pub use alarm::{Alarm, AlarmClient};
pub use alarm_timer::AlarmTimer;
pub use busy_wait::{BusyWait, CounterBusyWait};
pub use counter::{Counter, OverflowClient};
pub use errors::Error;
pub use local_time::{CounterLocalTime, LocalTime};
pub use resource::{ResourcePool, Slot};
pub use task::{Post, Task, TaskId, TaskQueue};
pub use ticks::{Precision, T32khz, TMicro, TMilli, Ticks};
pub use timer::{Timer, TimerClient};
pub use transform::{AlarmTransform, CounterTransform};
pub use virtualize::{TimerMux, VirtualTimer};
