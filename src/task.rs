// SPDX-License-Identifier: Apache-2.0

use core::cell::{Cell, RefCell};
use core::marker::PhantomData;

use arrayvec::ArrayVec;
use critical_section::Mutex;

use crate::errors::Error;
use crate::resource::{ResourcePool, Slot};
use crate::{error, trace};

/// Work deferred out of interrupt context.
pub trait Task {
    /// Runs in task context, never preempted by another task.
    fn run(&self);
}

/// Identifies a task registered with a [TaskQueue].
///
/// Converting a slot past index 255 fails to build:
///
/// ```compile_fail
/// use vtimer::resource::{Claim, Slot};
/// use vtimer::TaskId;
///
/// vtimer::unique_slots!(Tasks[300] => first);
///
/// static CLAIM: Claim<Tasks> = Claim::new();
/// let token = CLAIM.claim().unwrap();
/// let id = TaskId::from(&Slot::<Tasks, 256>::declare(&token));
/// ```
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TaskId(pub u8);

impl<P: ResourcePool, const I: usize> From<&Slot<P, I>> for TaskId {
    fn from(slot: &Slot<P, I>) -> Self {
        TaskId(slot.byte_index())
    }
}

/// Interrupt-safe posting of deferred tasks.
pub trait Post {
    /// Queues the task. Posting a task that is already queued coalesces
    /// with the queued instance and returns [Error::Busy].
    fn post(&self, task: TaskId) -> Result<(), Error>;
}

struct Pending<const N: usize> {
    fifo: ArrayVec<u8, N>,
    queued: [bool; N],
}

/// Fixed capacity FIFO of deferred tasks.
///
/// Task ids come from the pool `P`, which must hold at most `N` slots. Each
/// task is queued at most once, so the FIFO never overflows.
pub struct TaskQueue<'a, P: ResourcePool, const N: usize> {
    tasks: [Cell<Option<&'a dyn Task>>; N],
    pending: Mutex<RefCell<Pending<N>>>,
    _pool: PhantomData<P>,
}

impl<'a, P: ResourcePool, const N: usize> Default for TaskQueue<'a, P, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, P: ResourcePool, const N: usize> TaskQueue<'a, P, N> {
    const FITS: () = assert!(
        P::CAPACITY <= N && N <= u8::MAX as usize,
        "task pool does not fit the queue"
    );

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::FITS;
        Self {
            tasks: core::array::from_fn(|_| Cell::new(None)),
            pending: Mutex::new(RefCell::new(Pending {
                fifo: ArrayVec::new(),
                queued: [false; N],
            })),
            _pool: PhantomData,
        }
    }

    /// Registers the task behind `slot`. Post it with `TaskId::from(&slot)`.
    pub fn set_task<const I: usize>(&self, slot: Slot<P, I>, task: &'a dyn Task) {
        self.tasks[slot.index_within::<N>()].set(Some(task));
    }

    /// Runs the oldest queued task. Returns false if nothing was queued.
    pub fn run_next(&self) -> bool {
        let next = critical_section::with(|cs| {
            let mut pending = self.pending.borrow_ref_mut(cs);
            if pending.fifo.is_empty() {
                return None;
            }
            let id = pending.fifo.remove(0);
            pending.queued[id as usize] = false;
            Some(id)
        });
        let Some(id) = next else {
            return false;
        };
        match self.tasks[id as usize].get() {
            Some(task) => task.run(),
            None => error!("posted task {} has no handler", id),
        }
        true
    }

    /// Runs tasks until the queue is empty, including tasks posted while
    /// running.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow_ref(cs).fifo.is_empty())
    }
}

impl<'a, P: ResourcePool, const N: usize> Post for TaskQueue<'a, P, N> {
    fn post(&self, task: TaskId) -> Result<(), Error> {
        let index = task.0 as usize;
        if index >= N || self.tasks[index].get().is_none() {
            error!("post of unregistered task {}", task.0);
            return Err(Error::NoTask);
        }
        critical_section::with(|cs| {
            let mut pending = self.pending.borrow_ref_mut(cs);
            if pending.queued[index] {
                trace!("task {} already queued", task.0);
                return Err(Error::Busy);
            }
            pending.queued[index] = true;
            pending.fifo.push(task.0);
            Ok(())
        })
    }
}
