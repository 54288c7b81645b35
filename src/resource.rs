// SPDX-License-Identifier: Apache-2.0

//! Build-time allocation of scarce hardware resources.
//!
//! Every component backed by a fixed hardware resource, such as one of a
//! handful of compare registers, needs a distinct index into that resource.
//! The [unique_slots!](crate::unique_slots) macro declares a pool together
//! with all of its users, and numbers them `0, 1, 2, ...` in declaration
//! order. The slots are handed out once, as fields of the pool value
//! returned by `take()`, and every consumer takes its slot by value, so a
//! slot wires at most one component:
//!
//! ```compile_fail
//! use vtimer::sim::SimHardware;
//! use vtimer::{unique_slots, TMilli};
//!
//! unique_slots!(CompareRegisters => radio);
//!
//! let hw: SimHardware<u16, TMilli, 1> = SimHardware::new();
//! let slots = CompareRegisters::take().unwrap();
//! let radio = hw.alarm(slots.radio);
//! let again = hw.alarm(slots.radio);
//! ```
//!
//! Consumers check the size of a pool against their hardware capacity during
//! constant evaluation, so over-subscription is a compile error:
//!
//! ```compile_fail
//! use vtimer::sim::SimHardware;
//! use vtimer::{unique_slots, TMilli};
//!
//! unique_slots!(CompareRegisters => radio, sensor);
//!
//! // The simulated timer only has one compare channel.
//! let hw: SimHardware<u16, TMilli, 1> = SimHardware::new();
//! let slots = CompareRegisters::take().unwrap();
//! let radio = hw.alarm(slots.radio);
//! ```
//!
//! A pool can also be given an explicit capacity, in which case declaring
//! more users than that fails at the declaration itself:
//!
//! ```compile_fail
//! vtimer::unique_slots!(CompareRegisters[1] => radio, sensor);
//! ```
//!
//! ```
//! vtimer::unique_slots!(CompareRegisters[2] => radio, sensor);
//!
//! let slots = CompareRegisters::take().unwrap();
//! assert_eq!(slots.radio.index(), 0);
//! assert_eq!(slots.sensor.index(), 1);
//! assert!(CompareRegisters::take().is_none());
//! ```

use core::cell::Cell;
use core::marker::PhantomData;

use critical_section::Mutex;

/// A pool of identical hardware resources.
pub trait ResourcePool: 'static {
    /// Number of indexes handed out from this pool.
    const CAPACITY: usize;
}

/// Index `I` into pool `P`.
///
/// Slots are neither `Copy` nor `Clone`. Creating a slot with
/// `I >= P::CAPACITY` fails constant evaluation.
pub struct Slot<P: ResourcePool, const I: usize> {
    _pool: PhantomData<fn() -> P>,
}

impl<P: ResourcePool, const I: usize> Slot<P, I> {
    const IN_POOL: () = assert!(I < P::CAPACITY, "resource pool exhausted");
    const IN_BYTE: () = assert!(I <= u8::MAX as usize, "slot index does not fit a byte");

    /// Declares the slot. Needs the token of the pool's one successful
    /// [Claim], which only [unique_slots!](crate::unique_slots) holds.
    #[doc(hidden)]
    pub const fn declare(_token: &Token<P>) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::IN_POOL;
        Slot { _pool: PhantomData }
    }

    pub const fn index(&self) -> usize {
        I
    }

    /// The index as a byte, fails constant evaluation past 255.
    pub(crate) fn byte_index(&self) -> u8 {
        #[allow(clippy::let_unit_value)]
        let () = Self::IN_BYTE;
        I as u8
    }

    /// Index of this slot in a piece of hardware with `K` resources.
    ///
    /// Fails constant evaluation unless the whole pool fits into `K`.
    pub fn index_within<const K: usize>(&self) -> usize {
        #[allow(clippy::let_unit_value)]
        let () = Capacity::<P, K>::FITS;
        I
    }
}

struct Capacity<P, const K: usize>(PhantomData<P>);

impl<P: ResourcePool, const K: usize> Capacity<P, K> {
    const FITS: () = assert!(P::CAPACITY <= K, "resource pool larger than hardware");
}

impl<P: ResourcePool, const I: usize> core::fmt::Debug for Slot<P, I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Slot({})", I)
    }
}

/// Proof that the slots of pool `P` are being handed out.
#[doc(hidden)]
pub struct Token<P>(PhantomData<fn() -> P>);

/// Hands out the [Token] of pool `P` once.
#[doc(hidden)]
pub struct Claim<P> {
    taken: Mutex<Cell<bool>>,
    _pool: PhantomData<fn() -> P>,
}

impl<P: ResourcePool> Claim<P> {
    pub const fn new() -> Self {
        Self {
            taken: Mutex::new(Cell::new(false)),
            _pool: PhantomData,
        }
    }

    pub fn claim(&self) -> Option<Token<P>> {
        let taken = critical_section::with(|cs| self.taken.borrow(cs).replace(true));
        if taken {
            return None;
        }
        Some(Token(PhantomData))
    }
}

/// Declares a resource pool and numbers its users.
///
/// `unique_slots!(pub Pool => a, b, c)` defines the pool type `Pool` with a
/// capacity of three, whose fields `a`, `b` and `c` are its slots `0`, `1`
/// and `2`. `Pool::take()` returns the pool the first time it is called and
/// `None` after that. `unique_slots!(pub Pool[N] => ...)` fixes the capacity
/// to `N` and fails to build if more than `N` users are listed.
#[macro_export]
macro_rules! unique_slots {
    (@assign $vis:vis $pool:ident [$cap:expr]; $idx:expr; [$($done:ident: $at:expr),*];) => {
        $vis struct $pool {
            $(pub $done: $crate::resource::Slot<$pool, { $at }>,)*
        }
        impl $crate::resource::ResourcePool for $pool {
            const CAPACITY: usize = $cap;
        }
        impl $pool {
            /// The slots of this pool, handed out once.
            #[allow(dead_code)]
            $vis fn take() -> ::core::option::Option<Self> {
                static CLAIM: $crate::resource::Claim<$pool> = $crate::resource::Claim::new();
                let token = CLAIM.claim()?;
                ::core::option::Option::Some(Self {
                    $($done: $crate::resource::Slot::declare(&token),)*
                })
            }
        }
    };
    (@assign $vis:vis $pool:ident [$cap:expr]; $idx:expr; [$($done:ident: $at:expr),*]; $name:ident $(, $rest:ident)*) => {
        $crate::unique_slots!(
            @assign $vis $pool [$cap]; $idx + 1usize; [$($done: $at,)* $name: $idx]; $($rest),*
        );
    };
    ($vis:vis $pool:ident [$cap:expr] => $($name:ident),+ $(,)?) => {
        const _: () = assert!(
            [$(stringify!($name)),+].len() <= $cap,
            "more slots declared than the pool holds"
        );
        $crate::unique_slots!(@assign $vis $pool [$cap]; 0usize; []; $($name),+);
    };
    ($vis:vis $pool:ident => $($name:ident),+ $(,)?) => {
        $crate::unique_slots!($vis $pool [[$(stringify!($name)),+].len()] => $($name),+);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_indexes() {
        crate::unique_slots!(Registers => first, second, third);
        let slots = Registers::take().unwrap();
        assert_eq!(slots.first.index(), 0);
        assert_eq!(slots.second.index(), 1);
        assert_eq!(slots.third.index(), 2);
        assert_eq!(<Registers as ResourcePool>::CAPACITY, 3);
        assert_eq!(slots.third.index_within::<4>(), 2);
    }

    #[test]
    fn test_explicit_capacity() {
        crate::unique_slots!(Wide[8] => only);
        let slots = Wide::take().unwrap();
        assert_eq!(slots.only.index(), 0);
        assert_eq!(<Wide as ResourcePool>::CAPACITY, 8);
        assert_eq!(slots.only.index_within::<8>(), 0);
    }

    #[test]
    fn test_taken_once() {
        crate::unique_slots!(Registers => first, second);
        let slots = Registers::take();
        assert!(slots.is_some());
        assert!(Registers::take().is_none());
        assert!(Registers::take().is_none());
    }

    #[test]
    fn test_byte_index() {
        crate::unique_slots!(Big[256] => first);
        static CLAIM: Claim<Big> = Claim::new();
        let token = CLAIM.claim().unwrap();
        assert!(CLAIM.claim().is_none());
        assert_eq!(Slot::<Big, 255>::declare(&token).byte_index(), 255);
        assert_eq!(Big::take().unwrap().first.byte_index(), 0);
    }
}
