// SPDX-License-Identifier: Apache-2.0

//! 32-bit [Counter] on the Cortex-M SysTick timer.
//!
//! SysTick is a 24-bit down-counter. Running it with the maximum reload value
//! and counting its wraps in software gives a 32-bit up-counter at the
//! SysTick clock rate:
//!
//! ```text
//!  get():  [ wraps (8 bits) | 0xFF_FFFF - SYST.CVR (24 bits) ]
//! ```
//!
//! Call [SystickCounter::systick_handler] from the SysTick exception handler.
//! The precision tag `P` must describe the SysTick clock, usually the core
//! clock.

use core::cell::Cell;
use core::marker::PhantomData;
#[cfg(test)]
use core::sync::atomic::{AtomicBool, AtomicU32};
use core::sync::atomic::{AtomicU8, Ordering};

use critical_section::Mutex;

use crate::counter::{Counter, OverflowClient};
use crate::ticks::Precision;
use crate::trace;

/// SysTick reload value, the full 24 bits.
pub const RELOAD: u32 = 0x00FF_FFFF;

const RELOAD_BITS: u32 = 24;

/// Usually a `static`, shared with the SysTick exception handler:
///
/// ```
/// use vtimer::systick::SystickCounter;
/// use vtimer::TMicro;
///
/// static COUNTER: SystickCounter<'static, TMicro> = SystickCounter::new();
/// ```
pub struct SystickCounter<'a, P: Precision> {
    wraps: AtomicU8, // Reloads since the 32-bit value last wrapped
    client: Mutex<Cell<Option<&'a dyn OverflowClient>>>,
    _precision: PhantomData<P>,
    #[cfg(test)]
    current_systick: AtomicU32,
    #[cfg(test)]
    pendst: AtomicBool,
}

// SAFETY: the wrap count is atomic and the client is only touched inside a
// critical section. The overflow client itself runs in the SysTick handler.
unsafe impl<P: Precision> Sync for SystickCounter<'_, P> {}

impl<'a, P: Precision> Default for SystickCounter<'a, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, P: Precision> SystickCounter<'a, P> {
    pub const fn new() -> Self {
        Self {
            wraps: AtomicU8::new(0),
            client: Mutex::new(Cell::new(None)),
            _precision: PhantomData,
            #[cfg(test)]
            current_systick: AtomicU32::new(RELOAD),
            #[cfg(test)]
            pendst: AtomicBool::new(false),
        }
    }

    /// SysTick handler.
    ///
    /// Call this from the SysTick interrupt handler.
    pub fn systick_handler(&self) {
        let wraps = self.wraps.load(Ordering::Relaxed).wrapping_add(1);
        self.wraps.store(wraps, Ordering::SeqCst);
        if wraps == 0 {
            trace!("systick counter wrapped");
            let client = critical_section::with(|cs| self.client.borrow(cs).get());
            if let Some(client) = client {
                client.overflow();
            }
        }
    }

    /// Interrupt handler for nested interrupts.
    ///
    /// Call this instead of systick_handler from the interrupt handler, if
    /// you have nested interrupts enabled.
    #[cfg(feature = "cortex-m")]
    pub fn systick_interrupt_for_nested(&self) {
        cortex_m::interrupt::free(|_| {
            self.systick_handler();
        })
    }

    /// Call this if you haven't already started SysTick.
    #[cfg(feature = "cortex-m")]
    pub fn start(&self, syst: &mut cortex_m::peripheral::SYST) {
        syst.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
        syst.set_reload(RELOAD);
        syst.clear_current();
        syst.enable_interrupt();
        syst.enable_counter();
    }

    /// Returns the current SysTick counter value.
    fn get_syst(&self) -> u32 {
        #[cfg(test)]
        return self.current_systick.load(Ordering::SeqCst);

        #[cfg(all(not(test), feature = "cortex-m"))]
        return cortex_m::peripheral::SYST::get_current();

        #[cfg(all(not(test), not(feature = "cortex-m")))]
        panic!("This module requires the cortex-m crate to be available");
    }

    /// True if SysTick reloaded but its handler has not run yet.
    fn pendst(&self) -> bool {
        #[cfg(test)]
        return self.pendst.load(Ordering::SeqCst);

        #[cfg(all(not(test), feature = "cortex-m"))]
        return cortex_m::peripheral::SCB::is_pendst_pending();

        #[cfg(all(not(test), not(feature = "cortex-m")))]
        panic!("This module requires the cortex-m crate to be available");
    }

    fn clear_pendst(&self) {
        #[cfg(test)]
        self.pendst.store(false, Ordering::SeqCst);

        #[cfg(all(not(test), feature = "cortex-m"))]
        cortex_m::peripheral::SCB::clear_pendst();
    }
}

impl<'a, P: Precision> Counter<'a> for SystickCounter<'a, P> {
    type Precision = P;
    type Size = u32;

    fn get(&self) -> u32 {
        // Note: This does not enter critical section and block other interrupts.
        loop {
            let before = self.wraps.load(Ordering::SeqCst);
            let mut wraps = before;
            let mut current = self.get_syst();
            if self.pendst() {
                // Reloaded under our feet, or we are in a critical section
                // and the handler can't run. Either way read again, the
                // first value may predate the reload.
                current = self.get_syst();
                wraps = wraps.wrapping_add(1);
            }
            if self.wraps.load(Ordering::SeqCst) == before {
                return ((wraps as u32) << RELOAD_BITS) | (RELOAD - current);
            }
        }
    }

    fn is_overflow_pending(&self) -> bool {
        self.wraps.load(Ordering::SeqCst) == u8::MAX && self.pendst()
    }

    fn clear_overflow(&self) {
        if self.is_overflow_pending() {
            self.clear_pendst();
            self.wraps.store(0, Ordering::SeqCst);
        }
    }

    fn set_overflow_client(&self, client: &'a dyn OverflowClient) {
        critical_section::with(|cs| self.client.borrow(cs).set(Some(client)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Core16Mhz {}
    impl Precision for Core16Mhz {
        const HZ: u32 = 16_000_000;
    }

    struct Count(Cell<u32>);
    impl OverflowClient for Count {
        fn overflow(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    type Systick<'a> = SystickCounter<'a, Core16Mhz>;

    trait TestSystick {
        fn interrupt(&self);
        fn set_tick(&self, tick: u32) -> u32;
    }

    impl TestSystick for Systick<'_> {
        /// Reload followed by the handler running.
        fn interrupt(&self) {
            self.current_systick.store(RELOAD, Ordering::SeqCst);
            self.systick_handler();
        }
        fn set_tick(&self, tick: u32) -> u32 {
            assert!(tick <= RELOAD);
            self.current_systick.store(tick, Ordering::SeqCst);
            self.get()
        }
    }

    #[test]
    fn test_initial_state() {
        let systick = Systick::new();
        assert_eq!(systick.get(), 0);
        assert!(!systick.is_overflow_pending());
    }

    #[test]
    fn test_counts_up() {
        let systick = Systick::new();
        assert_eq!(systick.set_tick(RELOAD - 1), 1);
        assert_eq!(systick.set_tick(0), RELOAD);
        systick.interrupt();
        assert_eq!(systick.get(), 1 << 24);
        assert_eq!(systick.set_tick(RELOAD - 3), (1 << 24) + 3);
    }

    #[test]
    fn test_pending_reload_is_counted() {
        let systick = Systick::new();
        systick.current_systick.store(RELOAD - 5, Ordering::SeqCst);
        systick.pendst.store(true, Ordering::SeqCst);
        assert_eq!(systick.get(), (1 << 24) + 5);
        // Once the handler runs the value stays the same
        systick.pendst.store(false, Ordering::SeqCst);
        systick.systick_handler();
        assert_eq!(systick.get(), (1 << 24) + 5);
    }

    #[test]
    fn test_overflow_every_256_reloads() {
        let count = Count(Cell::new(0));
        let systick = Systick::new();
        systick.set_overflow_client(&count);
        for _ in 0..255 {
            systick.interrupt();
        }
        assert_eq!(count.0.get(), 0);
        assert_eq!(systick.set_tick(0), u32::MAX);
        systick.interrupt();
        assert_eq!(count.0.get(), 1);
        assert_eq!(systick.get(), 0);
    }

    #[test]
    fn test_clear_overflow() {
        let count = Count(Cell::new(0));
        let systick = Systick::new();
        systick.set_overflow_client(&count);
        for _ in 0..255 {
            systick.interrupt();
        }
        assert!(!systick.is_overflow_pending());
        systick.current_systick.store(RELOAD, Ordering::SeqCst);
        systick.pendst.store(true, Ordering::SeqCst);
        assert!(systick.is_overflow_pending());
        assert_eq!(systick.get(), 0);

        systick.clear_overflow();
        assert!(!systick.is_overflow_pending());
        assert_eq!(systick.get(), 0);
        assert_eq!(count.0.get(), 0);
    }

    #[test]
    fn test_static_counter() {
        static COUNTER: Systick<'static> = SystickCounter::new();
        static OVERFLOWS: AtomicU32 = AtomicU32::new(0);

        struct Overflows;
        impl OverflowClient for Overflows {
            fn overflow(&self) {
                OVERFLOWS.fetch_add(1, Ordering::SeqCst);
            }
        }
        static CLIENT: Overflows = Overflows;

        COUNTER.set_overflow_client(&CLIENT);
        assert_eq!(COUNTER.set_tick(RELOAD - 7), 7);
        for _ in 0..256 {
            COUNTER.interrupt();
        }
        assert_eq!(OVERFLOWS.load(Ordering::SeqCst), 1);
        assert_eq!(COUNTER.get(), 0);

        // Read from another thread, as an interrupt handler would
        let seen = std::thread::spawn(|| COUNTER.set_tick(RELOAD - 9)).join().unwrap();
        assert_eq!(seen, 9);
    }
}
