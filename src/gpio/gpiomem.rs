use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::gpio::{Direction, Function, HalError, Level, PullUpDown, RegisterMap};
use crate::system::ChipFamily;

pub mod bcm;
pub mod sunxi;

/// Hardware event detection modes.
///
/// Only Broadcom chips have event detect registers. The level-triggered modes
/// are exposed for completeness, but the edge engine only arms the edge modes.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[allow(dead_code)]
pub(crate) enum DetectKind {
    Rising,
    Falling,
    High,
    Low,
}

/// Chip-specific register layout and bit encodings.
///
/// Pins are the chip's logical pin numbers, and are assumed to be valid for the
/// chip. Validation happens before a pin reaches this layer.
pub(crate) trait GpioRegisters: fmt::Debug + Sync + Send {
    /// Number of logical pins addressable through this layout.
    fn pin_count(&self) -> u16;
    fn set_direction(&self, pin: u16, direction: Direction);
    fn set_pullupdown(&self, pin: u16, pud: PullUpDown);
    fn function(&self, pin: u16) -> Function;
    fn set_level(&self, pin: u16, level: Level);
    fn level(&self, pin: u16) -> Level;
    fn set_detect(&self, pin: u16, kind: DetectKind, enabled: bool) -> Result<(), HalError>;
    /// Reads and clears the pin's event status bit.
    fn event_detected(&self, pin: u16) -> Result<bool, HalError>;
    fn clear_event(&self, pin: u16) -> Result<(), HalError>;

    /// Configures the pull resistor, then the direction.
    fn setup(&self, pin: u16, direction: Direction, pud: PullUpDown) {
        self.set_pullupdown(pin, pud);
        self.set_direction(pin, direction);
    }
}

/// Selects the register layout for the chip family.
pub(crate) fn open(
    chip_family: ChipFamily,
    registers: Arc<dyn RegisterMap>,
) -> Arc<dyn GpioRegisters> {
    match chip_family {
        ChipFamily::Bcm => Arc::new(bcm::GpioMem::new(registers)),
        ChipFamily::Sunxi => Arc::new(sunxi::GpioMem::new(registers)),
    }
}

// Spin locks guarding read-modify-write sequences, one per register word.
pub(crate) struct RegisterLocks<const N: usize> {
    locks: [AtomicBool; N],
}

impl<const N: usize> RegisterLocks<N> {
    pub(crate) fn new() -> RegisterLocks<N> {
        RegisterLocks {
            locks: init_array!(AtomicBool::new(false), N),
        }
    }

    pub(crate) fn lock(&self, offset: usize) -> RegisterGuard<'_> {
        let lock = &self.locks[offset];

        while lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }

        RegisterGuard { lock }
    }

    // Acquires both locks without holding one while spinning on the other.
    pub(crate) fn lock_pair(
        &self,
        first: usize,
        second: usize,
    ) -> (RegisterGuard<'_>, RegisterGuard<'_>) {
        loop {
            let guard = self.lock(first);

            if self.locks[second]
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return (
                    guard,
                    RegisterGuard {
                        lock: &self.locks[second],
                    },
                );
            }

            drop(guard);
            std::hint::spin_loop();
        }
    }
}

impl<const N: usize> fmt::Debug for RegisterLocks<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterLocks")
            .field("locks", &format_args!("{{ .. }}"))
            .finish()
    }
}

pub(crate) struct RegisterGuard<'a> {
    lock: &'a AtomicBool,
}

impl Drop for RegisterGuard<'_> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn locks_serialize_updates() {
        let locks = Arc::new(RegisterLocks::<2>::new());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guards = locks.lock_pair(0, 1);
                        // A non-atomic read-modify-write would lose updates without the lock.
                        let value = counter.load(Ordering::Relaxed);
                        counter.store(value + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 4000);
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = RegisterLocks::<1>::new();

        drop(locks.lock(0));
        let _guard = locks.lock(0);
    }
}
