//! In-memory register and edge source fakes.
//!
//! [`FakeRegisters`] stands in for the memory-mapped register window and records
//! every access, so tests can verify register protocols. On Broadcom layouts,
//! writes to the set and clear registers are looped back into the level
//! registers, the way a pin driving itself would read back, and the event
//! status registers are write-1-to-clear. [`FakeEdgeSource`]
//! replaces the OS edge notifications with explicit triggers.
//!
//! ```
//! use std::sync::Arc;
//!
//! use sbc_gpio::gpio::mock::{FakeEdgeSource, FakeRegisters};
//! use sbc_gpio::gpio::{Direction, Gpio, Level, NumberingMode, PullUpDown};
//! use sbc_gpio::system::{BoardDescriptor, ChipFamily};
//!
//! # fn main() -> sbc_gpio::gpio::Result<()> {
//! let board = BoardDescriptor::new(ChipFamily::Bcm, 3);
//! let registers = Arc::new(FakeRegisters::new(ChipFamily::Bcm));
//! let gpio = Gpio::with_registers(board, registers, Arc::new(FakeEdgeSource::new()));
//!
//! gpio.set_numbering(NumberingMode::NativeChip)?;
//! gpio.setup(23, Direction::Output, PullUpDown::Off, None)?;
//! gpio.output(23, Level::High)?;
//! assert_eq!(gpio.input(23)?, Level::High);
//! # Ok(())
//! # }
//! ```
//!
//! [`FakeRegisters`]: struct.FakeRegisters.html
//! [`FakeEdgeSource`]: struct.FakeEdgeSource.html

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::gpio::{Edge, EdgeError, EdgeEvent, EdgeSink, EdgeSource, EdgeWatch, Level, RegisterMap};
use crate::system::ChipFamily;

const WINDOW_REGISTERS: usize = 1024;

// Broadcom set, clear, level and event status register offsets
const GPSET0: usize = 7;
const GPCLR0: usize = 10;
const GPLEV0: usize = 13;
const GPEDS0: usize = 16;

/// A single recorded register access.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Access {
    Read(usize),
    Write(usize, u32),
    /// A set-up or hold delay.
    Settle,
}

/// Recording in-memory register window.
#[derive(Debug)]
pub struct FakeRegisters {
    chip_family: ChipFamily,
    words: Mutex<Vec<u32>>,
    accesses: Mutex<Vec<Access>>,
}

impl FakeRegisters {
    /// Constructs a zeroed register window using the layout of `chip_family`.
    pub fn new(chip_family: ChipFamily) -> FakeRegisters {
        FakeRegisters {
            chip_family,
            words: Mutex::new(vec![0; WINDOW_REGISTERS]),
            accesses: Mutex::new(Vec::new()),
        }
    }

    /// Returns the register at `offset` without recording an access.
    pub fn peek(&self, offset: usize) -> u32 {
        self.words.lock()[offset]
    }

    /// Sets the register at `offset` without recording an access.
    pub fn poke(&self, offset: usize, value: u32) {
        self.words.lock()[offset] = value;
    }

    /// Returns every access recorded so far, in order.
    pub fn accesses(&self) -> Vec<Access> {
        self.accesses.lock().clone()
    }

    pub fn clear_accesses(&self) {
        self.accesses.lock().clear();
    }
}

impl RegisterMap for FakeRegisters {
    fn read(&self, offset: usize) -> u32 {
        self.accesses.lock().push(Access::Read(offset));
        self.words.lock()[offset]
    }

    fn write(&self, offset: usize, value: u32) {
        self.accesses.lock().push(Access::Write(offset, value));

        let mut words = self.words.lock();
        match (self.chip_family, offset) {
            (ChipFamily::Bcm, GPSET0..=8) => words[GPLEV0 + offset - GPSET0] |= value,
            (ChipFamily::Bcm, GPCLR0..=11) => words[GPLEV0 + offset - GPCLR0] &= !value,
            (ChipFamily::Bcm, GPEDS0..=17) => words[offset] &= !value,
            _ => words[offset] = value,
        }
    }

    fn settle(&self) {
        self.accesses.lock().push(Access::Settle);
    }
}

#[derive(Debug)]
struct Registration {
    id: u64,
    edge: Edge,
    sink: EdgeSink,
}

/// Edge source driven by explicit triggers.
#[derive(Debug, Default)]
pub struct FakeEdgeSource {
    watches: Arc<Mutex<HashMap<u16, Registration>>>,
    next_id: AtomicU64,
}

impl FakeEdgeSource {
    pub fn new() -> FakeEdgeSource {
        FakeEdgeSource::default()
    }

    /// Reports a transition to `level` on `pin`, timestamped now.
    ///
    /// Returns `true` if the pin is watched for a matching edge and the event
    /// was delivered.
    pub fn trigger(&self, pin: u16, level: Level) -> bool {
        self.trigger_at(pin, level, Instant::now())
    }

    /// Reports a transition to `level` on `pin` that happened at `timestamp`.
    pub fn trigger_at(&self, pin: u16, level: Level, timestamp: Instant) -> bool {
        match self.watches.lock().get(&pin) {
            Some(registration) if registration.edge.matches(level) => {
                registration.sink.send(EdgeEvent { level, timestamp })
            }
            _ => false,
        }
    }

    /// Returns `true` while `pin` is being watched.
    pub fn is_watching(&self, pin: u16) -> bool {
        self.watches.lock().contains_key(&pin)
    }
}

impl EdgeSource for FakeEdgeSource {
    fn watch(&self, pin: u16, edge: Edge, sink: EdgeSink) -> Result<Box<dyn EdgeWatch>, EdgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watches.lock().insert(pin, Registration { id, edge, sink });

        Ok(Box::new(FakeWatch {
            watches: self.watches.clone(),
            pin,
            id,
        }))
    }
}

struct FakeWatch {
    watches: Arc<Mutex<HashMap<u16, Registration>>>,
    pin: u16,
    id: u64,
}

impl EdgeWatch for FakeWatch {
    fn stop(&mut self) -> Result<(), EdgeError> {
        let mut watches = self.watches.lock();
        if watches.get(&self.pin).map(|r| r.id) == Some(self.id) {
            watches.remove(&self.pin);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcm_loopback() {
        let fake = FakeRegisters::new(ChipFamily::Bcm);

        fake.write(GPSET0 + 1, 1 << 4);
        assert_eq!(fake.peek(GPLEV0 + 1), 1 << 4);
        assert_eq!(fake.peek(GPSET0 + 1), 0);

        fake.write(GPCLR0 + 1, 1 << 4);
        assert_eq!(fake.peek(GPLEV0 + 1), 0);
    }

    #[test]
    fn bcm_event_status_is_write_one_to_clear() {
        let fake = FakeRegisters::new(ChipFamily::Bcm);

        fake.poke(GPEDS0, 0b110);
        fake.write(GPEDS0, 0b010);
        assert_eq!(fake.peek(GPEDS0), 0b100);

        fake.write(GPEDS0, 0);
        assert_eq!(fake.peek(GPEDS0), 0b100);
    }

    #[test]
    fn records_accesses() {
        let fake = FakeRegisters::new(ChipFamily::Sunxi);

        fake.poke(600, 5);
        assert_eq!(fake.read(600), 5);
        fake.write(600, 6);
        fake.settle();

        assert_eq!(
            fake.accesses(),
            vec![Access::Read(600), Access::Write(600, 6), Access::Settle]
        );

        fake.clear_accesses();
        assert!(fake.accesses().is_empty());
    }
}
