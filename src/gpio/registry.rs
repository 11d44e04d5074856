use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::gpio::Direction;

const UNCONFIGURED: u8 = 0;
const INPUT: u8 = 1;
const OUTPUT: u8 = 2;

/// Configured direction of every logical pin.
///
/// Entries are independent, so pins can be configured concurrently without
/// contention.
pub(crate) struct PinRegistry {
    directions: Box<[AtomicU8]>,
}

impl fmt::Debug for PinRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinRegistry")
            .field("configured", &self.configured())
            .finish()
    }
}

impl PinRegistry {
    pub(crate) fn new(pin_count: u16) -> PinRegistry {
        PinRegistry {
            directions: (0..pin_count).map(|_| AtomicU8::new(UNCONFIGURED)).collect(),
        }
    }

    pub(crate) fn configure(&self, pin: u16, direction: Direction) {
        let value = match direction {
            Direction::Input => INPUT,
            Direction::Output => OUTPUT,
        };

        self.directions[pin as usize].store(value, Ordering::SeqCst);
    }

    pub(crate) fn query(&self, pin: u16) -> Option<Direction> {
        match self.directions[pin as usize].load(Ordering::SeqCst) {
            INPUT => Some(Direction::Input),
            OUTPUT => Some(Direction::Output),
            _ => None,
        }
    }

    /// Returns the pin to unconfigured, along with its previous direction.
    pub(crate) fn reset(&self, pin: u16) -> Option<Direction> {
        match self.directions[pin as usize].swap(UNCONFIGURED, Ordering::SeqCst) {
            INPUT => Some(Direction::Input),
            OUTPUT => Some(Direction::Output),
            _ => None,
        }
    }

    /// Lists every configured pin in ascending order.
    pub(crate) fn configured(&self) -> Vec<u16> {
        self.directions
            .iter()
            .enumerate()
            .filter(|(_, direction)| direction.load(Ordering::SeqCst) != UNCONFIGURED)
            .map(|(pin, _)| pin as u16)
            .collect()
    }
}
