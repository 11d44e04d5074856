use std::fmt;
use std::sync::Arc;

use crate::gpio::{Direction, Function, HalError, Level, PullUpDown, RegisterMap};

use super::{DetectKind, GpioRegisters, RegisterLocks};

// The mapped window spans a single 4 KiB block starting at the port controller base.
const WINDOW_REGISTERS: usize = 4096 / std::mem::size_of::<u32>();

// The PIO banks start at 0x800 into the port controller.
const PIO_OFFSET: usize = 0x800 / std::mem::size_of::<u32>();

// Each bank is laid out as CFG[4], DAT, DRV[2], PULL[2].
const BANK_REGISTERS: usize = 0x24 / std::mem::size_of::<u32>();
const BANK_CFG0: usize = 0;
const BANK_DAT: usize = 4;
const BANK_PULL0: usize = 7;

const BANKS: u16 = 9;
pub(crate) const PIN_COUNT: u16 = BANKS * 32;

const CFG_INPUT: u32 = 0b000;
const CFG_OUTPUT: u32 = 0b001;

const PULL_OFF: u32 = 0b00;
const PULL_UP: u32 = 0b01;
const PULL_DOWN: u32 = 0b10;

pub struct GpioMem {
    registers: Arc<dyn RegisterMap>,
    locks: RegisterLocks<WINDOW_REGISTERS>,
}

impl fmt::Debug for GpioMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioMem")
            .field("registers", &self.registers)
            .field("locks", &self.locks)
            .finish()
    }
}

#[inline(always)]
fn bank_offset(pin: u16) -> usize {
    PIO_OFFSET + (pin as usize >> 5) * BANK_REGISTERS
}

#[inline(always)]
fn cfg_position(pin: u16) -> (usize, u32) {
    let index = ((pin & 0x1f) >> 3) as usize;
    let shift = ((pin & 0x1f) & 0x7) as u32 * 4;

    (bank_offset(pin) + BANK_CFG0 + index, shift)
}

#[inline(always)]
fn pull_position(pin: u16) -> (usize, u32) {
    let index = ((pin & 0x1f) >> 4) as usize;
    let shift = (pin & 0x0f) as u32 * 2;

    (bank_offset(pin) + BANK_PULL0 + index, shift)
}

impl GpioMem {
    pub fn new(registers: Arc<dyn RegisterMap>) -> GpioMem {
        GpioMem {
            registers,
            locks: RegisterLocks::new(),
        }
    }

    fn modify(&self, offset: usize, mask: u32, value: u32) {
        let _guard = self.locks.lock(offset);
        let reg_value = self.registers.read(offset);
        self.registers.write(offset, (reg_value & !mask) | (value & mask));
    }
}

impl GpioRegisters for GpioMem {
    fn pin_count(&self) -> u16 {
        PIN_COUNT
    }

    fn set_direction(&self, pin: u16, direction: Direction) {
        let (offset, shift) = cfg_position(pin);
        let cfg = match direction {
            Direction::Input => CFG_INPUT,
            Direction::Output => CFG_OUTPUT,
        };

        self.modify(offset, 0b111 << shift, cfg << shift);
    }

    fn set_pullupdown(&self, pin: u16, pud: PullUpDown) {
        let (offset, shift) = pull_position(pin);
        let pull = match pud {
            PullUpDown::Off => PULL_OFF,
            PullUpDown::PullUp => PULL_UP,
            PullUpDown::PullDown => PULL_DOWN,
        };

        self.modify(offset, 0b11 << shift, pull << shift);
    }

    fn function(&self, pin: u16) -> Function {
        let (offset, shift) = cfg_position(pin);

        match (self.registers.read(offset) >> shift) & 0b111 {
            CFG_INPUT => Function::Input,
            CFG_OUTPUT => Function::Output,
            _ => Function::Unknown,
        }
    }

    fn set_level(&self, pin: u16, level: Level) {
        let offset = bank_offset(pin) + BANK_DAT;
        let bit = 1u32 << (pin & 0x1f);

        match level {
            Level::High => self.modify(offset, bit, bit),
            Level::Low => self.modify(offset, bit, 0),
        }
    }

    fn level(&self, pin: u16) -> Level {
        let offset = bank_offset(pin) + BANK_DAT;

        Level::from((self.registers.read(offset) >> (pin & 0x1f)) & 0b1 == 1)
    }

    fn set_detect(&self, _pin: u16, _kind: DetectKind, _enabled: bool) -> Result<(), HalError> {
        Err(HalError::Unsupported("edge detect registers"))
    }

    fn event_detected(&self, _pin: u16) -> Result<bool, HalError> {
        Err(HalError::Unsupported("event status registers"))
    }

    fn clear_event(&self, _pin: u16) -> Result<(), HalError> {
        Err(HalError::Unsupported("event status registers"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::gpio::mock::FakeRegisters;
    use crate::system::ChipFamily;

    fn chip() -> (Arc<FakeRegisters>, GpioMem) {
        let fake = Arc::new(FakeRegisters::new(ChipFamily::Sunxi));
        (fake.clone(), GpioMem::new(fake))
    }

    #[test]
    fn bank_layout() {
        // PH7 (bank 7, pin 7) lives in bank 7's CFG0, bits 28..31.
        assert_eq!(cfg_position(231), (512 + 7 * 9, 28));
        // PC4 (bank 2, pin 4) lives in bank 2's CFG0, bits 16..19.
        assert_eq!(cfg_position(68), (512 + 2 * 9, 16));
        // PD17 (bank 3, pin 17) lives in CFG2, bits 4..7.
        assert_eq!(cfg_position(113), (512 + 3 * 9 + 2, 4));
        // Pull for PD17 is in PULL1, bits 2..3.
        assert_eq!(pull_position(113), (512 + 3 * 9 + 7 + 1, 2));
        assert_eq!(pull_position(32), (512 + 9 + 7, 0));
    }

    #[test]
    fn direction_preserves_neighbours() {
        let (fake, chip) = chip();
        let (offset, shift) = cfg_position(227);
        fake.poke(offset, 0x7777_7777);

        chip.set_direction(227, Direction::Output);
        assert_eq!(fake.peek(offset), (0x7777_7777 & !(0b111 << shift)) | (1 << shift));
        assert_eq!(chip.function(227), Function::Output);

        chip.set_direction(227, Direction::Input);
        assert_eq!(fake.peek(offset), 0x7777_7777 & !(0b111 << shift));
        assert_eq!(chip.function(227), Function::Input);

        // Any other value reads back as an unknown function
        assert_eq!(chip.function(226), Function::Unknown);
    }

    #[test]
    fn pull_encodings() {
        let (fake, chip) = chip();
        let (offset, shift) = pull_position(73);
        fake.poke(offset, 0xffff_ffff);

        chip.set_pullupdown(73, PullUpDown::PullUp);
        assert_eq!((fake.peek(offset) >> shift) & 0b11, 0b01);

        chip.set_pullupdown(73, PullUpDown::PullDown);
        assert_eq!((fake.peek(offset) >> shift) & 0b11, 0b10);

        chip.set_pullupdown(73, PullUpDown::Off);
        assert_eq!(fake.peek(offset), 0xffff_ffff & !(0b11 << shift));
    }

    #[test]
    fn data_register() {
        let (fake, chip) = chip();
        let offset = bank_offset(233) + BANK_DAT;
        fake.poke(offset, 0x8000_0001);

        chip.set_level(233, Level::High);
        assert_eq!(fake.peek(offset), 0x8000_0001 | 1 << 9);
        assert_eq!(chip.level(233), Level::High);

        chip.set_level(233, Level::Low);
        assert_eq!(fake.peek(offset), 0x8000_0001);
        assert_eq!(chip.level(233), Level::Low);
    }

    #[test]
    fn setup_applies_pull_first() {
        let (fake, chip) = chip();

        chip.setup(64, Direction::Output, PullUpDown::Off);

        let writes: Vec<usize> = fake
            .accesses()
            .into_iter()
            .filter_map(|access| match access {
                crate::gpio::mock::Access::Write(offset, _) => Some(offset),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![pull_position(64).0, cfg_position(64).0]);
    }

    #[test]
    fn edge_registers_unsupported() {
        let (_fake, chip) = chip();

        assert!(matches!(
            chip.set_detect(64, DetectKind::Rising, true),
            Err(HalError::Unsupported(_))
        ));
        assert!(matches!(chip.event_detected(64), Err(HalError::Unsupported(_))));
        assert!(matches!(chip.clear_event(64), Err(HalError::Unsupported(_))));
    }
}
