use std::fmt;
use std::sync::Arc;

use crate::gpio::{Direction, Function, HalError, Level, PullUpDown, RegisterMap};

use super::{DetectKind, GpioRegisters, RegisterLocks};

// The BCM2835 has 41 32-bit registers related to the GPIO (datasheet @ 6.1).
const GPIO_MEM_REGISTERS: usize = 41;

const GPFSEL0: usize = 0x00;
const GPSET0: usize = 0x1c / std::mem::size_of::<u32>();
const GPCLR0: usize = 0x28 / std::mem::size_of::<u32>();
const GPLEV0: usize = 0x34 / std::mem::size_of::<u32>();
const GPEDS0: usize = 0x40 / std::mem::size_of::<u32>();
const GPREN0: usize = 0x4c / std::mem::size_of::<u32>();
const GPFEN0: usize = 0x58 / std::mem::size_of::<u32>();
const GPHEN0: usize = 0x64 / std::mem::size_of::<u32>();
const GPLEN0: usize = 0x70 / std::mem::size_of::<u32>();
const GPPUD: usize = 0x94 / std::mem::size_of::<u32>();
const GPPUDCLK0: usize = 0x98 / std::mem::size_of::<u32>();

pub(crate) const PIN_COUNT: u16 = 54;

// Function select field values.
const FSEL_INPUT: u32 = 0b000;
const FSEL_OUTPUT: u32 = 0b001;
const FSEL_ALT0: u32 = 0b100;
const FSEL_ALT4: u32 = 0b011;
const FSEL_ALT5: u32 = 0b010;

// GPPUD control signal values.
const PUD_OFF: u32 = 0b00;
const PUD_DOWN: u32 = 0b01;
const PUD_UP: u32 = 0b10;

pub struct GpioMem {
    registers: Arc<dyn RegisterMap>,
    locks: RegisterLocks<GPIO_MEM_REGISTERS>,
}

impl fmt::Debug for GpioMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioMem")
            .field("registers", &self.registers)
            .field("locks", &self.locks)
            .finish()
    }
}

impl GpioMem {
    pub fn new(registers: Arc<dyn RegisterMap>) -> GpioMem {
        GpioMem {
            registers,
            locks: RegisterLocks::new(),
        }
    }

    // Sets or clears a single bit in one of the per-32-pin bit arrays.
    fn modify_bit(&self, base_offset: usize, pin: u16, enabled: bool) {
        let offset = base_offset + pin as usize / 32;
        let shift = pin % 32;

        let _guard = self.locks.lock(offset);
        let reg_value = self.registers.read(offset);
        if enabled {
            self.registers.write(offset, reg_value | (1u32 << shift));
        } else {
            self.registers.write(offset, reg_value & !(1u32 << shift));
        }
    }

    fn raw_function(&self, pin: u16) -> u32 {
        let offset = GPFSEL0 + pin as usize / 10;
        let shift = (pin % 10) * 3;

        (self.registers.read(offset) >> shift) & 0b111
    }
}

// Alternate functions are only reported for the peripherals exposed on the header.
fn lookup_function(pin: u16, fsel: u32) -> Function {
    match fsel {
        FSEL_INPUT => Function::Input,
        FSEL_OUTPUT => Function::Output,
        FSEL_ALT0 => match pin {
            0..=3 | 28 | 29 => Function::I2c,
            7..=11 => Function::Spi,
            12 | 13 => Function::Pwm,
            14 | 15 => Function::Serial,
            _ => Function::Unknown,
        },
        FSEL_ALT5 => match pin {
            18 | 19 => Function::Pwm,
            _ => Function::Unknown,
        },
        FSEL_ALT4 => match pin {
            16..=21 => Function::Spi,
            _ => Function::Unknown,
        },
        _ => Function::Unknown,
    }
}

impl GpioRegisters for GpioMem {
    fn pin_count(&self) -> u16 {
        PIN_COUNT
    }

    fn set_direction(&self, pin: u16, direction: Direction) {
        let offset = GPFSEL0 + pin as usize / 10;
        let shift = (pin % 10) * 3;
        let fsel = match direction {
            Direction::Input => FSEL_INPUT,
            Direction::Output => FSEL_OUTPUT,
        };

        let _guard = self.locks.lock(offset);
        let reg_value = self.registers.read(offset);
        self.registers
            .write(offset, (reg_value & !(0b111 << shift)) | (fsel << shift));
    }

    fn set_pullupdown(&self, pin: u16, pud: PullUpDown) {
        let offset = GPPUDCLK0 + pin as usize / 32;
        let shift = pin % 32;
        let control = match pud {
            PullUpDown::Off => PUD_OFF,
            PullUpDown::PullDown => PUD_DOWN,
            PullUpDown::PullUp => PUD_UP,
        };

        // GPPUD is shared by every pin, so hold it for the whole sequence.
        let _guards = self.locks.lock_pair(GPPUD, offset);

        // Set the control signal in GPPUD.
        let reg_value = self.registers.read(GPPUD) & !0b11;
        self.registers.write(GPPUD, reg_value | control);

        // Set-up time for the control signal.
        self.registers.settle();

        // Clock the control signal into the selected pin.
        self.registers.write(offset, 1u32 << shift);

        // Hold time for the control signal.
        self.registers.settle();

        // Remove the control signal and clock.
        self.registers.write(GPPUD, reg_value);
        self.registers.write(offset, 0);
    }

    fn function(&self, pin: u16) -> Function {
        lookup_function(pin, self.raw_function(pin))
    }

    #[inline(always)]
    fn set_level(&self, pin: u16, level: Level) {
        let base_offset = match level {
            Level::High => GPSET0,
            Level::Low => GPCLR0,
        };

        self.registers
            .write(base_offset + pin as usize / 32, 1u32 << (pin % 32));
    }

    #[inline(always)]
    fn level(&self, pin: u16) -> Level {
        let offset = GPLEV0 + pin as usize / 32;
        let shift = pin % 32;

        Level::from((self.registers.read(offset) >> shift) & 0b1 == 1)
    }

    fn set_detect(&self, pin: u16, kind: DetectKind, enabled: bool) -> Result<(), HalError> {
        let base_offset = match kind {
            DetectKind::Rising => GPREN0,
            DetectKind::Falling => GPFEN0,
            DetectKind::High => GPHEN0,
            DetectKind::Low => GPLEN0,
        };

        self.modify_bit(base_offset, pin, enabled);
        self.clear_event(pin)
    }

    fn event_detected(&self, pin: u16) -> Result<bool, HalError> {
        let offset = GPEDS0 + pin as usize / 32;
        let detected = self.registers.read(offset) & (1u32 << (pin % 32)) != 0;

        if detected {
            self.clear_event(pin)?;
        }

        Ok(detected)
    }

    fn clear_event(&self, pin: u16) -> Result<(), HalError> {
        let offset = GPEDS0 + pin as usize / 32;

        // GPEDS is write-1-to-clear, so only the pin's own bit is written.
        // Zero bits leave the other pins' pending events alone.
        self.registers.write(offset, 1u32 << (pin % 32));
        self.registers.settle();
        self.registers.write(offset, 0);

        Ok(())
    }
}
