use std::sync::Arc;

use sbc_gpio::gpio::mock::{Access, FakeEdgeSource, FakeRegisters};
use sbc_gpio::gpio::{
    ChannelError, Direction, Error, Function, Gpio, Level, NumberingMode, PullUpDown, Warning,
};
use sbc_gpio::system::{BoardDescriptor, ChipFamily};

// Broadcom register offsets
const GPFSEL1: usize = 1;
const GPFSEL2: usize = 2;
const GPSET0: usize = 7;
const GPPUD: usize = 37;

// Sunxi PC8: bank 2 CFG1 and DAT
const SUNXI_PC_CFG1: usize = 531;
const SUNXI_PC_DAT: usize = 534;

fn gpio(chip_family: ChipFamily, revision: u8) -> (Arc<FakeRegisters>, Gpio) {
    let registers = Arc::new(FakeRegisters::new(chip_family));
    let gpio = Gpio::with_registers(
        BoardDescriptor::new(chip_family, revision),
        registers.clone(),
        Arc::new(FakeEdgeSource::new()),
    );

    (registers, gpio)
}

#[test]
fn channels_need_numbering_mode() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);

    assert!(matches!(
        gpio.setup(16, Direction::Output, PullUpDown::Off, None),
        Err(Error::Channel(ChannelError::ModeNotSet))
    ));
    assert!(registers.accesses().is_empty());
}

#[test]
fn numbering_mode_is_fixed_once_selected() {
    let (_registers, gpio) = gpio(ChipFamily::Bcm, 3);

    gpio.set_numbering(NumberingMode::NativeChip).unwrap();
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();
    assert!(matches!(
        gpio.set_numbering(NumberingMode::HeaderPosition),
        Err(Error::Channel(ChannelError::ModeConflict))
    ));
    assert_eq!(gpio.numbering(), Some(NumberingMode::NativeChip));
}

#[test]
fn header_numbering_needs_layout() {
    let (_registers, gpio) = gpio(ChipFamily::Bcm, 0);

    assert!(matches!(
        gpio.set_numbering(NumberingMode::HeaderPosition),
        Err(Error::Channel(ChannelError::HeaderUnavailable))
    ));
    assert_eq!(gpio.numbering(), None);

    gpio.set_numbering(NumberingMode::NativeChip).unwrap();
}

#[test]
fn header_positions_resolve_per_revision() {
    let (_registers, gpio) = gpio(ChipFamily::Bcm, 2);
    gpio.set_numbering(NumberingMode::HeaderPosition).unwrap();

    // Ground and positions past the 26-pin header
    for channel in [0, 6, 27, 40] {
        assert!(matches!(
            gpio.setup(channel, Direction::Input, PullUpDown::Off, None),
            Err(Error::Channel(ChannelError::Invalid(c))) if c == channel
        ));
    }
}

#[test]
fn initial_level_is_set_before_driving() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::HeaderPosition).unwrap();

    // Header position 16 is GPIO 23.
    gpio.setup(16, Direction::Output, PullUpDown::Off, Some(Level::High))
        .unwrap();

    let accesses = registers.accesses();
    let set = accesses
        .iter()
        .position(|a| *a == Access::Write(GPSET0, 1 << 23))
        .unwrap();
    let fsel = accesses
        .iter()
        .position(|a| matches!(a, Access::Write(GPFSEL2, _)))
        .unwrap();
    assert!(set < fsel);

    assert_eq!(registers.peek(GPFSEL2), 0b001 << 9);
    assert_eq!(gpio.direction(16).unwrap(), Some(Direction::Output));
    assert_eq!(gpio.function(16).unwrap(), Function::Output);
    assert_eq!(gpio.input(16).unwrap(), Level::High);

    gpio.output(16, Level::Low).unwrap();
    assert_eq!(gpio.input(16).unwrap(), Level::Low);
}

#[test]
fn invalid_setup_touches_no_registers() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();

    assert!(matches!(
        gpio.setup(17, Direction::Output, PullUpDown::PullUp, None),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        gpio.setup(17, Direction::Input, PullUpDown::Off, Some(Level::High)),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        gpio.setup(54, Direction::Input, PullUpDown::Off, None),
        Err(Error::Channel(ChannelError::Invalid(54)))
    ));
    assert!(registers.accesses().is_empty());
}

#[test]
fn direction_is_enforced() {
    let (_registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();

    assert!(matches!(gpio.output(17, Level::High), Err(Error::NotOutput(17))));
    assert!(matches!(gpio.input(17), Err(Error::NotConfigured(17))));
    assert_eq!(gpio.direction(17).unwrap(), None);

    gpio.setup(17, Direction::Input, PullUpDown::PullDown, None)
        .unwrap();
    assert!(matches!(gpio.output(17, Level::High), Err(Error::NotOutput(17))));
    assert_eq!(gpio.input(17).unwrap(), Level::Low);
}

#[test]
fn pull_is_applied_before_direction() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();

    gpio.setup(17, Direction::Input, PullUpDown::PullUp, None)
        .unwrap();

    let accesses = registers.accesses();
    let pud = accesses
        .iter()
        .position(|a| *a == Access::Write(GPPUD, 0b10))
        .unwrap();
    let fsel = accesses
        .iter()
        .position(|a| matches!(a, Access::Write(GPFSEL1, _)))
        .unwrap();
    assert!(pud < fsel);
}

#[test]
fn warns_about_channels_in_use() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();

    // GPIO 14 set to ALT0 (UART TXD)
    registers.poke(GPFSEL1, 0b100 << 12);
    assert_eq!(gpio.function(14).unwrap(), Function::Serial);

    let warnings = gpio
        .setup(14, Direction::Output, PullUpDown::Off, None)
        .unwrap();
    assert_eq!(warnings, vec![Warning::ChannelInUse(14)]);

    // Configured by us, so no longer in use by someone else.
    let warnings = gpio
        .setup(14, Direction::Output, PullUpDown::Off, None)
        .unwrap();
    assert!(warnings.is_empty());

    // Configured as an output by another process
    registers.poke(GPFSEL1, registers.peek(GPFSEL1) | (0b001 << 15));
    gpio.set_warnings(false);
    let warnings = gpio
        .setup(15, Direction::Input, PullUpDown::Off, None)
        .unwrap();
    assert!(warnings.is_empty());
}

#[test]
fn warns_about_physical_pull_ups() {
    let (_registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::HeaderPosition).unwrap();

    // Header position 3 is GPIO 2 (I2C1 SDA).
    let warnings = gpio
        .setup(3, Direction::Input, PullUpDown::PullDown, None)
        .unwrap();
    assert_eq!(warnings, vec![Warning::PhysicalPullUp(3)]);

    let warnings = gpio
        .setup(3, Direction::Input, PullUpDown::Off, None)
        .unwrap();
    assert!(warnings.is_empty());
}

#[test]
fn warns_about_physical_pull_ups_on_revision_1() {
    let (_registers, gpio) = gpio(ChipFamily::Bcm, 1);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();

    for channel in [0, 1, 2, 3] {
        let warnings = gpio
            .setup(channel, Direction::Input, PullUpDown::PullUp, None)
            .unwrap();
        assert_eq!(warnings, vec![Warning::PhysicalPullUp(channel)]);
    }

    let warnings = gpio
        .setup(4, Direction::Input, PullUpDown::PullUp, None)
        .unwrap();
    assert!(warnings.is_empty());
}

#[test]
fn cleanup_resets_configured_channels() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();

    assert_eq!(gpio.cleanup(), vec![Warning::NothingToCleanUp]);

    gpio.setup(23, Direction::Output, PullUpDown::Off, None)
        .unwrap();
    gpio.setup(24, Direction::Output, PullUpDown::Off, None)
        .unwrap();
    assert_eq!(registers.peek(GPFSEL2), (0b001 << 9) | (0b001 << 12));

    assert!(gpio.cleanup_channel(23).unwrap().is_empty());
    assert_eq!(registers.peek(GPFSEL2), 0b001 << 12);
    assert_eq!(
        gpio.cleanup_channel(23).unwrap(),
        vec![Warning::NothingToCleanUp]
    );

    assert!(gpio.cleanup().is_empty());
    assert_eq!(registers.peek(GPFSEL2), 0);
    assert_eq!(gpio.direction(24).unwrap(), None);

    // The numbering mode survives a cleanup.
    assert_eq!(gpio.numbering(), Some(NumberingMode::NativeChip));
}

#[test]
fn dropping_last_clone_resets_channels() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();
    gpio.setup(23, Direction::Output, PullUpDown::Off, None)
        .unwrap();

    let clone = gpio.clone();
    drop(gpio);
    assert_eq!(registers.peek(GPFSEL2), 0b001 << 9);

    drop(clone);
    assert_eq!(registers.peek(GPFSEL2), 0);
}

#[test]
fn clear_on_drop_can_be_disabled() {
    let (registers, gpio) = gpio(ChipFamily::Bcm, 3);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();
    gpio.set_clear_on_drop(false);
    gpio.setup(23, Direction::Output, PullUpDown::Off, None)
        .unwrap();

    drop(gpio);
    assert_eq!(registers.peek(GPFSEL2), 0b001 << 9);
}

#[test]
fn sunxi_header_channels() {
    let (registers, gpio) = gpio(ChipFamily::Sunxi, 0);
    gpio.set_numbering(NumberingMode::HeaderPosition).unwrap();

    // Header position 12 is PC8.
    let warnings = gpio
        .setup(12, Direction::Output, PullUpDown::Off, Some(Level::High))
        .unwrap();
    assert!(warnings.is_empty());
    assert_eq!(registers.peek(SUNXI_PC_CFG1) & 0b111, 0b001);
    assert_eq!(registers.peek(SUNXI_PC_DAT), 1 << 8);
    assert_eq!(gpio.function(12).unwrap(), Function::Output);
    assert_eq!(gpio.input(12).unwrap(), Level::High);

    gpio.output(12, Level::Low).unwrap();
    assert_eq!(registers.peek(SUNXI_PC_DAT), 0);

    // Header position 7 is on the PL bank, outside the mapped window.
    assert!(matches!(
        gpio.setup(7, Direction::Input, PullUpDown::Off, None),
        Err(Error::Channel(ChannelError::Invalid(7)))
    ));
}

#[test]
fn sunxi_native_channels_follow_broadcom_layout() {
    let (registers, gpio) = gpio(ChipFamily::Sunxi, 0);
    gpio.set_numbering(NumberingMode::NativeChip).unwrap();

    // Native 18 sits where Broadcom GPIO 18 does, on header position 12.
    gpio.setup(18, Direction::Output, PullUpDown::Off, None)
        .unwrap();
    assert_eq!(registers.peek(SUNXI_PC_CFG1) & 0b111, 0b001);

    assert!(matches!(
        gpio.setup(28, Direction::Input, PullUpDown::Off, None),
        Err(Error::Channel(ChannelError::Invalid(28)))
    ));
}

#[test]
fn sunxi_has_no_physical_pull_up_warning() {
    let (_registers, gpio) = gpio(ChipFamily::Sunxi, 0);
    gpio.set_numbering(NumberingMode::HeaderPosition).unwrap();

    let warnings = gpio
        .setup(3, Direction::Input, PullUpDown::PullUp, None)
        .unwrap();
    assert!(warnings.is_empty());
}
