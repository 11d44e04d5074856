//! Interface for the GPIO peripheral.
//!
//! To ensure fast performance, `sbc-gpio` controls the GPIO peripheral by directly
//! accessing the registers through either `/dev/gpiomem` or `/dev/mem`. Edge
//! notifications are delivered through the sysfs GPIO interface by default.
//!
//! ## Channels
//!
//! Pins are addressed by channel. Before any channel can be used, a
//! [`NumberingMode`] has to be selected with [`Gpio::set_numbering`]:
//! [`NumberingMode::HeaderPosition`] numbers channels by their physical position on
//! the board's header, and [`NumberingMode::NativeChip`] uses the chip's own GPIO
//! numbers. On sunxi boards, native numbers follow the Broadcom layout of a 40-pin
//! header, so code written for one family addresses the same header pins on the other.
//! The numbering mode can't be changed once selected.
//!
//! Channels are configured with [`Gpio::setup`], driven with [`Gpio::output`] and
//! read with [`Gpio::input`]. Using a channel in a way that doesn't match its
//! configured direction returns an error before any register is touched.
//!
//! ## Edge detection
//!
//! [`Gpio::add_event_detect`] starts watching an input for rising and/or falling
//! edges on a separate thread. Transitions that occur within the debounce interval
//! of the previously accepted transition are discarded. Accepted transitions set a
//! flag that can be read with [`Gpio::event_detected`], and are passed on to every
//! callback registered with [`Gpio::add_event_callback`], in registration order.
//!
//! [`Gpio::wait_for_edge`] blocks the calling thread until an edge occurs or the
//! timeout elapses. Removing edge detection while a thread is waiting wakes it up
//! with [`WaitError::Cancelled`].
//!
//! By default, channels are reset to inputs with their pull resistors disabled
//! when the last clone of a [`Gpio`] goes out of scope. Use
//! [`Gpio::set_clear_on_drop(false)`] to disable this behavior. Note that `drop`
//! methods aren't called when a process is abnormally terminated (for instance
//! when a `SIGINT` signal isn't caught).
//!
//! ## Examples
//!
//! ```no_run
//! use std::thread;
//! use std::time::Duration;
//!
//! use sbc_gpio::gpio::{Direction, Gpio, Level, NumberingMode, PullUpDown};
//! use sbc_gpio::system::{BoardDescriptor, ChipFamily};
//!
//! # fn main() -> sbc_gpio::gpio::Result<()> {
//! let gpio = Gpio::new(BoardDescriptor::new(ChipFamily::Bcm, 3));
//! gpio.set_numbering(NumberingMode::HeaderPosition)?;
//! gpio.setup(16, Direction::Output, PullUpDown::Off, Some(Level::Low))?;
//!
//! gpio.output(16, Level::High)?;
//! thread::sleep(Duration::from_secs(1));
//! gpio.output(16, Level::Low)?;
//! # Ok(())
//! # }
//! ```
//!
//! Additional examples can be found in the `demos` directory.
//!
//! ## Troubleshooting
//!
//! ### Permission denied
//!
//! On Raspberry Pi OS, users that are part of the `gpio` group can access
//! `/dev/gpiomem` without needing additional permissions. If you encounter
//! [`HalError::DeviceAccessDenied`] errors, either the current user isn't a member
//! of the `gpio` group, or `/dev/gpiomem` isn't available and `/dev/mem` requires
//! superuser privileges. Sunxi boards are always accessed through `/dev/mem`.
//!
//! [`Gpio::set_clear_on_drop(false)`]: struct.Gpio.html#method.set_clear_on_drop

use std::fmt;
use std::io;
use std::ops::Not;
use std::result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

mod epoll;
mod gpiomem;
mod interrupt;
mod mem;
pub mod mock;
mod numbering;
mod registry;
mod sysfs;

use crate::system::{self, BoardDescriptor, ChipFamily};

use self::gpiomem::GpioRegisters;
use self::interrupt::{EdgeEngine, RegisterPoll};
use self::mem::MemoryMap;
use self::numbering::Translator;
use self::registry::PinRegistry;

pub use self::interrupt::{EdgeEvent, EdgeSink, EdgeSource, EdgeWatch};
pub use self::mem::RegisterMap;
pub use self::sysfs::SysfsEdgeSource;

/// Errors that can occur while mapping or driving the GPIO registers.
///
/// Mapping failures are fatal for the [`Gpio`] instance that encountered them.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// Permission denied when opening `/dev/gpiomem` or `/dev/mem` for read/write access.
    ///
    /// More information on possible causes for this error can be found [here].
    ///
    /// [here]: index.html#permission-denied
    #[error("Permission denied: {0}")]
    DeviceAccessDenied(String),
    /// Unable to reserve address space for the page-aligned register window.
    #[error("Unable to allocate the register window")]
    Allocation,
    /// `mmap` failed.
    #[error("Unable to map the register window: {0}")]
    Mapping(io::Error),
    /// The peripheral base address couldn't be read from the device tree or `/proc/cpuinfo`.
    #[error("Unable to locate the peripheral base address: {0}")]
    PlatformProbe(io::Error),
    /// The SoC doesn't have a known peripheral base address.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
    /// The register window is already mapped for another chip family.
    #[error("GPIO registers are already mapped for a {0} chip")]
    InUse(ChipFamily),
    /// The chip doesn't implement the requested register function.
    #[error("{0} aren't supported on this chip")]
    Unsupported(&'static str),
}

impl From<system::Error> for HalError {
    fn from(err: system::Error) -> HalError {
        match err {
            system::Error::Io(e) => HalError::PlatformProbe(e),
            system::Error::UnknownHardware(hardware) => HalError::UnsupportedPlatform(hardware),
        }
    }
}

/// Errors caused by an invalid or unresolvable channel.
#[derive(Debug, PartialEq, Eq, Copy, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The channel doesn't correspond to a GPIO line in the current numbering mode.
    #[error("Channel {0} is invalid")]
    Invalid(u8),
    /// No numbering mode has been selected.
    #[error("Numbering mode hasn't been set")]
    ModeNotSet,
    /// A different numbering mode has already been selected.
    #[error("A different numbering mode has already been set")]
    ModeConflict,
    /// The board has no header layout, so header position numbering isn't available.
    #[error("Header position numbering isn't available on this board")]
    HeaderUnavailable,
}

/// Errors that can occur while arming edge detection.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    /// Edge detection is already armed on the pin for a different edge.
    #[error("Conflicting edge detection is already enabled for this channel")]
    Conflict,
    /// The channel has no edge detection armed through `add_event_detect`.
    #[error("Edge detection hasn't been added for this channel")]
    NotArmed,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Hal(#[from] HalError),
    /// An edge source thread panicked.
    #[error("Thread panicked")]
    ThreadPanic,
}

/// Outcomes of [`Gpio::wait_for_edge`] other than success.
///
/// A timeout is reported by [`Gpio::wait_for_edge`] as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// Edge detection is already armed on the pin for a different edge.
    #[error("Conflicting edge detection is already enabled for this channel")]
    Conflict,
    /// No edge occurred before the timeout elapsed.
    #[error("Timed out waiting for an edge")]
    Timeout,
    /// Edge detection was removed while waiting.
    #[error("Edge detection was removed while waiting")]
    Cancelled,
    /// The transient watcher couldn't be armed.
    #[error("Unable to wait for an edge: {0}")]
    Internal(#[source] EdgeError),
}

/// Errors that can occur when accessing the GPIO peripheral.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Hal(#[from] HalError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Edge(#[from] EdgeError),
    #[error(transparent)]
    Wait(#[from] WaitError),
    /// The channel hasn't been set up.
    #[error("Channel {0} hasn't been set up")]
    NotConfigured(u8),
    /// The channel hasn't been set up as an output.
    #[error("Channel {0} isn't set up as an output")]
    NotOutput(u8),
    /// The channel hasn't been set up as an input.
    #[error("Channel {0} isn't set up as an input")]
    NotInput(u8),
    /// An argument is out of range, or not applicable to the requested configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Result type returned from methods that can have `sbc_gpio::gpio::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Pin logic levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl From<bool> for Level {
    fn from(e: bool) -> Level {
        if e {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Pin directions.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Direction::Input => write!(f, "In"),
            Direction::Output => write!(f, "Out"),
        }
    }
}

/// Built-in pull-up/pull-down resistor states.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum PullUpDown {
    Off,
    PullUp,
    PullDown,
}

impl fmt::Display for PullUpDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PullUpDown::Off => write!(f, "Off"),
            PullUpDown::PullUp => write!(f, "PullUp"),
            PullUpDown::PullDown => write!(f, "PullDown"),
        }
    }
}

/// Edge detection triggers.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Returns `true` if a transition to `level` matches this edge.
    pub fn matches(self, level: Level) -> bool {
        match self {
            Edge::Rising => level == Level::High,
            Edge::Falling => level == Level::Low,
            Edge::Both => true,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Edge::Rising => write!(f, "Rising"),
            Edge::Falling => write!(f, "Falling"),
            Edge::Both => write!(f, "Both"),
        }
    }
}

/// Channel numbering modes.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum NumberingMode {
    /// Physical position on the board's GPIO header.
    HeaderPosition,
    /// The chip's native GPIO numbers.
    NativeChip,
}

/// Pin functions, as reported by [`Gpio::function`].
///
/// Alternate functions are only identified for the peripherals exposed on the
/// Broadcom header. Anything else is reported as `Unknown`.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Function {
    Input,
    Output,
    I2c,
    Spi,
    Pwm,
    Serial,
    Unknown,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Function::Input => write!(f, "Input"),
            Function::Output => write!(f, "Output"),
            Function::I2c => write!(f, "I2C"),
            Function::Spi => write!(f, "SPI"),
            Function::Pwm => write!(f, "PWM"),
            Function::Serial => write!(f, "Serial"),
            Function::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Non-fatal conditions reported while configuring or cleaning up channels.
///
/// Warnings are only produced while warnings are enabled through
/// [`Gpio::set_warnings`], and are also logged at the `warn` level.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Warning {
    /// The channel is configured for an alternate function, or as an output by
    /// another process.
    ChannelInUse(u8),
    /// The channel has a physical pull-up resistor fitted on the board.
    PhysicalPullUp(u8),
    /// No channels have been set up.
    NothingToCleanUp,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Warning::ChannelInUse(channel) => write!(
                f,
                "Channel {} is already in use, continuing anyway. Use set_warnings(false) to disable warnings",
                channel
            ),
            Warning::PhysicalPullUp(channel) => {
                write!(f, "A physical pull-up resistor is fitted on channel {}", channel)
            }
            Warning::NothingToCleanUp => write!(f, "No channels have been set up, nothing to clean up"),
        }
    }
}

/// Identifies a callback registered with [`Gpio::add_event_callback`].
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct CallbackId(u64);

/// Selects how edge transitions are detected.
#[derive(Debug, Clone, Default)]
pub enum EdgeBackend {
    /// Kernel notifications through `/sys/class/gpio`.
    #[default]
    Sysfs,
    /// Polls the Broadcom event detect registers at the specified interval.
    ///
    /// Not available on sunxi chips, which don't have event detect registers.
    RegisterPoll(Duration),
    /// A custom edge source.
    Source(Arc<dyn EdgeSource>),
}

// Created when a channel is first configured.
#[derive(Debug)]
struct Hardware {
    chip: Arc<dyn GpioRegisters>,
    registry: PinRegistry,
    engine: EdgeEngine,
}

// Store Gpio's state separately, so we can conveniently share it through
// a cloned Arc.
struct GpioState {
    board: BoardDescriptor,
    translator: Translator,
    numbering: Mutex<Option<NumberingMode>>,
    warnings: AtomicBool,
    clear_on_drop: AtomicBool,
    registers: Option<Arc<dyn RegisterMap>>,
    edge_backend: EdgeBackend,
    hardware: OnceCell<Hardware>,
}

impl fmt::Debug for GpioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioState")
            .field("board", &self.board)
            .field("numbering", &self.numbering)
            .field("warnings", &self.warnings)
            .field("clear_on_drop", &self.clear_on_drop)
            .field("edge_backend", &self.edge_backend)
            .field("hardware", &self.hardware)
            .finish()
    }
}

impl GpioState {
    fn hardware(&self) -> result::Result<&Hardware, HalError> {
        self.hardware.get_or_try_init(|| {
            let registers: Arc<dyn RegisterMap> = match self.registers {
                Some(ref registers) => registers.clone(),
                None => MemoryMap::open(&self.board)?,
            };

            let chip = gpiomem::open(self.board.chip_family(), registers);
            let source: Arc<dyn EdgeSource> = match self.edge_backend {
                EdgeBackend::Sysfs => Arc::new(SysfsEdgeSource::new()),
                EdgeBackend::RegisterPoll(interval) => {
                    Arc::new(RegisterPoll::new(chip.clone(), interval))
                }
                EdgeBackend::Source(ref source) => source.clone(),
            };

            debug!("Initialized {} GPIO registers", self.board.chip_family());

            Ok(Hardware {
                registry: PinRegistry::new(chip.pin_count()),
                engine: EdgeEngine::new(source),
                chip,
            })
        })
    }

    // Resets every configured pin, returning false if nothing was configured.
    fn reset_all(&self) -> bool {
        let hardware = match self.hardware.get() {
            Some(hardware) => hardware,
            None => return false,
        };

        hardware.engine.disarm_all();

        let configured = hardware.registry.configured();
        for pin in &configured {
            hardware.chip.setup(*pin, Direction::Input, PullUpDown::Off);
            hardware.registry.reset(*pin);
        }

        !configured.is_empty()
    }
}

impl Drop for GpioState {
    fn drop(&mut self) {
        if self.clear_on_drop.load(Ordering::SeqCst) {
            self.reset_all();
        }
    }
}

/// Provides access to the GPIO peripheral.
///
/// Registers are mapped when the first channel is configured. Clones share the
/// same state.
#[derive(Clone, Debug)]
pub struct Gpio {
    inner: Arc<GpioState>,
}

impl Gpio {
    /// Constructs a new `Gpio` for `board`, using sysfs for edge detection.
    pub fn new(board: BoardDescriptor) -> Gpio {
        Gpio::with_edge_backend(board, EdgeBackend::Sysfs)
    }

    /// Constructs a new `Gpio` for `board` with the specified edge detection backend.
    pub fn with_edge_backend(board: BoardDescriptor, edge_backend: EdgeBackend) -> Gpio {
        Gpio::build(board, None, edge_backend)
    }

    /// Constructs a new `Gpio` that drives `registers` instead of the mapped
    /// hardware window, and receives edges from `edges`.
    pub fn with_registers(
        board: BoardDescriptor,
        registers: Arc<dyn RegisterMap>,
        edges: Arc<dyn EdgeSource>,
    ) -> Gpio {
        Gpio::build(board, Some(registers), EdgeBackend::Source(edges))
    }

    fn build(
        board: BoardDescriptor,
        registers: Option<Arc<dyn RegisterMap>>,
        edge_backend: EdgeBackend,
    ) -> Gpio {
        Gpio {
            inner: Arc::new(GpioState {
                board,
                translator: Translator::new(&board),
                numbering: Mutex::new(None),
                warnings: AtomicBool::new(true),
                clear_on_drop: AtomicBool::new(true),
                registers,
                edge_backend,
                hardware: OnceCell::new(),
            }),
        }
    }

    /// Returns the board description this instance was created with.
    pub fn board(&self) -> BoardDescriptor {
        self.inner.board
    }

    /// Selects the channel numbering mode.
    ///
    /// Selecting the current mode again has no effect. Once selected, the mode
    /// can't be changed, and selecting a different one returns
    /// `Err(`[`ChannelError::ModeConflict`]`)`.
    pub fn set_numbering(&self, mode: NumberingMode) -> Result<()> {
        if mode == NumberingMode::HeaderPosition && !self.inner.translator.has_header() {
            return Err(ChannelError::HeaderUnavailable.into());
        }

        let mut numbering = self.inner.numbering.lock();
        match *numbering {
            Some(current) if current != mode => Err(ChannelError::ModeConflict.into()),
            _ => {
                *numbering = Some(mode);
                Ok(())
            }
        }
    }

    /// Returns the selected numbering mode.
    pub fn numbering(&self) -> Option<NumberingMode> {
        *self.inner.numbering.lock()
    }

    /// Enables or disables warnings. Warnings are enabled by default.
    pub fn set_warnings(&self, enabled: bool) {
        self.inner.warnings.store(enabled, Ordering::SeqCst);
    }

    /// Returns `true` if warnings are enabled.
    pub fn warnings(&self) -> bool {
        self.inner.warnings.load(Ordering::SeqCst)
    }

    /// When enabled, configured channels are reset when the last clone of this
    /// `Gpio` goes out of scope. Enabled by default.
    pub fn set_clear_on_drop(&self, clear_on_drop: bool) {
        self.inner.clear_on_drop.store(clear_on_drop, Ordering::SeqCst);
    }

    /// Returns the value of `clear_on_drop`.
    pub fn clear_on_drop(&self) -> bool {
        self.inner.clear_on_drop.load(Ordering::SeqCst)
    }

    fn resolve(&self, channel: u8) -> Result<u16> {
        let mode = *self.inner.numbering.lock();

        Ok(self.inner.translator.resolve(channel, mode)?)
    }

    // Returns the hardware if `pin` is configured in one of `accepted` directions.
    fn configured(&self, pin: u16, accepted: &[Direction]) -> Option<&Hardware> {
        self.inner.hardware.get().filter(|hardware| {
            hardware
                .registry
                .query(pin)
                .map_or(false, |direction| accepted.contains(&direction))
        })
    }

    fn advise(&self, warnings: Vec<Warning>) -> Vec<Warning> {
        if !self.warnings() {
            return Vec::new();
        }

        for warning in &warnings {
            warn!("{}", warning);
        }

        warnings
    }

    /// Configures `channel` as an input or output.
    ///
    /// The pull resistor must be [`PullUpDown::Off`] for outputs, and `initial`
    /// only applies to outputs. When specified, the initial level is set before
    /// the pin starts driving. Reconfiguring an input as an output removes any
    /// edge detection on it.
    ///
    /// Returns any warnings that apply to the channel.
    pub fn setup(
        &self,
        channel: u8,
        direction: Direction,
        pull: PullUpDown,
        initial: Option<Level>,
    ) -> Result<Vec<Warning>> {
        if direction == Direction::Output && pull != PullUpDown::Off {
            return Err(Error::InvalidArgument(
                "pull-up/down resistors can only be enabled on inputs",
            ));
        }

        if direction == Direction::Input && initial.is_some() {
            return Err(Error::InvalidArgument("initial level only applies to outputs"));
        }

        let pin = self.resolve(channel)?;
        let hardware = self.inner.hardware()?;

        let mut warnings = Vec::new();
        let function = hardware.chip.function(pin);
        if !matches!(function, Function::Input | Function::Output)
            || (function == Function::Output && hardware.registry.query(pin).is_none())
        {
            warnings.push(Warning::ChannelInUse(channel));
        }

        if pull != PullUpDown::Off && self.has_physical_pull_up(pin) {
            warnings.push(Warning::PhysicalPullUp(channel));
        }

        if direction == Direction::Output {
            if hardware.engine.is_armed(pin) {
                hardware.engine.disarm(pin);
            }

            if let Some(level) = initial {
                hardware.chip.set_level(pin, level);
            }
        }

        hardware.chip.setup(pin, direction, pull);
        hardware.registry.configure(pin, direction);

        debug!(
            "Channel {} (pin {}) set up as {} with pull {}",
            channel, pin, direction, pull
        );

        Ok(self.advise(warnings))
    }

    // The I2C lines on the header carry 1.8 kΩ pull-ups. Revision 1 boards
    // route I2C0 (pins 0 and 1) to the header instead of I2C1.
    fn has_physical_pull_up(&self, pin: u16) -> bool {
        let board = self.inner.board;
        if board.chip_family() != ChipFamily::Bcm {
            return false;
        }

        match board.revision() {
            0 => false,
            1 => pin <= 3,
            _ => pin == 2 || pin == 3,
        }
    }

    /// Sets the output level of `channel`.
    ///
    /// Returns `Err(`[`Error::NotOutput`]`)` unless the channel is set up as an output.
    pub fn output(&self, channel: u8, level: Level) -> Result<()> {
        let pin = self.resolve(channel)?;
        let hardware = self
            .configured(pin, &[Direction::Output])
            .ok_or(Error::NotOutput(channel))?;

        hardware.chip.set_level(pin, level);

        Ok(())
    }

    /// Reads the logic level of `channel`, which must be set up as an input or output.
    pub fn input(&self, channel: u8) -> Result<Level> {
        let pin = self.resolve(channel)?;
        let hardware = self
            .configured(pin, &[Direction::Input, Direction::Output])
            .ok_or(Error::NotConfigured(channel))?;

        Ok(hardware.chip.level(pin))
    }

    /// Returns the function `channel` is currently configured for, regardless
    /// of who configured it.
    pub fn function(&self, channel: u8) -> Result<Function> {
        let pin = self.resolve(channel)?;

        Ok(self.inner.hardware()?.chip.function(pin))
    }

    /// Returns the direction `channel` was set up with, or `None` if it hasn't been set up.
    pub fn direction(&self, channel: u8) -> Result<Option<Direction>> {
        let pin = self.resolve(channel)?;

        Ok(self
            .inner
            .hardware
            .get()
            .and_then(|hardware| hardware.registry.query(pin)))
    }

    /// Resets `channel` to an input with its pull resistor disabled, and removes
    /// any edge detection.
    pub fn cleanup_channel(&self, channel: u8) -> Result<Vec<Warning>> {
        let pin = self.resolve(channel)?;

        let reset = match self.inner.hardware.get() {
            Some(hardware) => {
                hardware.engine.disarm(pin);

                if hardware.registry.reset(pin).is_some() {
                    hardware.chip.setup(pin, Direction::Input, PullUpDown::Off);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if reset {
            Ok(Vec::new())
        } else {
            Ok(self.advise(vec![Warning::NothingToCleanUp]))
        }
    }

    /// Resets every configured channel to an input with its pull resistor disabled,
    /// and removes all edge detection.
    ///
    /// The numbering mode stays selected.
    pub fn cleanup(&self) -> Vec<Warning> {
        if self.inner.reset_all() {
            Vec::new()
        } else {
            self.advise(vec![Warning::NothingToCleanUp])
        }
    }

    fn check_duration(duration: Option<Duration>, message: &'static str) -> Result<()> {
        match duration {
            Some(duration) if duration.is_zero() => Err(Error::InvalidArgument(message)),
            _ => Ok(()),
        }
    }

    /// Starts detecting `edge` transitions on `channel`, which must be set up as an input.
    ///
    /// Transitions within `debounce` of the previously accepted transition are
    /// discarded. Adding the same edge again has no effect, while adding a
    /// different edge returns `Err(`[`EdgeError::Conflict`]`)`.
    pub fn add_event_detect(
        &self,
        channel: u8,
        edge: Edge,
        debounce: Option<Duration>,
    ) -> Result<()> {
        Self::check_duration(debounce, "debounce interval must be greater than zero")?;

        let pin = self.resolve(channel)?;
        let hardware = self
            .configured(pin, &[Direction::Input])
            .ok_or(Error::NotInput(channel))?;

        hardware.engine.arm(pin, channel, edge, debounce)?;

        Ok(())
    }

    /// Removes edge detection from `channel`, along with its callbacks.
    ///
    /// Threads blocked in [`wait_for_edge`] on the channel return
    /// `Err(`[`WaitError::Cancelled`]`)`.
    ///
    /// [`wait_for_edge`]: #method.wait_for_edge
    pub fn remove_event_detect(&self, channel: u8) -> Result<()> {
        let pin = self.resolve(channel)?;

        if let Some(hardware) = self.inner.hardware.get() {
            hardware.engine.disarm(pin);
        }

        Ok(())
    }

    /// Registers `callback` to be called with the channel number whenever an edge
    /// is accepted on `channel`.
    ///
    /// Edge detection must have been added with [`add_event_detect`]. Callbacks run
    /// on the channel's monitor thread in registration order. A panicking callback
    /// is logged, and doesn't affect other callbacks.
    ///
    /// [`add_event_detect`]: #method.add_event_detect
    pub fn add_event_callback<C>(&self, channel: u8, callback: C) -> Result<CallbackId>
    where
        C: FnMut(u8) + Send + 'static,
    {
        let pin = self.resolve(channel)?;
        let hardware = self
            .configured(pin, &[Direction::Input])
            .ok_or(Error::NotInput(channel))?;

        Ok(hardware.engine.add_callback(pin, Box::new(callback))?)
    }

    /// Removes a callback. Returns `false` if it was already removed.
    pub fn remove_event_callback(&self, id: CallbackId) -> bool {
        self.inner
            .hardware
            .get()
            .map_or(false, |hardware| hardware.engine.remove_callback(id))
    }

    /// Returns `true` if an edge was accepted on `channel` since the last call.
    pub fn event_detected(&self, channel: u8) -> Result<bool> {
        let pin = self.resolve(channel)?;

        Ok(self
            .inner
            .hardware
            .get()
            .map_or(false, |hardware| hardware.engine.detected(pin)))
    }

    /// Blocks until an `edge` transition occurs on `channel`, or until `timeout` elapses.
    ///
    /// Returns `Ok(Some(channel))` when an edge occurred, and `Ok(None)` on timeout.
    /// `timeout` can be set to `None` to wait indefinitely. If edge detection
    /// hasn't been added for the channel, it's enabled for the duration of the call.
    pub fn wait_for_edge(
        &self,
        channel: u8,
        edge: Edge,
        debounce: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Result<Option<u8>> {
        Self::check_duration(debounce, "debounce interval must be greater than zero")?;
        Self::check_duration(timeout, "timeout must be greater than zero")?;

        let pin = self.resolve(channel)?;
        let hardware = self
            .configured(pin, &[Direction::Input])
            .ok_or(Error::NotInput(channel))?;

        match hardware.engine.wait(pin, channel, edge, debounce, timeout) {
            Ok(()) => Ok(Some(channel)),
            Err(WaitError::Timeout) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
