//! `sbc-gpio` provides register-level access to the GPIO peripheral of two
//! single-board computer families: Broadcom BCM283x based boards (Raspberry Pi)
//! and Allwinner sunxi based boards (Pine A64).
//!
//! The [`gpio`] module exposes a [`Gpio`] context object that configures pins
//! by channel, translating header positions or native chip numbers to the
//! chip's logical pins, and delivers edge events to blocking waiters and
//! registered callbacks. The [`system`] module describes the board through a
//! [`BoardDescriptor`], and contains the probes used to locate the peripheral
//! base address when it isn't supplied.
//!
//! Register access requires Linux with either `/dev/gpiomem` (Broadcom) or
//! read/write access to `/dev/mem`. The [`gpio::mock`] module offers in-memory
//! fakes so code can be exercised without hardware.
//!
//! [`Gpio`]: gpio::Gpio
//! [`BoardDescriptor`]: system::BoardDescriptor

#[macro_use]
mod macros;

pub mod gpio;
pub mod system;
