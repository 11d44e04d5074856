//! Board description and peripheral base discovery.
//!
//! A [`BoardDescriptor`] tells the GPIO layer which chip family it's talking to,
//! where that chip's peripherals live in physical memory, and which header
//! revision the board carries. Identifying the board itself is left to the
//! caller. When the descriptor doesn't carry a peripheral base address for a
//! Broadcom chip, [`peripheral_base`] locates it through the device tree, falling
//! back to the `Hardware` field in `/proc/cpuinfo`.
//!
//! [`BoardDescriptor`]: struct.BoardDescriptor.html
//! [`peripheral_base`]: fn.peripheral_base.html

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::result;

use log::debug;

const PATH_DEVICE_TREE_RANGES: &str = "/proc/device-tree/soc/ranges";
const PATH_PROC_CPUINFO: &str = "/proc/cpuinfo";

pub(crate) const PERIPHERAL_BASE_BCM2835: u32 = 0x2000_0000;
pub(crate) const PERIPHERAL_BASE_BCM2836: u32 = 0x3f00_0000;
pub(crate) const GPIO_OFFSET_BCM: u32 = 0x20_0000;
pub(crate) const GPIO_BASE_SUNXI: u32 = 0x01c2_0000;

/// Errors that can occur while probing the platform.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither the device tree nor `/proc/cpuinfo` could be read.
    #[error("Platform probe failed: {0}")]
    Io(#[from] io::Error),
    /// `/proc/cpuinfo` names a SoC without a known peripheral base address.
    #[error("Unsupported hardware: {0}")]
    UnknownHardware(String),
}

/// Result type returned from methods that can have `system::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Supported SoC families.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum ChipFamily {
    /// Broadcom BCM283x, with word-packed function select registers.
    Bcm,
    /// Allwinner sunxi (A64), with bank-structured port registers.
    Sunxi,
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ChipFamily::Bcm => write!(f, "Broadcom"),
            ChipFamily::Sunxi => write!(f, "Allwinner sunxi"),
        }
    }
}

/// Describes the board the GPIO layer runs on.
///
/// `revision` selects the header layout on Broadcom boards: revision 1 and 2
/// boards have a 26-pin header, revision 3 and later a 40-pin header, and
/// revision 0 (compute modules) has no header at all. Sunxi boards always use
/// their own 40-pin layout and ignore the revision.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct BoardDescriptor {
    chip_family: ChipFamily,
    peripheral_base: Option<u32>,
    revision: u8,
}

impl BoardDescriptor {
    /// Constructs a new `BoardDescriptor` without a known peripheral base address.
    pub fn new(chip_family: ChipFamily, revision: u8) -> BoardDescriptor {
        BoardDescriptor {
            chip_family,
            peripheral_base: None,
            revision,
        }
    }

    /// Sets the physical base address of the peripheral block.
    ///
    /// For Broadcom chips this is the base of all peripherals (the GPIO block sits
    /// 0x20_0000 above it). For sunxi chips it's the base of the port controller.
    pub fn with_peripheral_base(mut self, base: u32) -> BoardDescriptor {
        self.peripheral_base = Some(base);
        self
    }

    /// Returns the chip family.
    pub fn chip_family(&self) -> ChipFamily {
        self.chip_family
    }

    /// Returns the peripheral base address, if known.
    pub fn peripheral_base(&self) -> Option<u32> {
        self.peripheral_base
    }

    /// Returns the board revision.
    pub fn revision(&self) -> u8 {
        self.revision
    }
}

/// Locates the Broadcom peripheral base address.
///
/// Reads the device tree's `soc/ranges` property first. If that isn't available,
/// the SoC name in `/proc/cpuinfo` is matched against the known chips.
pub fn peripheral_base() -> Result<u32> {
    probe_peripheral_base(
        Path::new(PATH_DEVICE_TREE_RANGES),
        Path::new(PATH_PROC_CPUINFO),
    )
}

pub(crate) fn probe_peripheral_base(ranges: &Path, cpuinfo: &Path) -> Result<u32> {
    match parse_device_tree_ranges(ranges) {
        Ok(base) => {
            debug!("Peripheral base {:#010x} from {}", base, ranges.display());
            Ok(base)
        }
        Err(e) => {
            debug!("Device tree ranges unavailable ({}), trying {}", e, cpuinfo.display());
            parse_proc_cpuinfo(cpuinfo)
        }
    }
}

// The child bus address occupies the first cell, the parent (physical) address
// the second, stored big-endian.
fn parse_device_tree_ranges(path: &Path) -> io::Result<u32> {
    let mut ranges = File::open(path)?;
    let mut buffer = [0u8; 4];

    ranges.seek(SeekFrom::Start(4))?;
    ranges.read_exact(&mut buffer)?;

    Ok(u32::from_be_bytes(buffer))
}

fn parse_proc_cpuinfo(path: &Path) -> Result<u32> {
    let proc_cpuinfo = BufReader::new(File::open(path)?);

    let mut hardware = String::new();
    for line in proc_cpuinfo.lines() {
        let line = line?;
        if let Some(value) = line.strip_prefix("Hardware") {
            hardware = value.trim_start_matches([' ', '\t', ':']).trim().to_owned();
            break;
        }
    }

    match &hardware[..] {
        "BCM2708" | "BCM2835" => Ok(PERIPHERAL_BASE_BCM2835),
        "BCM2709" | "BCM2836" => Ok(PERIPHERAL_BASE_BCM2836),
        _ => Err(Error::UnknownHardware(hardware)),
    }
}
