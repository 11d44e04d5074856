//! Channel to logical pin translation.
//!
//! Header tables are indexed by the physical header position. Index 0 is unused,
//! and positions without a GPIO line (power, ground) hold `None`.

use crate::gpio::{ChannelError, NumberingMode};
use crate::system::{BoardDescriptor, ChipFamily};

use super::gpiomem::{bcm, sunxi};

type HeaderTable = [Option<u16>; 41];

// Converts a raw table, where -1 marks a position without a GPIO line.
const fn header_table<const N: usize>(raw: [i16; N]) -> [Option<u16>; N] {
    let mut table = [None; N];
    let mut i = 0;
    while i < N {
        if raw[i] >= 0 {
            table[i] = Some(raw[i] as u16);
        }
        i += 1;
    }

    table
}

// Original Model B, 26-pin header
const HEADER_BCM_REV1: HeaderTable = header_table([
    -1,
    -1, -1, 0, -1, 1, -1, 4, 14, -1, 15,
    17, 18, 21, -1, 22, 23, -1, 24, 10, -1,
    9, 25, 11, 8, -1, 7, -1, -1, -1, -1,
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1,
]);

// Model A/B revision 2, 26-pin header
const HEADER_BCM_REV2: HeaderTable = header_table([
    -1,
    -1, -1, 2, -1, 3, -1, 4, 14, -1, 15,
    17, 18, 27, -1, 22, 23, -1, 24, 10, -1,
    9, 25, 11, 8, -1, 7, -1, -1, -1, -1,
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1,
]);

// Models with the 40-pin header (A+, B+, 2, 3, Zero)
const HEADER_BCM_REV3: HeaderTable = header_table([
    -1,
    -1, -1, 2, -1, 3, -1, 4, 14, -1, 15,
    17, 18, 27, -1, 22, 23, -1, 24, 10, -1,
    9, 25, 11, 8, -1, 7, -1, -1, 5, -1,
    6, 12, 13, -1, 19, 16, 26, 20, -1, 21,
]);

// Pine A64 Pi-2 header
const HEADER_SUNXI: HeaderTable = header_table([
    -1,
    -1, -1, 227, -1, 226, -1, 362, 32, -1, 33,
    71, 72, 233, -1, 76, 77, -1, 78, 64, -1,
    65, 79, 66, 67, -1, 231, 361, 360, 229, -1,
    230, 68, 69, -1, 73, 70, 80, 74, -1, 75,
]);

// Broadcom-compatible native numbering on the Pine A64. Native channel n
// selects the sunxi line wired where Broadcom line n sits on a 40-pin header.
const NATIVE_SUNXI: [Option<u16>; 40] = header_table([
    -1, -1, 227, 226, 362, 229, 230, 231,
    67, 65, 64, 66, 68, 69, 32, 33,
    70, 71, 72, 73, 74, 75, 76, 77,
    78, 79, 80, 233, -1, -1, -1, -1,
    -1, -1, -1, -1, -1, -1, -1, -1,
]);

/// Translates caller-facing channels into the chip's logical pin numbers.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Translator {
    chip_family: ChipFamily,
    header: Option<&'static HeaderTable>,
    header_positions: u8,
}

impl Translator {
    pub(crate) fn new(board: &BoardDescriptor) -> Translator {
        let (header, header_positions) = match board.chip_family() {
            ChipFamily::Bcm => match board.revision() {
                0 => (None, 0),
                1 => (Some(&HEADER_BCM_REV1), 26),
                2 => (Some(&HEADER_BCM_REV2), 26),
                _ => (Some(&HEADER_BCM_REV3), 40),
            },
            ChipFamily::Sunxi => (Some(&HEADER_SUNXI), 40),
        };

        Translator {
            chip_family: board.chip_family(),
            header,
            header_positions,
        }
    }

    /// Returns `true` if the board has a header layout.
    pub(crate) fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// Resolves `channel` to a logical pin.
    pub(crate) fn resolve(
        &self,
        channel: u8,
        mode: Option<NumberingMode>,
    ) -> Result<u16, ChannelError> {
        let pin = match mode.ok_or(ChannelError::ModeNotSet)? {
            NumberingMode::HeaderPosition => {
                let table = self.header.ok_or(ChannelError::HeaderUnavailable)?;
                if channel < 1 || channel > self.header_positions {
                    return Err(ChannelError::Invalid(channel));
                }

                table[channel as usize]
            }
            NumberingMode::NativeChip => match self.chip_family {
                ChipFamily::Bcm if u16::from(channel) < bcm::PIN_COUNT => Some(u16::from(channel)),
                ChipFamily::Bcm => None,
                ChipFamily::Sunxi => NATIVE_SUNXI.get(channel as usize).copied().flatten(),
            },
        };

        // Lines outside the main port controller can't be reached through the mapped window.
        match pin {
            Some(pin) if self.chip_family == ChipFamily::Sunxi && pin >= sunxi::PIN_COUNT => {
                Err(ChannelError::Invalid(channel))
            }
            Some(pin) => Ok(pin),
            None => Err(ChannelError::Invalid(channel)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator(chip_family: ChipFamily, revision: u8) -> Translator {
        Translator::new(&BoardDescriptor::new(chip_family, revision))
    }

    const HEADER: Option<NumberingMode> = Some(NumberingMode::HeaderPosition);
    const NATIVE: Option<NumberingMode> = Some(NumberingMode::NativeChip);

    #[test]
    fn header_revisions_diverge() {
        assert_eq!(translator(ChipFamily::Bcm, 1).resolve(3, HEADER), Ok(0));
        assert_eq!(translator(ChipFamily::Bcm, 2).resolve(3, HEADER), Ok(2));
        assert_eq!(translator(ChipFamily::Bcm, 3).resolve(3, HEADER), Ok(2));

        assert_eq!(translator(ChipFamily::Bcm, 1).resolve(13, HEADER), Ok(21));
        assert_eq!(translator(ChipFamily::Bcm, 2).resolve(13, HEADER), Ok(27));
        assert_eq!(translator(ChipFamily::Bcm, 4).resolve(40, HEADER), Ok(21));
    }

    #[test]
    fn header_range_depends_on_revision() {
        let rev2 = translator(ChipFamily::Bcm, 2);
        assert_eq!(rev2.resolve(26, HEADER), Ok(7));
        assert_eq!(rev2.resolve(29, HEADER), Err(ChannelError::Invalid(29)));

        let rev3 = translator(ChipFamily::Bcm, 3);
        assert_eq!(rev3.resolve(29, HEADER), Ok(5));
        assert_eq!(rev3.resolve(0, HEADER), Err(ChannelError::Invalid(0)));
        assert_eq!(rev3.resolve(41, HEADER), Err(ChannelError::Invalid(41)));
    }

    #[test]
    fn power_and_ground_positions_are_invalid() {
        let rev3 = translator(ChipFamily::Bcm, 3);

        for channel in [1, 2, 4, 6, 9, 14, 17, 20, 25, 27, 28, 30, 34, 39] {
            assert_eq!(rev3.resolve(channel, HEADER), Err(ChannelError::Invalid(channel)));
        }
    }

    #[test]
    fn compute_module_has_no_header() {
        let cm = translator(ChipFamily::Bcm, 0);

        assert!(!cm.has_header());
        assert_eq!(cm.resolve(3, HEADER), Err(ChannelError::HeaderUnavailable));
        assert_eq!(cm.resolve(45, NATIVE), Ok(45));
    }

    #[test]
    fn native_bcm_range() {
        let rev3 = translator(ChipFamily::Bcm, 3);

        assert_eq!(rev3.resolve(0, NATIVE), Ok(0));
        assert_eq!(rev3.resolve(53, NATIVE), Ok(53));
        assert_eq!(rev3.resolve(54, NATIVE), Err(ChannelError::Invalid(54)));
    }

    #[test]
    fn sunxi_tables() {
        let pine = translator(ChipFamily::Sunxi, 0);

        assert_eq!(pine.resolve(3, HEADER), Ok(227));
        assert_eq!(pine.resolve(40, HEADER), Ok(75));
        assert_eq!(pine.resolve(8, HEADER), Ok(32));
        assert_eq!(pine.resolve(2, NATIVE), Ok(227));
        assert_eq!(pine.resolve(27, NATIVE), Ok(233));
        assert_eq!(pine.resolve(28, NATIVE), Err(ChannelError::Invalid(28)));
        assert_eq!(pine.resolve(200, NATIVE), Err(ChannelError::Invalid(200)));
    }

    #[test]
    fn sunxi_pl_bank_is_unreachable() {
        let pine = translator(ChipFamily::Sunxi, 0);

        assert_eq!(pine.resolve(7, HEADER), Err(ChannelError::Invalid(7)));
        assert_eq!(pine.resolve(27, HEADER), Err(ChannelError::Invalid(27)));
        assert_eq!(pine.resolve(4, NATIVE), Err(ChannelError::Invalid(4)));
    }

    #[test]
    fn mode_required() {
        assert_eq!(
            translator(ChipFamily::Bcm, 3).resolve(3, None),
            Err(ChannelError::ModeNotSet)
        );
    }
}
