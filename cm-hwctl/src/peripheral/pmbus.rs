//! PMBus command codes, status bits and number formats shared by the power
//! management drivers.

use crate::hw_trait::HwError;

/// Standard command codes.
pub mod commands {
    pub const PAGE: u8 = 0x00;
    pub const OPERATION: u8 = 0x01;
    pub const ON_OFF_CONFIG: u8 = 0x02;
    pub const CLEAR_FAULTS: u8 = 0x03;
    pub const WRITE_PROTECT: u8 = 0x10;
    pub const VOUT_MODE: u8 = 0x20;
    pub const VOUT_COMMAND: u8 = 0x21;
    pub const STATUS_BYTE: u8 = 0x78;
    pub const STATUS_WORD: u8 = 0x79;
    pub const STATUS_VOUT: u8 = 0x7A;
    pub const STATUS_IOUT: u8 = 0x7B;
    pub const STATUS_INPUT: u8 = 0x7C;
    pub const STATUS_TEMPERATURE: u8 = 0x7D;
    pub const STATUS_CML: u8 = 0x7E;
    pub const READ_VIN: u8 = 0x88;
    pub const READ_IIN: u8 = 0x89;
    pub const READ_VOUT: u8 = 0x8B;
    pub const READ_IOUT: u8 = 0x8C;
    pub const READ_TEMPERATURE_1: u8 = 0x8D;
    pub const READ_TEMPERATURE_2: u8 = 0x8E;
    pub const MFR_ID: u8 = 0x99;
    pub const MFR_MODEL: u8 = 0x9A;
}

/// Name of a standard command, if it is one.
pub fn command_name(code: u8) -> Option<&'static str> {
    use commands::*;
    Some(match code {
        PAGE => "page",
        OPERATION => "operation",
        ON_OFF_CONFIG => "on/off config",
        CLEAR_FAULTS => "clear faults",
        WRITE_PROTECT => "write protect",
        VOUT_MODE => "VOUT mode",
        VOUT_COMMAND => "VOUT command",
        STATUS_BYTE => "status byte",
        STATUS_WORD => "status word",
        STATUS_VOUT => "status VOUT",
        STATUS_IOUT => "status IOUT",
        STATUS_INPUT => "status input",
        STATUS_TEMPERATURE => "status temperature",
        STATUS_CML => "status CML",
        READ_VIN => "read VIN",
        READ_IIN => "read IIN",
        READ_VOUT => "read VOUT",
        READ_IOUT => "read IOUT",
        READ_TEMPERATURE_1 => "read temperature 1",
        READ_TEMPERATURE_2 => "read temperature 2",
        MFR_ID => "MFR ID",
        MFR_MODEL => "MFR model",
        _ => return None,
    })
}

/// OPERATION command values
pub mod operation {
    pub const OFF_IMMEDIATE: u8 = 0x00;
    pub const ON: u8 = 0x80;
}

/// STATUS_WORD bits
pub mod status {
    pub const VOUT: u16 = 0x8000; // Bit 15: Output voltage fault/warning
    pub const IOUT: u16 = 0x4000; // Bit 14: Output current fault/warning
    pub const INPUT: u16 = 0x2000; // Bit 13: Input voltage fault/warning
    pub const MFR: u16 = 0x1000; // Bit 12: Manufacturer specific
    pub const PGOOD: u16 = 0x0800; // Bit 11: Power good negated
    pub const FANS: u16 = 0x0400; // Bit 10: Fan fault/warning
    pub const OTHER: u16 = 0x0200; // Bit 9: Other fault/warning
    pub const UNKNOWN: u16 = 0x0100; // Bit 8: Unknown fault/warning
    pub const BUSY: u16 = 0x0080; // Bit 7: Busy
    pub const OFF: u16 = 0x0040; // Bit 6: Unit is off
    pub const VOUT_OV: u16 = 0x0020; // Bit 5: Output overvoltage fault
    pub const IOUT_OC: u16 = 0x0010; // Bit 4: Output overcurrent fault
    pub const VIN_UV: u16 = 0x0008; // Bit 3: Input undervoltage fault
    pub const TEMP: u16 = 0x0004; // Bit 2: Temperature fault/warning
    pub const CML: u16 = 0x0002; // Bit 1: Communication/Logic/Memory fault
    pub const NONE: u16 = 0x0001; // Bit 0: None of the above
}

/// Raw STATUS_WORD value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord(pub u16);

impl StatusWord {
    /// Human-readable names of the set bits.
    pub fn describe(&self) -> Vec<&'static str> {
        const NAMES: [(u16, &str); 15] = [
            (status::VOUT, "VOUT fault/warning"),
            (status::IOUT, "IOUT fault/warning"),
            (status::INPUT, "INPUT fault/warning"),
            (status::MFR, "MFR specific"),
            (status::PGOOD, "PGOOD negated"),
            (status::FANS, "FAN fault/warning"),
            (status::OTHER, "OTHER"),
            (status::UNKNOWN, "UNKNOWN"),
            (status::BUSY, "BUSY"),
            (status::OFF, "OFF"),
            (status::VOUT_OV, "VOUT_OV fault"),
            (status::IOUT_OC, "IOUT_OC fault"),
            (status::VIN_UV, "VIN_UV fault"),
            (status::TEMP, "TEMP fault/warning"),
            (status::CML, "CML fault"),
        ];
        let mut desc: Vec<_> = NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if self.0 & status::NONE != 0 && desc.is_empty() {
            desc.push("NONE_OF_THE_ABOVE");
        }
        desc
    }

    pub fn is_off(&self) -> bool {
        self.0 & status::OFF != 0
    }
}

/// WRITE_PROTECT levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteProtect {
    /// All commands writable.
    Disabled = 0x00,
    /// Only WRITE_PROTECT, PAGE, MFR_EE_UNLOCK and STORE_USER_ALL writable.
    Level1 = 0x80,
    /// Level 1 plus OPERATION, MFR_PAGE_FF_MASK and CLEAR_FAULTS.
    Level2 = 0x40,
}

impl TryFrom<u8> for WriteProtect {
    type Error = HwError;

    fn try_from(value: u8) -> Result<Self, HwError> {
        match value {
            0x00 => Ok(WriteProtect::Disabled),
            0x80 => Ok(WriteProtect::Level1),
            0x40 => Ok(WriteProtect::Level2),
            _ => Err(HwError::UnexpectedValue(format!(
                "WRITE_PROTECT value 0x{:02x} is not a known level",
                value
            ))),
        }
    }
}

/// Sign-extend a 5-bit two's complement exponent.
fn exponent5(bits: u16) -> i32 {
    let raw = (bits & 0x1F) as u8;
    if raw & 0x10 != 0 {
        (raw | 0xE0) as i8 as i32
    } else {
        raw as i32
    }
}

/// Decode SLINEAR11: 5-bit exponent in bits 15:11, 11-bit mantissa in 10:0.
pub fn slinear11_to_f32(value: u16) -> f32 {
    let exponent = exponent5(value >> 11);

    let mant_raw = value & 0x7FF;
    let mantissa = if mant_raw & 0x400 != 0 {
        (mant_raw | 0xF800) as i16 as i32
    } else {
        mant_raw as i32
    };

    mantissa as f32 * 2.0_f32.powi(exponent)
}

/// Exponent carried in the low five bits of VOUT_MODE (linear mode).
pub fn vout_mode_exponent(vout_mode: u8) -> i32 {
    exponent5(vout_mode as u16)
}

/// Decode ULINEAR16 with the exponent from VOUT_MODE.
pub fn ulinear16_to_f32(value: u16, vout_mode: u8) -> f32 {
    value as f32 * 2.0_f32.powi(vout_mode_exponent(vout_mode))
}

/// Encode ULINEAR16; `None` if the value does not fit in 16 bits.
pub fn f32_to_ulinear16(value: f32, vout_mode: u8) -> Option<u16> {
    let raw = (value / 2.0_f32.powi(vout_mode_exponent(vout_mode))).round();
    (0.0..=65535.0).contains(&raw).then_some(raw as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0xD3C0, 15.0; "vin from ltc2977 datasheet")]
    #[test_case(0xE1E0, 30.0; "exponent -4")]
    #[test_case(0xF011, 4.25; "quarter steps")]
    #[test_case(0x07FF, -1.0; "negative mantissa")]
    fn slinear11_decodes(raw: u16, expected: f32) {
        assert_eq!(slinear11_to_f32(raw), expected);
    }

    #[test]
    fn ulinear16_uses_vout_mode() {
        // LTC2977 VOUT_MODE is 0x13: exponent -13.
        assert_eq!(vout_mode_exponent(0x13), -13);
        assert_eq!(ulinear16_to_f32(0x2000, 0x13), 1.0);
        assert_eq!(f32_to_ulinear16(1.8, 0x13), Some(14746));
        assert_eq!(f32_to_ulinear16(9.0, 0x13), None);
    }

    #[test]
    fn status_word_names_bits() {
        assert_eq!(
            StatusWord(status::OFF | status::VIN_UV).describe(),
            vec!["OFF", "VIN_UV fault"]
        );
        assert_eq!(StatusWord(status::NONE).describe(), vec!["NONE_OF_THE_ABOVE"]);
        assert!(StatusWord(0x0040).is_off());
    }

    #[test]
    fn write_protect_levels_round_trip_through_bytes() {
        for level in [
            WriteProtect::Disabled,
            WriteProtect::Level1,
            WriteProtect::Level2,
        ] {
            assert_eq!(WriteProtect::try_from(level as u8).unwrap(), level);
        }
        let err = WriteProtect::try_from(0xC0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProtocolMismatch);
    }
}
