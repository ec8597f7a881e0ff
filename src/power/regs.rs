//! Charger register map and field encoding.
//!
//! Register addresses are 8-bit.  Limit registers are 16-bit little-endian
//! words holding one scaled field each; control registers are single
//! bytes of flags.

// ─── Register addresses ───────────────────────────────────────

pub mod reg {
    pub const CHARGE_CURRENT: u8 = 0x02;
    pub const CHARGE_VOLTAGE: u8 = 0x04;
    pub const INPUT_CURRENT: u8 = 0x06;
    pub const INPUT_VOLTAGE: u8 = 0x08;
    pub const BOOST_VOLTAGE: u8 = 0x0C;
    pub const MIN_SYSTEM_VOLTAGE: u8 = 0x0E;
    pub const PRECHARGE_CURRENT: u8 = 0x10;
    pub const TERMINATION_CURRENT: u8 = 0x12;

    pub const CTRL0: u8 = 0x16;
    pub const OTG_CTRL: u8 = 0x18;
    pub const NTC_CTRL0: u8 = 0x1A;

    pub const STATUS0: u8 = 0x1D;
    pub const STATUS1: u8 = 0x1E;
    pub const FAULT0: u8 = 0x1F;

    pub const ADC_CTRL: u8 = 0x26;
    /// First ADC result register; IBUS through TDIE follow contiguously.
    pub const ADC_IBUS: u8 = 0x28;
}

// ─── Control bits ─────────────────────────────────────────────

pub mod ctrl0 {
    pub const EN_CHG: u8 = 1 << 5;
    pub const EN_HIZ: u8 = 1 << 4;
    pub const PMID_DISCHARGE: u8 = 1 << 3;
    pub const WD_RST: u8 = 1 << 2;
}

pub mod otg_ctrl {
    pub const EN_BYPASS: u8 = 1 << 7;
    pub const EN_OTG: u8 = 1 << 6;
    pub const BATFET_MASK: u8 = 0b11;
    pub const BATFET_NORMAL: u8 = 0b00;
    pub const BATFET_SHUTDOWN: u8 = 0b01;
    pub const BATFET_SHIP: u8 = 0b10;
    pub const BATFET_RESET: u8 = 0b11;
}

pub mod ntc_ctrl0 {
    pub const TS_IGNORE: u8 = 1 << 7;
}

pub mod adc_ctrl {
    /// Enable the ADC; rate bit left clear for continuous conversion.
    pub const ADC_EN: u8 = 1 << 7;
}

// ─── Scaled fields ────────────────────────────────────────────

/// A scaled value occupying bits `shift..shift+width` of a 16-bit register.
///
/// `code = (value − base_value) / step + base_code`, with `value` clamped
/// to `min..=max` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub reg: u8,
    pub shift: u8,
    pub width: u8,
    pub step: u16,
    pub min: u16,
    pub max: u16,
    pub base_value: u16,
    pub base_code: u16,
}

impl Field {
    const fn linear(reg: u8, hi: u8, lo: u8, step: u16, min: u16, max: u16) -> Self {
        Self {
            reg,
            shift: lo,
            width: hi - lo + 1,
            step,
            min,
            max,
            base_value: 0,
            base_code: 0,
        }
    }

    pub fn mask(&self) -> u16 {
        (((1u32 << self.width) - 1) << self.shift) as u16
    }

    pub fn clamp(&self, value: u16) -> u16 {
        value.clamp(self.min, self.max)
    }

    /// Register word for `value` (clamped).
    pub fn encode(&self, value: u16) -> u16 {
        let code = (self.clamp(value) - self.base_value) / self.step + self.base_code;
        (code << self.shift) & self.mask()
    }

    /// Value held by a register word.
    pub fn decode(&self, word: u16) -> u16 {
        let code = (word & self.mask()) >> self.shift;
        code.saturating_sub(self.base_code) * self.step + self.base_value
    }
}

/// Fast-charge current, mA.
pub const CHARGE_CURRENT: Field = Field::linear(reg::CHARGE_CURRENT, 10, 5, 40, 40, 2_000);
/// Battery regulation voltage, mV.
pub const CHARGE_VOLTAGE: Field = Field::linear(reg::CHARGE_VOLTAGE, 11, 3, 10, 3_500, 4_800);
/// Input current limit, mA.
pub const INPUT_CURRENT: Field = Field::linear(reg::INPUT_CURRENT, 11, 4, 20, 100, 3_200);
/// Input voltage limit, mV.
pub const INPUT_VOLTAGE: Field = Field::linear(reg::INPUT_VOLTAGE, 13, 5, 40, 3_800, 16_800);
/// Minimum system voltage, mV.
pub const MIN_SYSTEM_VOLTAGE: Field =
    Field::linear(reg::MIN_SYSTEM_VOLTAGE, 11, 6, 80, 2_560, 3_840);
/// Pre-charge current, mA.
pub const PRECHARGE_CURRENT: Field = Field::linear(reg::PRECHARGE_CURRENT, 8, 3, 10, 10, 310);
/// Termination current, mA.
pub const TERMINATION_CURRENT: Field = Field::linear(reg::TERMINATION_CURRENT, 8, 2, 5, 5, 310);

/// Code for the lowest boost voltage.
pub const VOTG_BASE_CODE: u16 = 48;
/// Boost output voltage, mV.
pub const BOOST_VOLTAGE: Field = Field {
    reg: reg::BOOST_VOLTAGE,
    shift: 6,
    width: 7,
    step: 80,
    min: 3_840,
    max: 9_600,
    base_value: 3_840,
    base_code: VOTG_BASE_CODE,
};
