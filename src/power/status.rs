//! Charger status, fault and ADC decoding.
//!
//! Everything here is a pure function of raw register bytes so it can be
//! tested without a device.  Nothing is cached: each decode reflects one
//! read.

/// What the charger sees on its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbusSource {
    None,
    UsbSdp,
    UsbCdp,
    UsbDcp,
    Unknown,
    NonStandard,
    Reserved,
    /// The charger is sourcing VBUS itself (boost).
    Otg,
}

impl VbusSource {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => Self::None,
            0b001 => Self::UsbSdp,
            0b010 => Self::UsbCdp,
            0b011 => Self::UsbDcp,
            0b100 => Self::Unknown,
            0b101 => Self::NonStandard,
            0b110 => Self::Reserved,
            _ => Self::Otg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePhase {
    NotCharging,
    /// Trickle, pre-charge or fast charge
    ConstantCurrent,
    ConstantVoltage,
    TopOff,
}

impl ChargePhase {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::NotCharging,
            0b01 => Self::ConstantCurrent,
            0b10 => Self::ConstantVoltage,
            _ => Self::TopOff,
        }
    }
}

/// Battery thermistor zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsZone {
    Normal,
    Cold,
    Hot,
    Cool,
    Warm,
    Precool,
    Prewarm,
    BiasFault,
}

impl TsZone {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => Self::Normal,
            1 => Self::Cold,
            2 => Self::Hot,
            3 => Self::Cool,
            4 => Self::Warm,
            5 => Self::Precool,
            6 => Self::Prewarm,
            _ => Self::BiasFault,
        }
    }
}

// ─── Status ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerStatus {
    pub vbus: VbusSource,
    pub charge: ChargePhase,
    pub adc_done: bool,
    pub thermal_regulation: bool,
    /// System voltage in minimum-system regulation
    pub vsys_regulation: bool,
    pub input_current_limited: bool,
    pub input_voltage_limited: bool,
    pub safety_timer_expired: bool,
    pub watchdog_expired: bool,
}

impl ChargerStatus {
    /// Decode STATUS0 and STATUS1.
    pub fn decode(status0: u8, status1: u8) -> Self {
        let bit = |b: u8| status0 & (1 << b) != 0;
        Self {
            vbus: VbusSource::from_bits(status1),
            charge: ChargePhase::from_bits(status1 >> 3),
            adc_done: bit(6),
            thermal_regulation: bit(5),
            vsys_regulation: bit(4),
            input_current_limited: bit(3),
            input_voltage_limited: bit(2),
            safety_timer_expired: bit(1),
            watchdog_expired: bit(0),
        }
    }

    pub fn is_boosting(&self) -> bool {
        self.vbus == VbusSource::Otg
    }
}

// ─── Faults ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerFault {
    pub vbus: bool,
    pub battery: bool,
    pub system: bool,
    pub otg: bool,
    pub thermal_shutdown: bool,
    pub ts: TsZone,
}

impl ChargerFault {
    /// Decode FAULT0.
    pub fn decode(fault0: u8) -> Self {
        Self {
            vbus: fault0 & (1 << 7) != 0,
            battery: fault0 & (1 << 6) != 0,
            system: fault0 & (1 << 5) != 0,
            otg: fault0 & (1 << 4) != 0,
            thermal_shutdown: fault0 & (1 << 3) != 0,
            ts: TsZone::from_bits(fault0),
        }
    }

    /// Any latched fault.  A thermistor zone other than normal only
    /// counts when it is a bias fault or outside the charge window.
    pub fn any(&self) -> bool {
        self.vbus
            || self.battery
            || self.system
            || self.otg
            || self.thermal_shutdown
            || matches!(self.ts, TsZone::Cold | TsZone::Hot | TsZone::BiasFault)
    }
}

// ─── ADC ──────────────────────────────────────────────────────

/// Raw current reading meaning "no measurement".
const ADC_CURRENT_ZERO: u16 = 0x8000;

/// Converted ADC channels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdcReadings {
    pub ibus_ma: i32,
    pub ibat_ma: i32,
    pub vbus_mv: u32,
    pub vpmid_mv: u32,
    pub vbat_mv: u32,
    pub vsys_mv: u32,
    /// Thermistor voltage as percent of REGN
    pub ts_percent: f32,
    pub tdie_c: f32,
}

impl AdcReadings {
    /// Number of bytes spanning IBUS..=TDIE.
    pub const RAW_LEN: usize = 16;

    /// Decode the contiguous little-endian block read from the first ADC
    /// result register.
    pub fn decode(raw: &[u8; Self::RAW_LEN]) -> Self {
        let word = |i: usize| u16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]);
        Self {
            ibus_ma: ibus_ma(word(0)),
            ibat_ma: ibat_ma(word(1)),
            vbus_mv: vbus_mv(word(2)),
            vpmid_mv: vbus_mv(word(3)),
            vbat_mv: vbat_mv(word(4)),
            vsys_mv: vbat_mv(word(5)),
            ts_percent: ts_percent(word(6)),
            tdie_c: tdie_c(word(7)),
        }
    }
}

/// Input current: signed, bits 15:1, 2 mA/LSB.
pub fn ibus_ma(raw: u16) -> i32 {
    if raw == ADC_CURRENT_ZERO {
        return 0;
    }
    i32::from((raw as i16) >> 1) * 2
}

/// Battery current: signed, bits 15:2, 4 mA/LSB.  Positive is charging.
pub fn ibat_ma(raw: u16) -> i32 {
    if raw == ADC_CURRENT_ZERO {
        return 0;
    }
    i32::from((raw as i16) >> 2) * 4
}

/// VBUS and VPMID: bits 14:2, 3.97 mV/LSB.
pub fn vbus_mv(raw: u16) -> u32 {
    u32::from((raw >> 2) & 0x1FFF) * 397 / 100
}

/// VBAT and VSYS: bits 12:1, 1.99 mV/LSB.
pub fn vbat_mv(raw: u16) -> u32 {
    u32::from((raw >> 1) & 0x0FFF) * 199 / 100
}

/// Thermistor: bits 11:0, 0.0961 %/LSB.
pub fn ts_percent(raw: u16) -> f32 {
    f32::from(raw & 0x0FFF) * 0.0961
}

/// Die temperature: signed 12-bit, 0.5 °C/LSB.
pub fn tdie_c(raw: u16) -> f32 {
    // Sign-extend from bit 11.
    let value = ((raw << 4) as i16) >> 4;
    f32::from(value) * 0.5
}
