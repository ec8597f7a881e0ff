//! Fuzz target: charger status / fault / ADC decoding
//!
//! Any register contents must decode without panicking, and the ADC
//! conversions must stay within the physical ranges of their bit fields.
//!
//! cargo fuzz run fuzz_charger_decode

#![no_main]

use airnode::power::{AdcReadings, ChargerFault, ChargerStatus};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 + AdcReadings::RAW_LEN {
        return;
    }
    let _ = ChargerStatus::decode(data[0], data[1]);
    let _ = ChargerFault::decode(data[2]).any();

    let mut raw = [0u8; AdcReadings::RAW_LEN];
    raw.copy_from_slice(&data[3..3 + AdcReadings::RAW_LEN]);
    let adc = AdcReadings::decode(&raw);

    assert!(adc.vbat_mv <= 4_095 * 199 / 100);
    assert!(adc.vbus_mv <= 8_191 * 397 / 100);
    assert!(adc.ibus_ma.abs() <= 32_768);
    assert!(adc.tdie_c.abs() <= 1_024.0);
});
