//! Fuzz target: `bus::decode_words`
//!
//! Feeds arbitrary bytes to the checksummed word decoder and asserts that
//! it never panics, that a success re-encodes to the exact input, and that
//! a checksum failure points at a group that really is bad.
//!
//! cargo fuzz run fuzz_word_decoder

#![no_main]

use airnode::Error;
use airnode::bus::{crc8, decode_words, encode_word};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let n = data.len() / 3;
    let mut words = vec![0u16; n];

    match decode_words(data, &mut words) {
        Ok(()) => {
            assert_eq!(data.len(), n * 3);
            for (group, word) in data.chunks_exact(3).zip(&words) {
                assert_eq!(&encode_word(*word)[..], group);
            }
        }
        Err(Error::Checksum { index }) => {
            let group = &data[index * 3..index * 3 + 3];
            assert_ne!(crc8(&group[..2]), group[2]);
            for good in data[..index * 3].chunks_exact(3) {
                assert_eq!(crc8(&good[..2]), good[2]);
            }
        }
        Err(Error::InvalidArgument(_)) => assert_ne!(data.len() % 3, 0),
        Err(e) => panic!("unexpected error {e}"),
    }
});
