//! Fuzz target: `ReaderConfig::from_json`
//!
//! Parses arbitrary text as a stored configuration.  Anything accepted must
//! also pass `validate`, since the reader refuses invalid configurations.
//!
//! cargo fuzz run fuzz_config_json

#![no_main]

use cartreader::ReaderConfig;
use cartreader::config::MAX_CARTS;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(cfg) = ReaderConfig::from_json(text) {
        assert!(cfg.validate().is_ok(), "from_json accepted an invalid config");
        assert!(cfg.carts.len() <= MAX_CARTS);
    }
});
