//! Fuzz target: `UsageLedger::decode`
//!
//! The ledger blob comes back from flash, so any byte string is possible
//! after a torn write.  Decoding must fail cleanly or yield a ledger that
//! re-encodes to something that decodes to the same contents.
//!
//! cargo fuzz run fuzz_usage_ledger

#![no_main]

use cartreader::usage::{LEDGER_CAPACITY, UsageLedger};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(ledger) = UsageLedger::decode(data) else {
        return;
    };
    assert!(ledger.len() <= LEDGER_CAPACITY);

    let bytes = ledger.encode().expect("decoded ledger must re-encode");
    let again = UsageLedger::decode(&bytes).expect("re-encoded ledger must decode");
    assert_eq!(again.len(), ledger.len());
    for (key, ms) in ledger.iter() {
        assert_eq!(again.usage_ms(key), ms, "usage of '{key}' changed");
    }
});
