//! Fuzz target: `payload::decode`
//!
//! Feeds arbitrary tag memory through both layouts.  Decoding must never
//! panic and decoded fields must fit their fixed-capacity buffers.
//!
//! cargo fuzz run fuzz_tag_payload

#![no_main]

use cartreader::config::{CART_ID_LEN, CART_NAME_LEN};
use cartreader::payload::{self, CART_URL_LEN, Layout, MEMORY_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let memory = &data[..data.len().min(MEMORY_LEN)];

    for layout in [Layout::Ndef, Layout::Fixed] {
        let decoded = payload::decode_or_empty(memory, layout);
        assert!(decoded.cart_id.len() <= CART_ID_LEN);
        assert!(decoded.cart_url.len() <= CART_URL_LEN);
        assert!(decoded.fragrance.len() <= CART_NAME_LEN);

        if memory.iter().all(|b| *b == 0) {
            assert!(decoded.is_empty(), "blank memory decoded to {decoded:?}");
        }
    }
});
