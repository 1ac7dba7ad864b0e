#![no_main]

use libfuzzer_sys::fuzz_target;
use veilnet_core::dns::{decode_answer, DnsQuery};

fuzz_target!(|data: &[u8]| {
    let _ = DnsQuery::decode(data);
    let _ = decode_answer(data);
});
