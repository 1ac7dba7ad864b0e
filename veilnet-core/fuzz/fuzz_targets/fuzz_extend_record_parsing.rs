#![no_main]

use libfuzzer_sys::fuzz_target;
use veilnet_core::core_path::ExtendRecord;

fuzz_target!(|data: &[u8]| {
    let _ = ExtendRecord::decode(data);
});
