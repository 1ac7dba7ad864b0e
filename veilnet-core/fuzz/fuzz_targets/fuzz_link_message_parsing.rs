#![no_main]

use libfuzzer_sys::fuzz_target;
use veilnet_core::core_router::LinkMessage;

fuzz_target!(|data: &[u8]| {
    // Decoded link messages must survive a re-encode
    if let Ok(msg) = LinkMessage::decode(data) {
        let _ = msg.encode();
    }
});
