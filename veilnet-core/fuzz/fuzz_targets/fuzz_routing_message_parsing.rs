#![no_main]

use libfuzzer_sys::fuzz_target;
use veilnet_core::core_router::RoutingMessage;

fuzz_target!(|data: &[u8]| {
    let _ = RoutingMessage::decode(data);
});
