// SPDX-License-Identifier: MIT OR Apache-2.0
#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // parse() must never panic on arbitrary input; any Err is acceptable.
    let _ = agentbus_codec::parse(data);
});
