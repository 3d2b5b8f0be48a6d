// SPDX-License-Identifier: MIT OR Apache-2.0
#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // scan() must never panic regardless of body content or length.
    let _ = agentbus_codec::suspicious::scan(data);
});
