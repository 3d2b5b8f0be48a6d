// SPDX-License-Identifier: MIT OR Apache-2.0
#![no_main]
use libfuzzer_sys::fuzz_target;

// Any packet that parses successfully must render back out and re-parse to
// the same header id/body (spec §8 round-trip law).
fuzz_target!(|data: &str| {
    if let Ok(packet) = agentbus_codec::parse(data) {
        let rendered = agentbus_codec::render(&packet.header, &packet.body);
        let reparsed = agentbus_codec::parse(&rendered).expect("rendered output must re-parse");
        assert_eq!(reparsed.header.id, packet.header.id);
        assert_eq!(reparsed.body, packet.body);
    }
});
