// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use hros::transport::ConnectionHeader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz the length-prefixed header decoder
    let _ = ConnectionHeader::decode(data, 1 << 20);

    // Fuzz the field-list decoder directly (no outer length prefix)
    let _ = ConnectionHeader::decode_fields(data);
});
