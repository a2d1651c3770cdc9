// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use hros::transport::FrameCodec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let codec = FrameCodec::new(1 << 20);

    // Fuzz the slice decoder
    let _ = codec.decode(data);

    // Fuzz the stream reader, including multi-frame inputs
    let mut cursor = std::io::Cursor::new(data);
    while let Ok(Some(_)) = codec.read_frame(&mut cursor) {}
});
