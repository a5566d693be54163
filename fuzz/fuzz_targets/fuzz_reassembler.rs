#![no_main]

use framelink::core::reassembler::StreamReassembler;
use libfuzzer_sys::fuzz_target;
use std::collections::VecDeque;

fuzz_target!(|data: &[u8]| {
    // First byte picks a chunk size so partial headers get exercised
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut reassembler = StreamReassembler::new(1 << 20);
    let mut out = VecDeque::new();
    for piece in rest.chunks(chunk) {
        if reassembler.feed(piece, &mut out).is_err() {
            break;
        }
    }

    for frame in out {
        assert!(!frame.payload.is_empty());
        assert!(frame.payload.len() <= 1 << 20);
    }
});
