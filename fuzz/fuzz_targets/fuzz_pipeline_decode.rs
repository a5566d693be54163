#![no_main]

use framelink::core::frame::{FrameHeader, RawFrame};
use framelink::core::pipeline::{KeyRing, Pipeline};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz the receive chain with attacker-chosen transform ids and payload
    if data.len() < 4 {
        return;
    }
    let Ok(header) = FrameHeader::from_bytes([data[0], data[1], data[2]]) else {
        return;
    };

    let pipeline = Pipeline::default();
    let keys = KeyRing::new();
    if let Ok(message) = pipeline.decode(&keys, RawFrame::new(header, data[3..].to_vec())) {
        // Anything that decodes must encode again under the fallback
        let _ = pipeline
            .serializers()
            .serialize(&message, framelink::core::serialization::SerializationKind::FALLBACK);
    }
});
