#![no_main]

use framelink::utils::compression::{compress, decompress, CompressionKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for kind in CompressionKind::ALL {
        if let Ok(compressed) = compress(data, kind) {
            let restored = decompress(&compressed, kind).expect("own output must decompress");
            assert_eq!(restored, data);
        }

        // Malformed input must fail cleanly and respect the size limit
        let _ = decompress(data, kind);
    }
});
