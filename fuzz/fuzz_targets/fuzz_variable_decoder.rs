//! Fuzz target: Variable-section frame decoding.
//!
//! Drives arbitrary bytes through the frame parser and the snapshot
//! decoder, the path every boot takes over whatever is left in flash.
//! Neither may panic, and a frame that decodes must re-encode to a frame
//! no longer than the input.
//!
//! cargo fuzz run fuzz_variable_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use powerpanic::snapshot::FaultSnapshot;
use powerpanic::storage::frame;
use powerpanic::storage::layout::{FRAME_MAX, HEADER_LEN};

fuzz_target!(|data: &[u8]| {
    if let Some(header) = data.get(..HEADER_LEN).and_then(|h| <&[u8; HEADER_LEN]>::try_from(h).ok()) {
        if let Ok(len) = frame::frame_len(header) {
            assert!(len <= FRAME_MAX, "declared frame exceeds FRAME_MAX");
        }
    }

    if let Ok(snapshot) = frame::decode::<FaultSnapshot>(data) {
        let mut buf = [0u8; FRAME_MAX];
        let n = frame::encode(&snapshot, &mut buf).expect("decoded snapshot must re-encode");
        assert!(n <= data.len(), "re-encoded frame longer than its source");
    }
});
