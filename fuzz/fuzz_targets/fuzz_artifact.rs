#![no_main]

use bytes::Bytes;
use launch_server::bootstrap::ArtifactConfig;
use launch_server::bootstrap::artifact::{Footer, FOOTER_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = <[u8; FOOTER_LEN]>::try_from(data.get(..FOOTER_LEN).unwrap_or_default()) {
        let _ = Footer::decode(&raw);
    }
    let _ = ArtifactConfig::decode(Bytes::copy_from_slice(data));
});
