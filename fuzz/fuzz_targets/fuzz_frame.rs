#![no_main]

use bytes::Bytes;
use launch_server::core::frame::Frame;
use launch_server::core::wire::WireReader;
use launch_server::protocol::handlers::read_optional_player;
use launch_server::protocol::Response;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Frame parsing, then every body decoder a client runs on untrusted input
    if let Ok(frame) = Frame::from_bytes(data) {
        if let Ok(Response::Ok(payload)) = Response::decode(frame.body) {
            let _ = read_optional_player(&mut WireReader::new(payload));
        }
    }
    let _ = Response::decode(Bytes::copy_from_slice(data));
});
