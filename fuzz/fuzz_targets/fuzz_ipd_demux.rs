//! Fuzz the `+IPD` demultiplexer with arbitrary UART traffic.
//!
//! The first byte picks a chunk size so the same input is also fed split
//! at arbitrary points.

#![no_main]

use atbridge::link::demux::{DemuxEvent, FrameDemultiplexer, decode_record};
use libfuzzer_sys::fuzz_target;

const MAX_LINE: usize = 128;
const MAX_FRAME: usize = 1024;

fuzz_target!(|data: &[u8]| {
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut demux = FrameDemultiplexer::new(MAX_LINE, MAX_FRAME);
    for piece in stream.chunks(chunk) {
        for event in demux.feed(piece) {
            match event {
                DemuxEvent::Line(line) => assert!(line.len() <= MAX_LINE * 4),
                DemuxEvent::Frame(frame) => {
                    assert!(frame.payload.len() <= MAX_FRAME);
                    let _ = decode_record(&frame.payload);
                }
                DemuxEvent::Malformed => {}
            }
        }
        assert!(demux.buffered() <= 64 + MAX_FRAME + MAX_LINE + chunk);
    }
});
