//! Reader task: frame delivery, line handling and statistics.

use core::time::Duration;

use atbridge::link::channels::INBOUND_DEPTH;
use atbridge::link::with_timeout;
use serde_json::json;

use super::harness::{SHORT, eventually, link, run, test_config};

fn ipd(link_id: u8, body: &[u8]) -> Vec<u8> {
    let mut out = format!("\r\n+IPD,{},{}:", link_id, body.len()).into_bytes();
    out.extend_from_slice(body);
    out
}

#[test]
fn frame_is_decoded_and_delivered() {
    let (sim, ctx, rx) = link(test_config());
    sim.inject(&ipd(1, br#"{"seq":7}"#));

    let record = run(&ctx, rx, with_timeout(SHORT, ctx.inbound.receive())).unwrap();
    assert_eq!(record.link_id, 1);
    assert_eq!(record.record, json!({ "seq": 7 }));
    assert_eq!(ctx.stats().frames_delivered, 1);
}

#[test]
fn frame_split_across_small_reads() {
    let (sim, ctx, rx) = link(test_config());
    sim.set_read_chunk(3);
    let mut stream = b"\r\nOK\r\n".to_vec();
    stream.extend(ipd(0, br#"{"k":"a:b\r\nc"}"#));
    stream.extend_from_slice(b"\r\nSEND OK\r\n");
    sim.inject(&stream);

    let record = run(&ctx, rx, with_timeout(SHORT, ctx.inbound.receive())).unwrap();
    assert_eq!(record.link_id, 0);
    assert_eq!(record.record, json!({ "k": "a:b\r\nc" }));
}

#[test]
fn single_connection_header_form() {
    let (sim, ctx, rx) = link(test_config());
    sim.inject(b"+IPD,7:{\"x\":1}");

    let record = run(&ctx, rx, with_timeout(SHORT, ctx.inbound.receive())).unwrap();
    assert_eq!(record.link_id, 0);
    assert_eq!(record.record, json!({ "x": 1 }));
}

#[test]
fn undecodable_frame_is_dropped() {
    let (sim, ctx, rx) = link(test_config());
    sim.inject(&ipd(0, b"hello"));

    let counted = run(&ctx, rx, eventually(SHORT, || ctx.stats().frames_dropped == 1));
    assert!(counted);
    assert_eq!(ctx.stats().frames_delivered, 0);
    assert!(ctx.inbound.try_receive().is_err());
}

#[test]
fn malformed_header_is_counted_and_skipped() {
    let (sim, ctx, rx) = link(test_config());
    let mut stream = b"+IPD,abc,5:hello\r\n".to_vec();
    stream.extend(ipd(3, br#"{"ok":true}"#));
    sim.inject(&stream);

    let record = run(&ctx, rx, with_timeout(SHORT, ctx.inbound.receive())).unwrap();
    assert_eq!(record.link_id, 3);
    assert_eq!(ctx.stats().malformed_headers, 1);
}

#[test]
fn transparent_json_lines_are_delivered() {
    let (sim, ctx, rx) = link(test_config());

    let record = run(&ctx, rx, async {
        assert!(ctx.enter_transparent().await);
        sim.inject(b"{\"temp\":21.5}\r\nnot json\r\n");
        with_timeout(SHORT, ctx.inbound.receive()).await
    })
    .unwrap();
    assert_eq!(record.link_id, 0);
    assert_eq!(record.record, json!({ "temp": 21.5 }));
    assert_eq!(ctx.stats().frames_delivered, 1);
}

#[test]
fn json_lines_ignored_in_command_mode() {
    let (sim, ctx, rx) = link(test_config());
    sim.inject(b"{\"temp\":21.5}\r\n");

    let got = run(&ctx, rx, with_timeout(Duration::from_millis(50), ctx.inbound.receive()));
    assert!(got.is_none());
}

#[test]
fn incoming_bytes_refresh_rx_timestamp() {
    let (sim, ctx, rx) = link(test_config());

    let fresh = run(&ctx, rx, async {
        async_io_mini::Timer::after(Duration::from_millis(60)).await;
        assert!(ctx.rx_age() >= Duration::from_millis(60));
        sim.inject(b"\r\nWIFI GOT IP\r\n");
        eventually(SHORT, || ctx.rx_age() < Duration::from_millis(30)).await
    });
    assert!(fresh);
}

#[test]
fn full_inbound_queue_drops_and_counts() {
    let (sim, ctx, rx) = link(test_config());
    for seq in 0..=INBOUND_DEPTH {
        sim.inject(&ipd(0, format!("{{\"seq\":{seq}}}").as_bytes()));
    }

    let settled = run(&ctx, rx, eventually(SHORT, || ctx.stats().frames_dropped == 1));
    assert!(settled);
    assert_eq!(ctx.stats().frames_delivered as usize, INBOUND_DEPTH);

    let first = ctx.inbound.try_receive().unwrap();
    assert_eq!(first.record, json!({ "seq": 0 }));
}
