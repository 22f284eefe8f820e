//! Fuzz the AT reply scanner: arbitrary replies must end in a verdict or
//! stay pending, never panic, and always respect the byte budget.

#![no_main]

use atbridge::config::LineReaderBudget;
use atbridge::link::CommandOutcome;
use atbridge::link::correlator::{ReplyScanner, ScanStep};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let budget = LineReaderBudget {
        max_bytes: 512,
        chunk_size: 32,
        max_line_bytes: 64,
    };
    let mut scanner = ReplyScanner::new("AT+CIPSTATUS", &["OK", r"STATUS:\d", "ALREADY CONNECTED"], budget);
    let mut fed = 0;
    for chunk in data.chunks(budget.chunk_size) {
        fed += chunk.len();
        match scanner.push(chunk) {
            ScanStep::Pending => assert!(fed <= budget.max_bytes),
            ScanStep::Done(CommandOutcome::ByteBudgetExceeded, _) => {
                assert!(fed > budget.max_bytes);
                return;
            }
            ScanStep::Done(_, _) => return,
        }
    }
});
