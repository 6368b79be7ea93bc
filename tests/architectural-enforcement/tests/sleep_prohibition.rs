//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code must not block a runtime thread with
//! `std::thread::sleep`. Waits go through `tokio::time`.

use architectural_enforcement::{assert_no_violations, find_violations, production_files};

#[test]
fn test_production_sources_are_found() {
    // Guards against the scan silently checking nothing after a move.
    let files = production_files();
    assert!(files.iter().any(|f| f.ends_with("lib.rs")));
    assert!(files.iter().any(|f| f.ends_with("main.rs")));
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = find_violations(&["std::thread::sleep", "thread::sleep("]);
    assert_no_violations("No blocking sleep in production code", &violations);
}
