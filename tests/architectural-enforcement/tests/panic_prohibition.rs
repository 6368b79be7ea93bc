//! Integration Test: Panic Prohibition
//!
//! **Policy**: A malformed frame or a failed call must never take the worker
//! down. Production code propagates errors instead of unwrapping them.

use architectural_enforcement::{assert_no_violations, find_violations};

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = find_violations(&[".unwrap()", ".expect("]);
    assert_no_violations("Errors must be propagated, not unwrapped", &violations);
}

#[test]
fn test_no_panic_macros_in_production_code() {
    let violations = find_violations(&["panic!(", "todo!(", "unimplemented!("]);
    assert_no_violations("No panic macros in production code", &violations);
}
