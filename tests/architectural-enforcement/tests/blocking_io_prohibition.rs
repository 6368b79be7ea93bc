//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code must not use blocking I/O.
//! **Required**: Use `tokio::fs` and `tokio::net`, not `std::fs` calls or
//! `std::net` streams. Plain types such as `std::net::SocketAddr` and
//! `std::fs::Permissions` are fine.

use architectural_enforcement::{assert_no_violations, find_violations};

const BLOCKING_CALLS: &[&str] = &[
    "std::fs::read",
    "std::fs::write",
    "std::fs::remove_file",
    "std::fs::set_permissions",
    "std::fs::create_dir",
    "std::fs::metadata",
    "std::fs::File",
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::os::unix::net::",
    "std::io::stdin()",
];

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_violations(BLOCKING_CALLS);
    assert_no_violations("All I/O must be async", &violations);
}
