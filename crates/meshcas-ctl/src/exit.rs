//! Exit-code classification for commands whose failure mode matters to
//! scripts driving the CLI (store/retrieve/download).

pub const OK: i32 = 0;
pub const USER_ERROR: i32 = 1;
pub const INTEGRITY_FAILURE: i32 = 2;
pub const NETWORK_FAILURE: i32 = 3;

/// Map an HTTP error body from the control API to an exit code. The API
/// reports both integrity and network failures as 422 bodies, so we
/// distinguish them by the "no holders reachable" / "not found" phrasing
/// the daemon puts in the message.
pub fn classify(status: reqwest::StatusCode, body: &str) -> i32 {
    if status == reqwest::StatusCode::BAD_REQUEST {
        return USER_ERROR;
    }
    if body.contains("no holders reachable") || body.contains("NoHoldersReachable") {
        return NETWORK_FAILURE;
    }
    INTEGRITY_FAILURE
}
