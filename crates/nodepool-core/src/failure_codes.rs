//! Default set of HTTP status codes that mark a response as an attempt
//! failure eligible for retry, grounded in
//! `examples/original_source/failure_status_codes.go`. Some historical
//! variants of the source also classify 400 as a failure; spec.md's stable
//! default set intentionally excludes it (see DESIGN.md Open Question (c)),
//! so this list follows spec.md verbatim.

/// Status codes treated as attempt failures when a [`crate::chain::Chain`]
/// is built without an explicit `failure_status_codes` list.
pub const DEFAULT_FAILURE_STATUS_CODES: &[u16] = &[
    401, 402, 403, 410, 429, 500, 501, 502, 503, 504, 505, 506, 507, 508, 510, 511,
];
