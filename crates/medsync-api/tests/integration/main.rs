//! Integration tests for medsync-api
//!
//! Uses wiremock to simulate the clinic backend and verifies end-to-end
//! behavior of the RestClient and the RestRemoteApi adapter: record calls,
//! changed-since listings, error classification and the health probe.

mod common;

mod test_records;
