//! Authorization subsystem: cache, local list, and the decision chain.
//!
//! Two local authorities are consulted in order for every swipe (local
//! list first, cache second) and the Central System is asked only when
//! neither knows the tag.

pub mod cache;
pub mod local_list;
pub mod manager;

pub use cache::AuthentCache;
pub use local_list::AuthentLocalList;
pub use manager::AuthentManager;

use rust_ocpp::v1_6::types::AuthorizationStatus;

/// OCPP string form of an authorization status, as stored in the database.
pub fn status_to_str(status: &AuthorizationStatus) -> &'static str {
    match status {
        AuthorizationStatus::Accepted => "Accepted",
        AuthorizationStatus::Blocked => "Blocked",
        AuthorizationStatus::Expired => "Expired",
        AuthorizationStatus::Invalid => "Invalid",
        AuthorizationStatus::ConcurrentTx => "ConcurrentTx",
    }
}

/// Inverse of [`status_to_str`]; anything unrecognized reads as `Invalid`.
pub fn status_from_str(status: &str) -> AuthorizationStatus {
    match status {
        "Accepted" => AuthorizationStatus::Accepted,
        "Blocked" => AuthorizationStatus::Blocked,
        "Expired" => AuthorizationStatus::Expired,
        "ConcurrentTx" => AuthorizationStatus::ConcurrentTx,
        _ => AuthorizationStatus::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in [
            AuthorizationStatus::Accepted,
            AuthorizationStatus::Blocked,
            AuthorizationStatus::Expired,
            AuthorizationStatus::Invalid,
            AuthorizationStatus::ConcurrentTx,
        ] {
            assert_eq!(status_from_str(status_to_str(&status)), status);
        }
        assert_eq!(status_from_str("Garbage"), AuthorizationStatus::Invalid);
    }
}
