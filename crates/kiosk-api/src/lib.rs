//! kiosk-api — HTTP clients for the kiosk's remote collaborators.
//!
//! [`RestClient`] implements [`kiosk_core::ClassDirectory`] and
//! [`VerifyClient`] implements [`kiosk_core::FaceVerifier`]. Both attach
//! the bearer token from the flag store when one is present.

pub mod parse;
pub mod rest;
pub mod verify;

pub use rest::RestClient;
pub use verify::VerifyClient;

/// Join a base URL and an absolute path without doubling the slash.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(endpoint("http://api:8000/", "/classes"), "http://api:8000/classes");
        assert_eq!(endpoint("http://api:8000", "/classes/5"), "http://api:8000/classes/5");
    }
}
