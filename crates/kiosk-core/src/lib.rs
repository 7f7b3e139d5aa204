//! kiosk-core — Attendance kiosk logic.
//!
//! Binds the kiosk to a class session, runs the capture-and-verify
//! check-in pipeline against the camera, and enforces kiosk lockdown.
//! Remote services are reached through the traits in [`collab`].

pub mod binding;
pub mod cache;
pub mod collab;
pub mod failure;
pub mod flags;
pub mod kiosk;
pub mod lockdown;
pub mod pipeline;
pub mod routes;
pub mod types;

#[cfg(test)]
mod fakes;

pub use binding::{ActiveSession, BindingError, SessionBindingController};
pub use collab::{ApiError, ClassDirectory, Clock, FaceVerifier, SystemClock, VerifyError};
pub use flags::{FileFlagStore, FlagStore, MemoryFlagStore};
pub use kiosk::{Kiosk, KioskSnapshot};
pub use lockdown::{DigestCredential, ExitCredential, LockdownController, NavigationHost};
pub use pipeline::{CheckInOutcome, CheckinPipeline, PipelineSettings};
pub use routes::KioskRoute;
pub use types::{CheckinRecord, ClassSummary, KioskStatus, SessionMetadata, SessionSummary};
