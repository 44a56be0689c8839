//! peqhid HID - PEQ control over a vendor HID protocol.
//!
//! This crate drives the wire protocol from `peqhid-core` over a [`Transport`]:
//! the [`correlator`] reassembles multi-report device replies into one result,
//! and [`PeqSession`] exposes the pull/push/enable/slot operations.
//!
//! Native device access via hidapi is behind the `hidapi` feature.

pub mod config;
pub mod correlator;
#[cfg(feature = "hidapi")]
pub mod device;
pub mod error;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use correlator::{Accumulator, Completion, Exchange, Outcome, ResponseCorrelator};
pub use error::{HidError, HidResult};
pub use session::{PeqSession, PullResult, SLOT_NO_ANSWER};
pub use transport::{InboundReports, Transport};
