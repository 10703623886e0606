//! SCEP Client - certificate enrollment against a SCEP server
//!
//! - [`config`]: paths, subject and retry policy of one enrollment
//! - [`transport`]: the HTTP operations, behind [`ScepTransport`]
//! - [`enroll`]: the enrollment state machine and `GetCert`
//! - [`cancel`]: stopping a pending wait

pub mod cancel;
pub mod config;
pub mod enroll;
pub mod error;
pub mod transport;

pub use cancel::{CancelSignal, Canceller};
pub use config::{EnrollConfig, RetryPolicy};
pub use enroll::EnrollmentClient;
pub use error::{EnrollError, TransportError};
pub use transport::{HttpTransport, ScepTransport};
