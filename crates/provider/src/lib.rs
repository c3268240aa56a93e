//! Cloud side of the VPC block storage driver: IAM sessions, the VPC (and
//! IKS storage service) HTTP client, retry cadences and the user facing
//! error catalog.

pub mod api;
pub mod config;
pub mod error;
pub mod iam;
pub mod messages;
pub mod model;
pub mod retry;
pub mod session;
pub mod transport;

pub use config::{ConfigError, SessionSettings};
pub use error::{BackendError, BackendErrorKind};
pub use messages::{Kind, MessageCode, UserError};
pub use model::*;
pub use session::{CloudProvider, VolumeProvider, VpcCloud, VpcSession};
