//! Replication engine: change capture, the wire protocol, and the sync loop.

pub mod apply;
pub mod capture;
pub mod codec;
pub mod protocol;
pub mod request;
pub mod service;
pub mod transport;

pub use apply::ApplyReport;
pub use capture::CommitContext;
pub use codec::{DecodeError, ValueCodec};
pub use protocol::{SyncRequest, SyncResponse};
pub use request::{BatchLimits, ClientIdentity};
pub use service::{CycleOutcome, CycleReport, StatusCallbacks, SyncService};
pub use transport::{HttpTransport, SyncTransport, TransportError};
