//! Long-running sync service: polling loop, liveness listener, control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, CycleSummary, DaemonOptions, ServiceHandle, SyncService};
