//! Wire types shared between the upload coordinator and the control plane.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    FinalizeRequest, FinalizeResponse, PresignRequest, PresignResponse, PresignResult,
    RecordNotifyRequest,
};
pub use types::JobStatus;
