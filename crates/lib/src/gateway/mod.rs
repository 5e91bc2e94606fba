//! Gateway: the public HTTP surface for submissions.
//!
//! Wire types in `protocol`, the submission pipeline in `submit`, and the
//! axum server in `server`.

mod protocol;
mod server;
mod submit;

pub use protocol::{PublicForm, PublicQuestion, SubmitRequest, SubmitResponse};
pub use server::{build_router, build_state, run_gateway, GatewayState};
pub use submit::SubmissionGateway;
