//! Line-oriented JSON request/response protocol and its method handlers.

mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
