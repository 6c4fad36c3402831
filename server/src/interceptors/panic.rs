use crate::services::dumpservice;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use tracing::error;

/// Response for a handler that panicked. Staged files are released by their guards while unwinding.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!(panic = detail, "handler panicked");
    dumpservice::unhandled().into_response()
}
