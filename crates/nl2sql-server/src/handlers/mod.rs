pub mod health;
pub mod schema;
pub mod submit;

use serde::Serialize;

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
