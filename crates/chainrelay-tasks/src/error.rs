use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("critical task '{name}' failed: {message}")]
    Critical { name: String, message: String },
}
