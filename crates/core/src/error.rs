use crate::types::DeviceIndex;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid device {device}: {device_count} device(s) configured")]
    InvalidDevice {
        device: DeviceIndex,
        device_count: usize,
    },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
