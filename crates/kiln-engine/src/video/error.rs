use crate::device::DeviceError;

use super::backend::VideoApi;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VideoError {
    /// The device could not be opened, initially or while rebuilding it
    /// after a loss.
    #[error("failed to initialize {api} device")]
    DeviceInit {
        api: VideoApi,
        #[source]
        source: DeviceError,
    },

    /// A single GPU resource could not be created. Nothing was leaked; the
    /// caller may retry or carry on without it.
    #[error("failed to create {what}")]
    ResourceCreation {
        what: String,
        #[source]
        source: DeviceError,
    },

    #[error("invalid render state: {0}")]
    InvalidState(String),

    /// Drawing was attempted outside `begin_render`/`end_render`.
    #[error("not rendering")]
    NotRendering,
}
