use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("heartbeat service is already running")]
    HeartbeatAlreadyRunning,
    #[error("heartbeat service has been stopped")]
    HeartbeatStopped,
    #[error("invalid heartbeat interval: {0:?}")]
    InvalidInterval(Duration),
    #[error("client registry is closed")]
    RegistryClosed,
}
