use std::sync::Arc;

use application::{ClientRegistry, Clock};
use domain::ServiceStatus;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub jwt_service: Arc<JwtService>,
    pub status: Arc<ServiceStatus>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        registry: Arc<ClientRegistry>,
        jwt_service: Arc<JwtService>,
        status: ServiceStatus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            jwt_service,
            status: Arc::new(status),
            clock,
        }
    }
}
