use std::time::Duration;

use crate::storage::Storage;
use crate::toy::ToyService;

#[derive(Clone)]
pub struct AppState {
    pub service: ToyService,
    pub storage: Storage,
    pub retention: Duration,
}

impl AppState {
    pub fn new(service: ToyService, storage: Storage, retention: Duration) -> Self {
        AppState {
            service,
            storage,
            retention,
        }
    }
}
