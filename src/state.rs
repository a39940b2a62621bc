use crate::backend::Generator;
use crate::storage::StorageManager;
use std::sync::Arc;
use tokio::sync::Mutex;

// Core application state shared by every command
#[derive(Clone)]
pub struct AppState {
    // The StorageManager sits behind a Mutex so concurrent commands
    // serialize their database work.
    pub storage: Arc<Mutex<StorageManager>>,
    pub generator: Arc<Generator>,
}

impl AppState {
    pub fn new(storage_manager: StorageManager, generator: Generator) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage_manager)),
            generator: Arc::new(generator),
        }
    }
}
