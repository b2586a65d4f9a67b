use std::sync::Arc;

use crate::config::AppSettings;
use crate::content::WordCatalog;
use crate::registry::RoomManagerHandle;

#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomManagerHandle,
    pub catalog: Arc<WordCatalog>,
    pub settings: Arc<AppSettings>,
}
