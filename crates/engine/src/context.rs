use std::sync::Arc;

use wikigraph_db::DocumentStore;
use wikigraph_events::EventBus;

use crate::config::EngineConfig;
use crate::index::GraphIndexHandle;
use crate::registry::SchemaRegistry;
use crate::serializer::WriteSerializer;

/// State shared by every engine component.
pub struct EngineContext {
    pub store: Arc<dyn DocumentStore>,
    pub bus: Arc<EventBus>,
    pub config: EngineConfig,
    pub schema: SchemaRegistry,
    pub graph: GraphIndexHandle,
    pub serializer: WriteSerializer,
}

impl EngineContext {
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }
}
