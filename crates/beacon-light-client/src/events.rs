use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;
use strum::{AsRefStr, Display};

use crate::consensus::types::BeaconBlockHeader;

/// Changes of the light client store, emitted after the store is updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightClientEvent {
    OptimisticHeader(BeaconBlockHeader),
    FinalizedHeader(BeaconBlockHeader),
    /// A committee was stored for `period`.
    SyncCommittee { period: u64 },
}

impl LightClientEvent {
    pub fn kind(&self) -> LightClientEventKind {
        match self {
            Self::OptimisticHeader(_) => LightClientEventKind::OptimisticHeader,
            Self::FinalizedHeader(_) => LightClientEventKind::FinalizedHeader,
            Self::SyncCommittee { .. } => LightClientEventKind::SyncCommittee,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LightClientEventKind {
    OptimisticHeader,
    FinalizedHeader,
    SyncCommittee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Returns false once the handler is done, which removes it.
type Handler = Arc<dyn Fn(&LightClientEvent) -> bool + Send + Sync>;

/// Registry of event handlers, one list per event kind.
///
/// Handlers run synchronously on the emitting task and must not block.
#[derive(Default)]
pub struct LightClientEmitter {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(HandlerId, LightClientEventKind, Handler)>>,
}

impl LightClientEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: LightClientEventKind, handler: F) -> HandlerId
    where
        F: Fn(&LightClientEvent) + Send + Sync + 'static,
    {
        self.on_while(kind, move |event| {
            handler(event);
            true
        })
    }

    /// Like [`Self::on`], but the handler is removed after the first call that returns false.
    pub fn on_while<F>(&self, kind: LightClientEventKind, handler: F) -> HandlerId
    where
        F: Fn(&LightClientEvent) -> bool + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, kind, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: &LightClientEvent) {
        let kind = event.kind();
        // Handlers are called without holding the lock so they may register or remove others.
        let handlers: Vec<(HandlerId, Handler)> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, handler_kind, _)| *handler_kind == kind)
            .map(|(id, _, handler)| (*id, handler.clone()))
            .collect();

        let finished: Vec<HandlerId> = handlers
            .into_iter()
            .filter_map(|(id, handler)| (!handler(event)).then_some(id))
            .collect();
        if !finished.is_empty() {
            self.handlers
                .write()
                .retain(|(id, _, _)| !finished.contains(id));
        }
    }

    pub fn handler_count(&self, kind: LightClientEventKind) -> usize {
        self.handlers
            .read()
            .iter()
            .filter(|(_, handler_kind, _)| *handler_kind == kind)
            .count()
    }
}

impl std::fmt::Debug for LightClientEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightClientEmitter")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}
