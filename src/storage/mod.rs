//! Authoritative registry of identifiers, their processing state and handlers
//!
//! The identifier set, state table and handler map are synchronized
//! independently; no lock spans all three. Readers may see an identifier in
//! the set slightly before its handler is visible and must re-check through
//! [`MediaStorage::act_with_handler`] or [`MediaStorage::wait_for`].
//!
//! Anything that constructs or replaces a handler takes a [`MainThread`]
//! token. Work finishing elsewhere is queued and applied by
//! [`MediaStorage::drain`].

mod state;

pub use state::{ProcessingState, StateTable};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::formats::{DecodeContext, FormatRegistry, MediaKind};
use crate::handler::{CapabilityClass, SwapperHandler};
use crate::identifier::{Identifier, Placeholder};
use crate::media::{MediaInfo, RawMediaData};
use crate::mirror::FullMediaData;
use crate::observability::Metrics;
use crate::query::QueryResult;
use crate::thread::MainThread;

pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Work posted from background tasks, run by the next drain
pub type MainThreadAction =
    Box<dyn FnOnce(&MainThread, &MediaStorage) -> Result<(), AnyError> + Send>;

/// Callback applied to a ready handler
pub type HandlerCallback = Box<dyn FnMut(&SwapperHandler) -> Result<(), AnyError> + Send>;

/// Raw entries processed per drain
pub const DEFAULT_DRAIN_BATCH: usize = 25;

enum Waiter {
    Callback {
        class: CapabilityClass,
        callback: HandlerCallback,
    },
    Notify(oneshot::Sender<Arc<SwapperHandler>>),
}

/// Result of [`MediaStorage::wait_for`]
pub enum HandlerWait {
    Ready(Arc<SwapperHandler>),
    Pending {
        receiver: oneshot::Receiver<Arc<SwapperHandler>>,
        fallback: Arc<SwapperHandler>,
    },
}

impl HandlerWait {
    /// Resolve to the final handler; a dropped storage yields the error handler
    pub async fn resolve(self) -> Arc<SwapperHandler> {
        match self {
            Self::Ready(handler) => handler,
            Self::Pending { receiver, fallback } => receiver.await.unwrap_or(fallback),
        }
    }
}

/// What one drain did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub waiters_fired: usize,
    pub raw_processed: usize,
    pub ids_flushed: usize,
    pub actions_run: usize,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct MediaStorage {
    ids: RwLock<BTreeSet<Identifier>>,
    pending_ids: Mutex<HashSet<Identifier>>,
    states: StateTable,
    kinds: RwLock<HashMap<Identifier, MediaKind>>,
    infos: RwLock<HashMap<Identifier, MediaInfo>>,
    results: RwLock<HashMap<Identifier, QueryResult>>,
    handlers: RwLock<HashMap<Identifier, Arc<SwapperHandler>>>,
    waiters: Mutex<HashMap<Identifier, Vec<Waiter>>>,
    raw_queue: Mutex<Vec<RawMediaData>>,
    actions: Mutex<VecDeque<MainThreadAction>>,
    drain_batch: usize,
    metrics: Arc<Metrics>,
}

impl MediaStorage {
    /// Empty storage with every placeholder identifier bound to an empty
    /// handler
    pub fn new(drain_batch: usize, metrics: Arc<Metrics>) -> Self {
        let handlers = Placeholder::ALL
            .iter()
            .map(|p| (p.id(), Arc::new(SwapperHandler::empty(p.id()))))
            .collect();

        Self {
            ids: RwLock::new(BTreeSet::new()),
            pending_ids: Mutex::new(HashSet::new()),
            states: StateTable::new(),
            kinds: RwLock::new(HashMap::new()),
            infos: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            handlers: RwLock::new(handlers),
            waiters: Mutex::new(HashMap::new()),
            raw_queue: Mutex::new(Vec::new()),
            actions: Mutex::new(VecDeque::new()),
            drain_batch: drain_batch.max(1),
            metrics,
        }
    }

    /// Register a source. Returns the identifier when it was not seen
    /// before.
    pub fn register_query(&self, source: &str, registry: &FormatRegistry) -> Option<Identifier> {
        let id = match Identifier::derive(source) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(source, error = %e, "Cannot register media source");
                return None;
            }
        };

        self.register(id.clone(), registry.kind_for_source(source))
            .then_some(id)
    }

    /// Register an identifier of a known kind.
    ///
    /// New identifiers are marked `Queried` and get a delayed placeholder
    /// handler for their kind, so callers never see a missing identifier.
    /// An existing handler is never replaced.
    pub fn register(&self, id: Identifier, kind: MediaKind) -> bool {
        if self.is_known(&id) {
            return false;
        }

        let placeholder = match kind {
            MediaKind::Image | MediaKind::Video => SwapperHandler::Delayed {
                id: id.clone(),
                class: CapabilityClass::Mesh,
                multiple: true,
            },
            MediaKind::Audio | MediaKind::Unknown => SwapperHandler::Delayed {
                id: id.clone(),
                class: CapabilityClass::General,
                multiple: false,
            },
        };

        self.states.set(&id, ProcessingState::Queried);
        self.kinds.write().insert(id.clone(), kind);
        self.handlers
            .write()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(placeholder));
        self.pending_ids.lock().insert(id.clone());
        self.metrics.query_registered();

        tracing::debug!(id = %id, ?kind, "Registered media query");
        true
    }

    /// Registered, whether or not the identifier is published yet
    pub fn is_known(&self, id: &Identifier) -> bool {
        self.ids.read().contains(id)
            || self.pending_ids.lock().contains(id)
            || self.states.contains(id)
    }

    /// Queue raw data for handler construction by the next drain.
    ///
    /// The `Loaded` state is recorded before the data becomes visible to a
    /// drain, so a drain can never clear it ahead of time.
    pub fn store_raw(&self, data: RawMediaData) {
        let id = data.id().clone();
        self.states.lift_if(&id, ProcessingState::Queried);
        self.states.set_if_absent(&id, ProcessingState::Loaded);
        self.results
            .write()
            .insert(id.clone(), data.query_result().clone());
        self.raw_queue.lock().push(data);
    }

    /// Construct the handler for raw data right away.
    ///
    /// At most one construction per identifier is in flight: data arriving
    /// while the identifier is `Processed` is dropped.
    pub fn process_raw(&self, main: &MainThread, data: RawMediaData, ctx: &DecodeContext) {
        let id = data.id().clone();
        self.states.lift_if(&id, ProcessingState::Queried);

        if self.states.get(&id) == Some(ProcessingState::Processed) {
            tracing::debug!(id = %id, "Handler construction already in flight");
            return;
        }

        self.results
            .write()
            .insert(id.clone(), data.query_result().clone());

        if data.is_error() {
            tracing::debug!(id = %id, "Binding error handler for failed load");
            self.bind_error(&id);
            self.states.clear(&id);
            return;
        }

        self.states.set(&id, ProcessingState::Processed);
        self.kinds.write().insert(id.clone(), data.kind(ctx.registry()));

        match ctx.registry().decode(&id, &data, ctx) {
            Ok(handler) => self.store_handler(main, &id, data.info().clone(), Some(handler)),
            Err(e) => {
                tracing::warn!(id = %id, format = %data.info().format, error = %e, "Decode failed");
                self.store_handler(main, &id, data.info().clone(), None);
            }
        }
    }

    /// Record a handler. Delayed handlers are stored without touching the
    /// state; anything else finishes processing. `None` binds the error
    /// handler.
    pub fn store_handler(
        &self,
        _main: &MainThread,
        id: &Identifier,
        info: MediaInfo,
        handler: Option<SwapperHandler>,
    ) {
        if let Some(handler) = handler.as_ref().filter(|h| h.is_delayed()) {
            self.handlers
                .write()
                .insert(id.clone(), Arc::new(handler.clone()));
            return;
        }

        self.states.clear(id);

        match handler {
            Some(handler) => {
                tracing::debug!(id = %id, kind = handler.kind_name(), "Stored handler");
                self.infos.write().insert(id.clone(), info);
                self.handlers.write().insert(id.clone(), Arc::new(handler));
                self.metrics.handler_stored();
            }
            None => {
                self.metrics.decode_failed();
                self.bind_error(id);
            }
        }
    }

    /// Failed media keeps no kind, which keeps it out of every selection
    /// class
    fn bind_error(&self, id: &Identifier) {
        let error = self.error_handler();
        self.kinds.write().remove(id);
        self.handlers.write().insert(id.clone(), error);
    }

    /// Resolve `id` to one of the placeholder handlers and finish its
    /// processing
    pub fn bind_placeholder(&self, _main: &MainThread, id: &Identifier, placeholder: Placeholder) {
        let handler = self
            .handler(&placeholder.id())
            .unwrap_or_else(|| Arc::new(SwapperHandler::empty(placeholder.id())));
        self.kinds.write().remove(id);
        self.handlers.write().insert(id.clone(), handler);
        self.states.clear(id);
    }

    pub fn error_handler(&self) -> Arc<SwapperHandler> {
        let error = Placeholder::Error.id();
        self.handlers
            .read()
            .get(&error)
            .cloned()
            .unwrap_or_else(|| Arc::new(SwapperHandler::empty(error)))
    }

    /// Run `on_ready` against the handler for `id`.
    ///
    /// Mid-processing identifiers queue the callback for a later drain;
    /// unknown identifiers are redirected to the error handler. If the
    /// callback fails for a mesh caller, it is retried once against the
    /// error handler.
    pub fn act_with_handler<F>(
        &self,
        main: &MainThread,
        id: &Identifier,
        class: CapabilityClass,
        mut on_ready: F,
    ) where
        F: FnMut(&SwapperHandler) -> Result<(), AnyError> + Send + 'static,
    {
        let error_id = Placeholder::Error.id();

        let target = if self.states.contains(id) {
            self.waiters
                .lock()
                .entry(id.clone())
                .or_default()
                .push(Waiter::Callback {
                    class,
                    callback: Box::new(on_ready),
                });
            return;
        } else if self.handlers.read().contains_key(id) {
            id.clone()
        } else {
            tracing::warn!(id = %id, "No handler for identifier, using error handler");
            error_id.clone()
        };

        let handler = self.handler(&target).unwrap_or_else(|| self.error_handler());
        if !handler.supports(class) {
            if target != error_id {
                tracing::warn!(id = %id, handler = handler.kind_name(), ?class, "Handler does not support caller");
            }
            return;
        }

        if let Err(e) = on_ready(&handler) {
            tracing::error!(id = %id, error = %e, "Handler callback failed");
            if class == CapabilityClass::Mesh && target != error_id {
                self.act_with_handler(main, &error_id, class, on_ready);
            }
        }
    }

    /// Future-based wait for the final handler of `id`
    pub fn wait_for(&self, id: &Identifier) -> HandlerWait {
        if self.states.contains(id) {
            let (sender, receiver) = oneshot::channel();
            self.waiters
                .lock()
                .entry(id.clone())
                .or_default()
                .push(Waiter::Notify(sender));
            return HandlerWait::Pending {
                receiver,
                fallback: self.error_handler(),
            };
        }

        HandlerWait::Ready(self.handler(id).unwrap_or_else(|| self.error_handler()))
    }

    /// Post work to run on the designated thread at the next drain
    pub fn post(&self, action: MainThreadAction) {
        self.actions.lock().push_back(action);
    }

    /// Designated-thread tick: fire waiters of identifiers that finished,
    /// construct handlers for queued raw data, publish newly registered
    /// identifiers, then run posted actions.
    pub fn drain(&self, main: &MainThread, ctx: &DecodeContext) -> DrainReport {
        let mut report = DrainReport::default();

        let ready: Vec<(Identifier, Vec<Waiter>)> = {
            let mut waiters = self.waiters.lock();
            let finished: Vec<Identifier> = waiters
                .keys()
                .filter(|id| !self.states.contains(id))
                .cloned()
                .collect();
            finished
                .into_iter()
                .filter_map(|id| waiters.remove_entry(&id))
                .collect()
        };
        for (id, waiters) in ready {
            for waiter in waiters {
                report.waiters_fired += 1;
                match waiter {
                    Waiter::Callback { class, callback } => {
                        self.act_with_handler(main, &id, class, callback);
                    }
                    Waiter::Notify(sender) => {
                        let handler = self.handler(&id).unwrap_or_else(|| self.error_handler());
                        let _ = sender.send(handler);
                    }
                }
            }
        }

        let batch: Vec<RawMediaData> = {
            let mut queue = self.raw_queue.lock();
            let take = queue.len().min(self.drain_batch);
            let keep = queue.len() - take;
            queue.split_off(keep)
        };
        for data in batch.into_iter().rev() {
            let id = data.id().clone();
            self.process_raw(main, data, ctx);
            self.states.lift_if(&id, ProcessingState::Loaded);
            report.raw_processed += 1;
        }

        let flushed: Vec<Identifier> = self.pending_ids.lock().drain().collect();
        if !flushed.is_empty() {
            report.ids_flushed = flushed.len();
            self.ids.write().extend(flushed);
        }

        for _ in 0..self.drain_batch {
            let Some(action) = self.actions.lock().pop_front() else {
                break;
            };
            if let Err(e) = action(main, self) {
                tracing::error!(error = %e, "Designated-thread action failed");
            }
            report.actions_run += 1;
        }

        report
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.ids.read().contains(id)
    }

    /// Published identifiers in sorted order
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.ids.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers whose path equals `name`, across namespaces
    pub fn ids_named(&self, name: &str) -> Vec<Identifier> {
        self.ids
            .read()
            .iter()
            .filter(|id| id.path() == name)
            .cloned()
            .collect()
    }

    pub fn state(&self, id: &Identifier) -> Option<ProcessingState> {
        self.states.get(id)
    }

    pub fn states(&self) -> HashMap<Identifier, ProcessingState> {
        self.states.snapshot()
    }

    pub fn media_kind(&self, id: &Identifier) -> Option<MediaKind> {
        self.kinds.read().get(id).copied()
    }

    pub fn info(&self, id: &Identifier) -> Option<MediaInfo> {
        self.infos.read().get(id).cloned()
    }

    pub fn query_result(&self, id: &Identifier) -> Option<QueryResult> {
        self.results.read().get(id).cloned()
    }

    pub fn handler(&self, id: &Identifier) -> Option<Arc<SwapperHandler>> {
        self.handlers.read().get(id).cloned()
    }

    /// Mirroring triple; unknown parts become an error descriptor and an
    /// empty result
    pub fn full_data(&self, id: &Identifier) -> FullMediaData {
        FullMediaData::new(
            id.clone(),
            self.info(id).unwrap_or_else(|| MediaInfo::error("")),
            self.query_result(id).unwrap_or_default(),
        )
    }

    /// Published, non-placeholder identifiers of the given kinds accepted by
    /// `filter`
    pub fn eligible<F>(&self, kinds: &[MediaKind], mut filter: F) -> Vec<Identifier>
    where
        F: FnMut(&Identifier) -> bool,
    {
        let media_kinds = self.kinds.read();
        self.ids
            .read()
            .iter()
            .filter(|id| !Placeholder::is_placeholder(id))
            .filter(|id| {
                media_kinds
                    .get(*id)
                    .is_some_and(|kind| kinds.contains(kind))
            })
            .filter(|id| filter(*id))
            .cloned()
            .collect()
    }

    /// Whether queued work remains for the designated thread
    pub fn has_pending_work(&self) -> bool {
        !self.raw_queue.lock().is_empty()
            || !self.actions.lock().is_empty()
            || !self.pending_ids.lock().is_empty()
            || !self.waiters.lock().is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MediaRating;
    use crate::testing::{png_bytes, Harness};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, HandlerCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: HandlerCallback = Box::new(move |handler: &SwapperHandler| {
            sink.lock()
                .push(format!("{}:{}", handler.kind_name(), handler.id()));
            Ok(())
        });
        (seen, callback)
    }

    async fn local_png(harness: &Harness, source: &str) -> RawMediaData {
        let id = Identifier::derive(source).unwrap();
        RawMediaData::infer(
            id,
            source,
            png_bytes(2, 2),
            QueryResult::local(source, MediaRating::Safe, vec![]),
            None,
            &harness.ctx.inference,
        )
        .await
    }

    #[tokio::test]
    async fn test_placeholders_bound_on_creation() {
        let harness = Harness::new();
        for placeholder in Placeholder::ALL {
            let handler = harness.storage.handler(&placeholder.id()).unwrap();
            assert_eq!(handler.kind_name(), "empty");
        }
        assert!(harness.storage.is_empty());
    }

    #[tokio::test]
    async fn test_register_query_is_idempotent() {
        let harness = Harness::new();
        let registry = harness.ctx.registry().clone();

        let id = harness
            .storage
            .register_query("https://i.example.com/cat.png", &registry)
            .unwrap();
        assert!(harness
            .storage
            .register_query("https://i.example.com/cat.png", &registry)
            .is_none());

        assert_eq!(harness.storage.state(&id), Some(ProcessingState::Queried));
        assert_eq!(harness.storage.media_kind(&id), Some(MediaKind::Image));
        let placeholder = harness.storage.handler(&id).unwrap();
        assert!(placeholder.is_delayed());
        assert!(placeholder.supports(CapabilityClass::Mesh));

        // published by the next drain
        assert!(!harness.storage.contains(&id));
        let report = harness.storage.drain(&harness.main(), &harness.ctx);
        assert_eq!(report.ids_flushed, 1);
        assert!(harness.storage.contains(&id));
        assert_eq!(harness.metrics.snapshot().queries_registered, 1);
    }

    #[tokio::test]
    async fn test_audio_sources_get_general_placeholder() {
        let harness = Harness::new();
        let registry = harness.ctx.registry().clone();
        let id = harness
            .storage
            .register_query("https://a.example.com/song.mp3", &registry)
            .unwrap();

        let placeholder = harness.storage.handler(&id).unwrap();
        assert!(placeholder.supports(CapabilityClass::General));
        assert!(!placeholder.allow_multiple());
    }

    #[tokio::test]
    async fn test_store_raw_then_drain_builds_material() {
        let harness = Harness::new();
        let data = local_png(&harness, "/srv/media/red.png").await;
        let id = data.id().clone();

        harness.storage.store_raw(data);
        assert_eq!(harness.storage.state(&id), Some(ProcessingState::Loaded));

        let report = harness.storage.drain(&harness.main(), &harness.ctx);
        assert_eq!(report.raw_processed, 1);
        assert_eq!(harness.storage.state(&id), None);
        assert_eq!(harness.storage.handler(&id).unwrap().kind_name(), "material");
        assert_eq!(harness.storage.info(&id).unwrap().width, Some(2));
        assert!(harness.storage.query_result(&id).unwrap().is_local());
    }

    #[tokio::test]
    async fn test_error_data_binds_error_handler() {
        let harness = Harness::new();
        let id = Identifier::parse("example.com:broken").unwrap();
        let data = RawMediaData::error(id.clone(), "https://example.com/broken.png", QueryResult::Empty);

        harness.storage.process_raw(&harness.main(), data, &harness.ctx);

        let handler = harness.storage.handler(&id).unwrap();
        assert_eq!(handler.id(), &Placeholder::Error.id());
        assert_eq!(harness.storage.state(&id), None);
        assert!(harness.storage.info(&id).is_none());
    }

    #[tokio::test]
    async fn test_failed_media_is_never_eligible() {
        let harness = Harness::new();
        let registry = harness.ctx.registry().clone();
        let source = "https://img.example.com/timeout.png";
        let id = harness.storage.register_query(source, &registry).unwrap();
        assert_eq!(harness.storage.media_kind(&id), Some(MediaKind::Image));

        harness.storage.store_raw(RawMediaData::error(
            id.clone(),
            source,
            QueryResult::remote(source, MediaRating::Safe, vec![]),
        ));
        harness.settle().await;

        assert_eq!(harness.storage.handler(&id).unwrap().id(), &Placeholder::Error.id());
        assert_eq!(harness.storage.media_kind(&id), None);
        assert!(harness.storage.contains(&id));
        for class in [CapabilityClass::Mesh, CapabilityClass::General] {
            assert!(harness.storage.eligible(class.media_kinds(), |_| true).is_empty());
        }
    }

    #[tokio::test]
    async fn test_concurrent_store_raw_and_drain_leave_nothing_in_flight() {
        let harness = Harness::new();
        let registry = harness.ctx.registry().clone();

        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let storage = harness.storage.clone();
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let source = format!("https://w{worker}.example.com/{i}.png");
                        let id = storage.register_query(&source, &registry).unwrap();
                        storage.store_raw(RawMediaData::error(id, source, QueryResult::Empty));
                    }
                })
            })
            .collect();

        while !producers.iter().all(|p| p.is_finished()) {
            harness.storage.drain(&harness.main(), &harness.ctx);
        }
        for producer in producers {
            producer.join().unwrap();
        }
        harness.settle().await;

        assert_eq!(harness.storage.len(), 1000);
        assert_eq!(harness.storage.in_flight(), 0);
        assert!(!harness.storage.has_pending_work());
    }

    #[tokio::test]
    async fn test_missing_placeholder_binding_leaves_selection() {
        let harness = Harness::new();
        let registry = harness.ctx.registry().clone();
        let id = harness
            .storage
            .register_query("https://img.example.com/gone.png", &registry)
            .unwrap();
        harness.storage.drain(&harness.main(), &harness.ctx);

        harness
            .storage
            .bind_placeholder(&harness.main(), &id, Placeholder::Missing);

        assert_eq!(harness.storage.handler(&id).unwrap().id(), &Placeholder::Missing.id());
        assert!(harness
            .storage
            .eligible(CapabilityClass::Mesh.media_kinds(), |_| true)
            .is_empty());
    }

    #[tokio::test]
    async fn test_processed_state_drops_duplicate_data() {
        let harness = Harness::new();
        let data = local_png(&harness, "/srv/media/dup.png").await;
        let id = data.id().clone();

        harness.storage.states.set(&id, ProcessingState::Processed);
        harness.storage.process_raw(&harness.main(), data, &harness.ctx);

        assert!(harness.storage.handler(&id).is_none());
        assert_eq!(harness.storage.state(&id), Some(ProcessingState::Processed));
    }

    #[tokio::test]
    async fn test_unknown_id_redirects_to_error_handler() {
        let harness = Harness::new();
        let (seen, callback) = recorder();
        let id = Identifier::parse("nowhere:nothing").unwrap();

        harness
            .storage
            .act_with_handler(&harness.main(), &id, CapabilityClass::Mesh, callback);

        assert_eq!(
            seen.lock().as_slice(),
            [format!("empty:{}", Placeholder::Error.id())]
        );
    }

    #[tokio::test]
    async fn test_callback_waits_for_processing() {
        let harness = Harness::new();
        let data = local_png(&harness, "/srv/media/late.png").await;
        let id = data.id().clone();
        let registry = harness.ctx.registry().clone();
        harness.storage.register_query("/srv/media/late.png", &registry);

        let (seen, callback) = recorder();
        harness
            .storage
            .act_with_handler(&harness.main(), &id, CapabilityClass::Mesh, callback);
        assert!(seen.lock().is_empty());

        harness.storage.store_raw(data);
        harness.settle().await;

        assert_eq!(seen.lock().as_slice(), [format!("material:{id}")]);
    }

    #[tokio::test]
    async fn test_unsupported_class_skips_callback() {
        let harness = Harness::new();
        let data = local_png(&harness, "/srv/media/pic.png").await;
        let id = data.id().clone();
        harness.storage.process_raw(&harness.main(), data, &harness.ctx);

        let (seen, callback) = recorder();
        harness
            .storage
            .act_with_handler(&harness.main(), &id, CapabilityClass::General, callback);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_mesh_callback_retries_with_error_handler() {
        let harness = Harness::new();
        let data = local_png(&harness, "/srv/media/retry.png").await;
        let id = data.id().clone();
        harness.storage.process_raw(&harness.main(), data, &harness.ctx);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        harness.storage.act_with_handler(
            &harness.main(),
            &id,
            CapabilityClass::Mesh,
            move |handler: &SwapperHandler| {
                sink.lock().push(handler.id().clone());
                if handler.kind_name() == "material" {
                    Err("texture upload failed".into())
                } else {
                    Ok(())
                }
            },
        );

        assert_eq!(seen.lock().as_slice(), [id, Placeholder::Error.id()]);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_after_drain() {
        let harness = Harness::new();
        let data = local_png(&harness, "/srv/media/wait.png").await;
        let id = data.id().clone();

        harness.storage.store_raw(data);
        let wait = harness.storage.wait_for(&id);
        assert!(matches!(wait, HandlerWait::Pending { .. }));

        harness.settle().await;
        let handler = wait.resolve().await;
        assert_eq!(handler.kind_name(), "material");
    }

    #[tokio::test]
    async fn test_posted_actions_run_in_order() {
        let harness = Harness::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            harness.storage.post(Box::new(move |_main, _storage| {
                order.lock().push(i);
                Ok(())
            }));
        }
        harness
            .storage
            .post(Box::new(|_main, _storage| Err("ignored".into())));

        let report = harness.storage.drain(&harness.main(), &harness.ctx);
        assert_eq!(report.actions_run, 4);
        assert_eq!(order.lock().as_slice(), [0, 1, 2]);
    }

    #[tokio::test]
    async fn test_drain_takes_newest_raw_first() {
        let metrics = Arc::new(Metrics::new());
        let harness = Harness::new();
        let storage = MediaStorage::new(1, metrics);

        storage.store_raw(local_png(&harness, "/srv/media/first.png").await);
        storage.store_raw(local_png(&harness, "/srv/media/second.png").await);

        storage.drain(&harness.main(), &harness.ctx);
        let second = Identifier::parse("local:second").unwrap();
        let first = Identifier::parse("local:first").unwrap();
        assert!(storage.handler(&second).is_some());
        assert!(storage.handler(&first).is_none());
        assert_eq!(storage.state(&first), Some(ProcessingState::Loaded));
    }

    #[tokio::test]
    async fn test_ids_named_matches_path_across_namespaces() {
        let harness = Harness::new();
        let registry = harness.ctx.registry().clone();
        for source in [
            "https://a.example.com/cat.png",
            "https://b.example.com/cat.gif",
            "/srv/media/cat.webp",
            "https://a.example.com/category.png",
        ] {
            harness.storage.register_query(source, &registry);
        }

        // unpublished until the next drain
        assert!(harness.storage.ids_named("cat").is_empty());
        harness.storage.drain(&harness.main(), &harness.ctx);

        let named: Vec<String> = harness
            .storage
            .ids_named("cat")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(named, ["a.example.com:cat", "b.example.com:cat", "local:cat"]);
        assert!(harness.storage.ids_named("Cat").is_empty());
        assert!(harness.storage.ids_named("a.example.com").is_empty());
    }

    #[tokio::test]
    async fn test_eligible_skips_placeholders_and_other_kinds() {
        let harness = Harness::new();
        let registry = harness.ctx.registry().clone();
        harness.storage.register_query("https://x.com/a.png", &registry);
        harness.storage.register_query("https://x.com/b.mp3", &registry);
        harness.storage.drain(&harness.main(), &harness.ctx);

        let mesh = harness
            .storage
            .eligible(CapabilityClass::Mesh.media_kinds(), |_| true);
        assert_eq!(mesh, vec![Identifier::parse("x.com:a").unwrap()]);

        let none = harness
            .storage
            .eligible(CapabilityClass::General.media_kinds(), |id| id.path() != "b");
        assert!(none.is_empty());
    }
}
