//! The assembled ingestion pipeline
//!
//! ## Key Components
//!
//! - [`Pipeline`] - Owns storage, cache, fetcher, selection and the decode
//!   context; cheap to clone
//! - [`QueryReport`] - Outcome of one executed query
//!
//! Queries register their sources, fetch them behind concurrency groups and
//! hand the raw data to storage. Handlers are built on the designated thread
//! during [`Pipeline::drain`].

use bon::bon;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::cache::{CacheError, MediaCache};
use crate::concurrency::{ConcurrencyGroups, SemaphoreGroup};
use crate::config::Config;
use crate::fetch::{FetchError, FetchSettings, Fetcher, HttpClient, HttpConfig};
use crate::formats::{DecodeContext, DecodeSettings, FormatRegistry};
use crate::handler::{CapabilityClass, SwapperHandler};
use crate::identifier::{Identifier, Placeholder};
use crate::media::{
    ContainerProbe, DisabledTranscoder, FfmpegTranscoder, FfprobeProbe, Inference, RawMediaData,
    Transcoder,
};
use crate::mirror::FullMediaData;
use crate::observability::Metrics;
use crate::query::{ContentFilter, MediaQuery, QueryKind};
use crate::selection::SelectionPool;
use crate::storage::{AnyError, DrainReport, HandlerWait, MediaStorage, DEFAULT_DRAIN_BATCH};
use crate::thread::{DesignatedThread, MainThread, ThreadError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheError),

    #[error("http client setup failed: {0}")]
    Http(#[from] FetchError),

    #[error("no tokio runtime available")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome of one executed query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryReport {
    /// Sources newly registered by this query
    pub registered: usize,
    /// Sources skipped because their identifier was already known
    pub skipped: usize,
    /// Loads that ended in error data
    pub failed: usize,
    /// Loads held back from the cache by the content filter
    pub censored: usize,
}

struct Inner {
    ctx: DecodeContext,
    fetcher: Fetcher,
    filter: ContentFilter,
    selection: SelectionPool,
    designated: DesignatedThread,
    spawn_delay: Duration,
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

#[bon]
impl Pipeline {
    /// Assemble a pipeline. Without a cache directory the cache lives in
    /// memory; without a runtime the current one is used.
    #[builder]
    pub fn new(
        registry: Option<FormatRegistry>,
        cache_dir: Option<PathBuf>,
        container_probe: Option<Arc<dyn ContainerProbe>>,
        transcoder: Option<Arc<dyn Transcoder>>,
        #[builder(default)] http: HttpConfig,
        #[builder(default)] fetch: FetchSettings,
        #[builder(default)] decode: DecodeSettings,
        #[builder(default)] filter: ContentFilter,
        #[builder(default = true)] prioritize_new: bool,
        #[builder(default = DEFAULT_DRAIN_BATCH)] drain_batch: usize,
        #[builder(default = Duration::from_millis(300))] spawn_delay: Duration,
        runtime: Option<Handle>,
    ) -> Result<Self> {
        let runtime = match runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| PipelineError::NoRuntime)?,
        };

        let registry = Arc::new(registry.unwrap_or_else(FormatRegistry::with_defaults));
        let cache = match cache_dir {
            Some(dir) => MediaCache::local(dir, registry.clone())?,
            None => MediaCache::in_memory(registry.clone()),
        };
        let cache = Arc::new(cache);

        let container_probe =
            container_probe.unwrap_or_else(|| Arc::new(FfprobeProbe::new("ffprobe")));
        let transcoder = transcoder.unwrap_or_else(|| Arc::new(DisabledTranscoder));
        let inference = Arc::new(Inference::new(registry, container_probe));
        let metrics = Arc::new(Metrics::new());
        let storage = Arc::new(MediaStorage::new(drain_batch, metrics.clone()));

        let fetcher = Fetcher::new(
            HttpClient::new(&http)?,
            cache.clone(),
            inference.clone(),
            metrics.clone(),
            fetch,
        );

        let ctx = DecodeContext {
            groups: Arc::new(ConcurrencyGroups::new(runtime)),
            cache,
            inference,
            transcoder,
            storage,
            settings: Arc::new(decode),
            metrics,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                fetcher,
                filter,
                selection: SelectionPool::new(prioritize_new),
                designated: DesignatedThread::new(),
                spawn_delay,
            }),
        })
    }
}

impl Pipeline {
    /// Build from loaded configuration on the current runtime
    pub fn from_config(config: &Config) -> Result<Self> {
        let transcoder: Arc<dyn Transcoder> = if config.transcode.allow_transcoding {
            Arc::new(FfmpegTranscoder::new(
                &config.transcode.ffmpeg_path,
                config.cache.base_dir.join("transcode"),
            ))
        } else {
            Arc::new(DisabledTranscoder)
        };

        Self::builder()
            .cache_dir(config.cache.base_dir.clone())
            .container_probe(Arc::new(FfprobeProbe::new(&config.transcode.ffprobe_path)))
            .transcoder(transcoder)
            .http(HttpConfig {
                connect_timeout: config.fetch.connect_timeout(),
                user_agent: config.fetch.user_agent.clone(),
            })
            .fetch(FetchSettings {
                timeout: config.fetch.timeout(),
                retry_delay: config.fetch.retry_delay(),
            })
            .decode(config.transcode.decode_settings())
            .filter(config.content_filter())
            .prioritize_new(config.selection.prioritize_new)
            .drain_batch(config.runtime.drain_batch)
            .spawn_delay(config.fetch.spawn_delay())
            .build()
    }

    /// Designate the calling thread. The first claimant wins.
    pub fn claim_main_thread(&self) -> std::result::Result<MainThread, ThreadError> {
        self.inner.designated.claim()
    }

    pub fn context(&self) -> &DecodeContext {
        &self.inner.ctx
    }

    pub fn storage(&self) -> &Arc<MediaStorage> {
        &self.inner.ctx.storage
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        self.inner.ctx.registry()
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.inner.ctx.cache
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.ctx.metrics
    }

    pub fn filter(&self) -> &ContentFilter {
        &self.inner.filter
    }

    pub fn selection(&self) -> &SelectionPool {
        &self.inner.selection
    }

    fn groups(&self) -> &ConcurrencyGroups {
        &self.inner.ctx.groups
    }

    pub fn register_query(&self, source: &str) -> Option<Identifier> {
        self.storage().register_query(source, self.registry())
    }

    /// Hand loaded data to storage: built right away on the designated
    /// thread, queued for the next drain anywhere else
    pub fn store_raw(&self, data: RawMediaData) {
        if self.inner.designated.is_designated() {
            if let Ok(main) = self.inner.designated.claim() {
                self.storage().process_raw(&main, data, &self.inner.ctx);
                return;
            }
        }
        self.storage().store_raw(data);
    }

    pub fn drain(&self, main: &MainThread) -> DrainReport {
        self.storage().drain(main, &self.inner.ctx)
    }

    pub fn act_with_handler<F>(
        &self,
        main: &MainThread,
        id: &Identifier,
        class: CapabilityClass,
        on_ready: F,
    ) where
        F: FnMut(&SwapperHandler) -> std::result::Result<(), AnyError> + Send + 'static,
    {
        self.storage().act_with_handler(main, id, class, on_ready);
    }

    pub fn wait_for(&self, id: &Identifier) -> HandlerWait {
        self.storage().wait_for(id)
    }

    pub fn pick(&self, class: CapabilityClass, seed: Option<u64>) -> Option<Identifier> {
        self.inner.selection.pick(self.storage(), class, seed)
    }

    /// Pick a ready identifier and apply its handler, honouring the content
    /// filter
    pub fn pick_and_act<F>(
        &self,
        main: &MainThread,
        class: CapabilityClass,
        seed: Option<u64>,
        on_ready: F,
    ) -> Option<Identifier>
    where
        F: FnMut(&SwapperHandler) -> std::result::Result<(), AnyError> + Send + 'static,
    {
        self.inner.selection.pick_and_act(
            main,
            self.storage(),
            &self.inner.filter,
            class,
            seed,
            on_ready,
        )
    }

    pub fn full_data(&self, id: &Identifier) -> FullMediaData {
        self.storage().full_data(id)
    }

    /// Run a query in the background. The handle resolves once every load
    /// the query spawned has reached storage.
    pub fn execute(&self, query: MediaQuery) -> JoinHandle<QueryReport> {
        let pipeline = self.clone();
        self.groups().runtime().spawn(async move {
            match query.kind() {
                QueryKind::Local => pipeline.execute_local(query).await,
                QueryKind::Remote => pipeline.execute_remote(query).await,
            }
        })
    }

    async fn execute_local(&self, query: MediaQuery) -> QueryReport {
        let mut report = QueryReport::default();
        let files = query.gather_files(self.registry()).await;
        let group = SemaphoreGroup::for_query(QueryKind::Local);

        let mut loads = Vec::with_capacity(files.len());
        for file in files {
            let source = file.to_string_lossy().into_owned();
            let Some(id) = self.register_query(&source) else {
                report.skipped += 1;
                continue;
            };
            report.registered += 1;

            let pipeline = self.clone();
            let result = query.result_for(&source);
            loads.push(self.groups().run(&group, async move {
                let data = pipeline
                    .inner
                    .fetcher
                    .fetch_for(&id, &source, None, result)
                    .await;
                pipeline.admit(data)
            }));
        }

        collect(loads, &mut report).await;
        tracing::info!(
            registered = report.registered,
            skipped = report.skipped,
            failed = report.failed,
            "Local query finished"
        );
        report
    }

    async fn execute_remote(&self, query: MediaQuery) -> QueryReport {
        let mut report = QueryReport::default();
        let group = SemaphoreGroup::for_query(QueryKind::Remote);

        let mut sources = Vec::new();
        for url in query.remote_urls() {
            match self.register_query(&url) {
                Some(id) => sources.push((id, url)),
                None => report.skipped += 1,
            }
        }
        report.registered = sources.len();

        let mut loads = Vec::with_capacity(sources.len());
        for (index, (id, url)) in sources.into_iter().enumerate() {
            if index > 0 && !self.inner.spawn_delay.is_zero() {
                tokio::time::sleep(self.inner.spawn_delay).await;
            }

            let pipeline = self.clone();
            let result = query.result_for(&url);
            let host = SemaphoreGroup::for_host(&id);
            loads.push(self.groups().run(&group, async move {
                let fetcher = pipeline.clone();
                let fetched = pipeline.groups().run(&host, async move {
                    fetcher.inner.fetcher.fetch_for(&id, &url, None, result).await
                });
                match fetched.await {
                    Ok(data) => pipeline.admit(data),
                    Err(e) => {
                        tracing::error!(error = %e, "Fetch task failed");
                        Admitted::Failed
                    }
                }
            }));
        }

        collect(loads, &mut report).await;
        tracing::info!(
            registered = report.registered,
            skipped = report.skipped,
            failed = report.failed,
            censored = report.censored,
            "Remote query finished"
        );
        report
    }

    /// Apply the content filter and pass loaded data on to storage
    fn admit(&self, mut data: RawMediaData) -> Admitted {
        let outcome = if data.is_error() {
            Admitted::Failed
        } else if self.inner.filter.is_censored(data.query_result()) {
            data.mark_non_cacheable();
            Admitted::Censored
        } else {
            Admitted::Loaded
        };

        self.store_raw(data);
        outcome
    }

    /// Materialize a mirrored identifier unless it is already known.
    ///
    /// Error-flagged triples resolve to the error handler; a failing fetch
    /// resolves to the missing placeholder.
    pub fn load_if_not_found(&self, full: FullMediaData) -> Option<JoinHandle<()>> {
        let FullMediaData { id, info, result } = full;
        let kind = self.registry().resolve_by_name(&info.format).kind();

        if !self.storage().register(id.clone(), kind) {
            tracing::debug!(id = %id, "Mirrored identifier already known");
            return None;
        }

        if info.is_error {
            self.store_raw(RawMediaData::error(id, info.url, result));
            return None;
        }

        let pipeline = self.clone();
        let host = SemaphoreGroup::for_host(&id);
        Some(self.groups().run(&host, async move {
            let data = pipeline
                .inner
                .fetcher
                .fetch_for(&id, &info.url, Some(&info), result)
                .await;

            if data.is_error() {
                tracing::warn!(id = %id, url = %info.url, "Mirrored media unavailable");
                pipeline.storage().post(Box::new(move |main, storage| {
                    storage.bind_placeholder(main, &id, Placeholder::Missing);
                    Ok(())
                }));
            } else {
                pipeline.admit(data);
            }
        }))
    }

    /// Load the placeholder images found in `dir`, replacing the empty
    /// placeholder handlers
    pub fn load_placeholders(&self, dir: &Path) -> JoinHandle<QueryReport> {
        let files = Placeholder::ALL
            .iter()
            .map(|p| dir.join(format!("{}.png", p.file_stem())))
            .collect();

        self.execute(MediaQuery::Local {
            directory: None,
            files,
            rating: Default::default(),
            tags: Vec::new(),
        })
    }

    /// Delete cache entries untouched for `max_age_days`
    pub async fn prune_cache(&self, max_age_days: u32) -> std::result::Result<usize, CacheError> {
        self.cache()
            .prune_older_than(chrono::Duration::days(i64::from(max_age_days)))
            .await
    }

    /// Nothing queued, in flight or waiting
    pub fn is_idle(&self) -> bool {
        !self.storage().has_pending_work() && self.storage().in_flight() == 0
    }
}

enum Admitted {
    Loaded,
    Censored,
    Failed,
}

async fn collect(loads: Vec<JoinHandle<Admitted>>, report: &mut QueryReport) {
    for load in loads {
        match load.await {
            Ok(Admitted::Loaded) => {}
            Ok(Admitted::Censored) => report.censored += 1,
            Ok(Admitted::Failed) => report.failed += 1,
            Err(e) => {
                tracing::error!(error = %e, "Load task failed");
                report.failed += 1;
            }
        }
    }
}
