use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{ConfigError, ProvisionConfig, UpstreamConfig};
use crate::model::{same_natural_key, EntityKey, EntityKind, UpstreamSnapshot};
use crate::store::traits::SnapshotStore;
use crate::upstream::{ListQuery, UpstreamApi, UpstreamEntity, UpstreamError};

/// Paging limits for lookups and snapshot refreshes
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub page_size: u32,
    /// Upper bound on pages walked by a natural-key lookup
    pub max_scan_pages: u32,
    /// Upper bound on pages pulled per kind by a snapshot refresh
    pub max_refresh_pages: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_scan_pages: 20,
            max_refresh_pages: 1000,
        }
    }
}

impl From<&UpstreamConfig> for SyncOptions {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            max_scan_pages: config.max_scan_pages.max(1),
            max_refresh_pages: config.max_refresh_pages.max(1),
        }
    }
}

/// Coarse cancellation, checked before each stage starts
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One ordered step: make sure an entity named `name` exists upstream
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub kind: EntityKind,
    pub name: String,
    /// Extra fields sent when the entity has to be created
    pub attributes: Map<String, Value>,
    /// Kinds whose resolved upstream id is injected into the create payload
    pub depends_on: Vec<EntityKind>,
}

impl Stage {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn depends_on(mut self, kind: EntityKind) -> Self {
        self.depends_on.push(kind);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub upstream_id: i64,
    pub created: bool,
    pub entity: UpstreamEntity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub index: usize,
    pub kind: EntityKind,
    pub name: String,
    pub upstream_id: i64,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub upstream_version: String,
    pub stages: Vec<StageOutcome>,
}

impl SyncReport {
    pub fn created_count(&self) -> usize {
        self.stages.iter().filter(|s| s.created).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("requires a {0} resolved by an earlier stage")]
    MissingDependency(EntityKind),
    #[error("failed to record snapshot: {0}")]
    Snapshot(String),
    /// The lookup hit its page limit, so absence could not be proven
    #[error("could not rule out an existing {kind} `{name}` within {pages} page(s); refusing to create a duplicate")]
    LookupIncomplete { kind: EntityKind, name: String, pages: u32 },
    #[error("upstream served page {page} of {kind} twice; paging is not honoured")]
    RepeatedPage { kind: EntityKind, page: u32 },
    #[error("{kind} has more than {pages} page(s)")]
    PageLimit { kind: EntityKind, pages: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Probe failed; no stage was executed
    #[error("upstream unreachable: {0}")]
    Connectivity(#[source] UpstreamError),
    /// A stage failed; earlier stages' results are kept
    #[error("stage {index} ({kind} `{name}`) failed: {source}")]
    Stage {
        index: usize,
        kind: EntityKind,
        name: String,
        #[source]
        source: StageError,
        completed: Vec<StageOutcome>,
    },
    #[error("sync cancelled after {} completed stage(s)", .completed.len())]
    Cancelled { completed: Vec<StageOutcome> },
}

/// Look an entity up by natural key, creating it upstream only when absent.
///
/// Nothing is created unless the lookup proved absence by reaching the end
/// of the result list, so re-running never duplicates an entity.
pub async fn upsert_by_natural_key<A: UpstreamApi + ?Sized>(
    api: &A,
    kind: EntityKind,
    name: &str,
    payload: &Map<String, Value>,
    options: &SyncOptions,
) -> Result<UpsertOutcome, StageError> {
    if let Some(entity) = find_by_natural_key(api, kind, name, options).await? {
        log::debug!("{} `{}` resolved to upstream id {}", kind, name, entity.id);
        return Ok(UpsertOutcome {
            upstream_id: entity.id,
            created: false,
            entity,
        });
    }

    let mut body = payload.clone();
    body.insert(kind.natural_key().to_string(), Value::String(name.to_string()));

    let entity = api.create(kind, &body).await?;
    log::info!("Created {} `{}` upstream with id {}", kind, name, entity.id);
    Ok(UpsertOutcome {
        upstream_id: entity.id,
        created: true,
        entity,
    })
}

/// How a paged walk over list results ended
enum PageWalk {
    Found(UpstreamEntity),
    /// A short page was reached without a match
    Exhausted,
    /// The page limit was hit, or upstream served the same page twice
    Truncated,
}

async fn walk_pages<A, F>(
    api: &A,
    kind: EntityKind,
    term: Option<&str>,
    options: &SyncOptions,
    matches: F,
) -> Result<PageWalk, UpstreamError>
where
    A: UpstreamApi + ?Sized,
    F: Fn(&UpstreamEntity) -> bool,
{
    let mut previous: Option<Vec<i64>> = None;

    for page in 1..=options.max_scan_pages.max(1) {
        let query = match term {
            Some(term) => ListQuery {
                page,
                ..ListQuery::term(term, options.page_size)
            },
            None => ListQuery::page(page, options.page_size),
        };
        let entries = api.list(kind, &query).await?;

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        if !ids.is_empty() && previous.as_ref() == Some(&ids) {
            log::warn!("Upstream repeated page {} of {}", page, kind.collection());
            return Ok(PageWalk::Truncated);
        }

        let short_page = entries.len() < options.page_size as usize;
        if let Some(entity) = entries.into_iter().find(|e| matches(e)) {
            return Ok(PageWalk::Found(entity));
        }
        if short_page {
            return Ok(PageWalk::Exhausted);
        }
        previous = Some(ids);
    }

    Ok(PageWalk::Truncated)
}

/// Case-insensitive exact match on the natural key.
///
/// Walks the term-filtered results page by page; an upstream that rejects the
/// term gets the same walk over unfiltered pages. `Ok(None)` is returned only
/// once a short page proves the entity is absent.
pub async fn find_by_natural_key<A: UpstreamApi + ?Sized>(
    api: &A,
    kind: EntityKind,
    name: &str,
    options: &SyncOptions,
) -> Result<Option<UpstreamEntity>, StageError> {
    let matches = |entity: &UpstreamEntity| {
        entity
            .natural_key(kind)
            .is_some_and(|key| same_natural_key(key, name))
    };

    let walk = match walk_pages(api, kind, Some(name), options, matches).await {
        Ok(walk) => walk,
        Err(UpstreamError::Status { status, .. }) => {
            log::warn!("Term lookup for {} returned HTTP {}; scanning pages instead", kind, status);
            walk_pages(api, kind, None, options, matches).await?
        }
        Err(e) => return Err(e.into()),
    };

    match walk {
        PageWalk::Found(entity) => Ok(Some(entity)),
        PageWalk::Exhausted => Ok(None),
        PageWalk::Truncated => Err(StageError::LookupIncomplete {
            kind,
            name: name.to_string(),
            pages: options.max_scan_pages.max(1),
        }),
    }
}

fn snapshot_of(kind: EntityKind, entity: &UpstreamEntity) -> UpstreamSnapshot {
    UpstreamSnapshot::new(EntityKey::new(kind, entity.id.to_string()), entity.fields.clone())
}

/// Runs stages one after another against a single upstream
pub struct SyncPipeline<'a, A: UpstreamApi + ?Sized, S: SnapshotStore + ?Sized> {
    api: &'a A,
    store: &'a S,
    stages: Vec<Stage>,
    options: SyncOptions,
}

impl<'a, A: UpstreamApi + ?Sized, S: SnapshotStore + ?Sized> SyncPipeline<'a, A, S> {
    pub fn new(api: &'a A, store: &'a S, options: SyncOptions) -> Self {
        Self {
            api,
            store,
            stages: Vec::new(),
            options,
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Probe upstream, then execute every stage strictly in order.
    ///
    /// Stops at the first failure without rolling back earlier stages.
    pub async fn run(&self, cancel: &CancelFlag) -> Result<SyncReport, SyncError> {
        let version = self.api.probe().await.map_err(SyncError::Connectivity)?;
        log::info!("Upstream reachable (version {})", version.version);

        let mut resolved: HashMap<EntityKind, i64> = HashMap::new();
        let mut completed: Vec<StageOutcome> = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!("Sync cancelled before stage {} ({})", index, stage.kind);
                return Err(SyncError::Cancelled { completed });
            }

            log::info!("Stage {}: {} `{}`", index, stage.kind, stage.name);
            match self.run_stage(stage, &resolved).await {
                Ok(outcome) => {
                    resolved.insert(stage.kind, outcome.upstream_id);
                    completed.push(StageOutcome {
                        index,
                        kind: stage.kind,
                        name: stage.name.clone(),
                        upstream_id: outcome.upstream_id,
                        created: outcome.created,
                    });
                }
                Err(source) => {
                    log::error!("Stage {} ({} `{}`) failed: {}", index, stage.kind, stage.name, source);
                    return Err(SyncError::Stage {
                        index,
                        kind: stage.kind,
                        name: stage.name.clone(),
                        source,
                        completed,
                    });
                }
            }
        }

        Ok(SyncReport {
            upstream_version: version.version,
            stages: completed,
        })
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        resolved: &HashMap<EntityKind, i64>,
    ) -> Result<UpsertOutcome, StageError> {
        let mut payload = stage.attributes.clone();
        for dependency in &stage.depends_on {
            let id = resolved
                .get(dependency)
                .ok_or(StageError::MissingDependency(*dependency))?;
            payload.insert(dependency.as_str().to_string(), Value::from(*id));
        }

        let outcome =
            upsert_by_natural_key(self.api, stage.kind, &stage.name, &payload, &self.options).await?;

        self.store
            .replace_snapshot(snapshot_of(stage.kind, &outcome.entity))
            .await
            .map_err(|e| StageError::Snapshot(e.to_string()))?;

        Ok(outcome)
    }
}

/// Customer -> project -> activity, plus an optional tag, from configured names
pub fn provision_plan(config: &ProvisionConfig) -> Result<Vec<Stage>, ConfigError> {
    let customer = ProvisionConfig::require(&config.customer_name, "provision.customer_name")?;
    let project = ProvisionConfig::require(&config.project_name, "provision.project_name")?;
    let activity = ProvisionConfig::require(&config.activity_name, "provision.activity_name")?;

    let mut stages = vec![
        Stage::new(EntityKind::Customer, customer).with_attribute("visible", Value::Bool(true)),
        Stage::new(EntityKind::Project, project)
            .with_attribute("visible", Value::Bool(true))
            .depends_on(EntityKind::Customer),
        Stage::new(EntityKind::Activity, activity)
            .with_attribute("visible", Value::Bool(true))
            .depends_on(EntityKind::Project),
    ];

    if let Some(tag) = config.tag_name.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        stages.push(Stage::new(EntityKind::Tag, tag));
    }

    Ok(stages)
}

/// Pull every page of each kind and replace the stored snapshots.
///
/// Returns the number of snapshots written per kind.
pub async fn refresh_snapshots<A: UpstreamApi + ?Sized, S: SnapshotStore + ?Sized>(
    api: &A,
    store: &S,
    kinds: &[EntityKind],
    options: &SyncOptions,
    cancel: &CancelFlag,
) -> Result<Vec<(EntityKind, usize)>, SyncError> {
    api.probe().await.map_err(SyncError::Connectivity)?;

    let mut counts = Vec::new();
    let mut completed = Vec::new();

    for (index, kind) in kinds.iter().copied().enumerate() {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled { completed });
        }

        let written = refresh_kind(api, store, kind, options)
            .await
            .map_err(|source| SyncError::Stage {
                index,
                kind,
                name: "refresh".to_string(),
                source,
                completed: completed.clone(),
            })?;

        log::info!("Refreshed {} {} snapshot(s)", written, kind);
        counts.push((kind, written));
        completed.push(StageOutcome {
            index,
            kind,
            name: "refresh".to_string(),
            upstream_id: 0,
            created: false,
        });
    }

    Ok(counts)
}

async fn refresh_kind<A: UpstreamApi + ?Sized, S: SnapshotStore + ?Sized>(
    api: &A,
    store: &S,
    kind: EntityKind,
    options: &SyncOptions,
) -> Result<usize, StageError> {
    let mut written = 0;
    let mut previous: Option<Vec<i64>> = None;

    for page in 1..=options.max_refresh_pages.max(1) {
        let entries = api.list(kind, &ListQuery::page(page, options.page_size)).await?;

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        if !ids.is_empty() && previous.as_ref() == Some(&ids) {
            return Err(StageError::RepeatedPage { kind, page });
        }
        let short_page = entries.len() < options.page_size as usize;

        for entity in &entries {
            store
                .replace_snapshot(snapshot_of(kind, entity))
                .await
                .map_err(|e| StageError::Snapshot(e.to_string()))?;
            written += 1;
        }

        if short_page {
            return Ok(written);
        }
        previous = Some(ids);
    }

    Err(StageError::PageLimit {
        kind,
        pages: options.max_refresh_pages.max(1),
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::upstream::VersionInfo;
    use parking_lot::Mutex;

    /// In-process stand-in for the upstream service
    #[derive(Default)]
    pub struct FakeUpstream {
        pub entities: Mutex<HashMap<EntityKind, Vec<UpstreamEntity>>>,
        pub create_calls: Mutex<Vec<(EntityKind, Map<String, Value>)>>,
        pub next_id: Mutex<i64>,
        pub unreachable: bool,
        /// Behave like upstreams whose `term` parameter is ignored
        pub ignores_term: bool,
        pub rejects_term: bool,
        /// Serve the first page for every `page` value
        pub ignores_paging: bool,
        pub fail_creates_for: Option<EntityKind>,
    }

    impl FakeUpstream {
        pub fn with_entity(self, kind: EntityKind, id: i64, fields: Value) -> Self {
            let entity = UpstreamEntity {
                id,
                fields: fields.as_object().cloned().unwrap_or_default(),
            };
            self.entities.lock().entry(kind).or_default().push(entity);
            {
                let mut next = self.next_id.lock();
                *next = (*next).max(id);
            }
            self
        }

        pub fn count(&self, kind: EntityKind) -> usize {
            self.entities.lock().get(&kind).map(Vec::len).unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl UpstreamApi for FakeUpstream {
        async fn probe(&self) -> Result<VersionInfo, UpstreamError> {
            if self.unreachable {
                return Err(UpstreamError::Transport("connection refused".into()));
            }
            Ok(VersionInfo {
                version: "2.0.0".into(),
                name: None,
            })
        }

        async fn list(&self, kind: EntityKind, query: &ListQuery) -> Result<Vec<UpstreamEntity>, UpstreamError> {
            let all = self.entities.lock().get(&kind).cloned().unwrap_or_default();

            let filtered: Vec<UpstreamEntity> = match &query.term {
                Some(_) if self.rejects_term => {
                    return Err(UpstreamError::Status {
                        status: 400,
                        body: "unknown parameter term".into(),
                    })
                }
                Some(_) if self.ignores_term => all,
                Some(term) => all
                    .into_iter()
                    .filter(|e| {
                        e.natural_key(kind)
                            .is_some_and(|k| k.to_lowercase().contains(&term.to_lowercase()))
                    })
                    .collect(),
                None => all,
            };

            let size = query.size.max(1) as usize;
            let start = if self.ignores_paging {
                0
            } else {
                (query.page.max(1) as usize - 1) * size
            };
            Ok(filtered.into_iter().skip(start).take(size).collect())
        }

        async fn create(&self, kind: EntityKind, payload: &Map<String, Value>) -> Result<UpstreamEntity, UpstreamError> {
            if self.fail_creates_for == Some(kind) {
                return Err(UpstreamError::Status {
                    status: 422,
                    body: "validation failed".into(),
                });
            }

            self.create_calls.lock().push((kind, payload.clone()));
            let id = {
                let mut next = self.next_id.lock();
                *next += 1;
                *next
            };
            let entity = UpstreamEntity {
                id,
                fields: payload.clone(),
            };
            self.entities.lock().entry(kind).or_default().push(entity.clone());
            Ok(entity)
        }
    }
}
