//! The five pipeline phases and the runner that sequences them with
//! per-phase caching.

pub mod analyze;
pub mod assemble;
pub mod consolidate;
pub mod discover;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::Error;
use crate::pipeline::cache::{fingerprint, PhaseCache};
use crate::pipeline::graph::ComponentGraph;
use crate::pipeline::invoker::AiInvoker;

/// Everything a phase run needs beyond its own declared inputs: where to
/// cache, which model/timeout applies, and how much fan-out concurrency the
/// session pool currently allows.
#[derive(Clone)]
pub struct PhaseContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub invoker: Arc<dyn AiInvoker>,
    /// Bounds concurrent fan-out within analyze/write to the pool's
    /// `maxSessions`, mirroring the pool's own admission limit without
    /// routing every AI call through the pool itself (phase fan-out owns its
    /// sessions directly; see DESIGN.md).
    pub fan_out_limit: Arc<Semaphore>,
}

impl PhaseContext {
    pub fn new(config: Config, data_dir: PathBuf, invoker: Arc<dyn AiInvoker>) -> Self {
        let fan_out_limit = Arc::new(Semaphore::new(config.pool.max_sessions.max(1)));
        Self {
            config,
            data_dir,
            invoker,
            fan_out_limit,
        }
    }

    fn cache(&self, phase: &str) -> PhaseCache {
        PhaseCache::new(&self.data_dir, phase)
    }
}

/// Cache-probe-then-run for a phase whose artifact is exactly `T`. `force`
/// bypasses the load but still writes the fresh result; the result is
/// re-deserialized from the cache store path so a load-from-cache and a
/// freshly-computed run always observe the identical typed value.
pub async fn cached_run<T, F, Fut>(
    ctx: &PhaseContext,
    phase: &str,
    inputs: &impl Serialize,
    force: bool,
    compute: F,
) -> Result<T, Error>
where
    T: Serialize + serde::de::DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let cache = ctx.cache(phase);
    let key = fingerprint(inputs)?;

    if !force {
        if let Some(cached) = cache.load(&key).await {
            if let Ok(value) = serde_json::from_value(cached) {
                return Ok(value);
            }
        }
    }

    let artifact = compute().await?;
    let serialized = serde_json::to_value(&artifact)
        .map_err(|e| Error::Internal(format!("failed to serialize phase artifact: {e}")))?;
    cache.store(&key, &serialized).await?;
    Ok(artifact)
}

/// Fingerprint inputs for the discover phase: the scan root and a sorted map
/// of relative-path → content digest.
#[derive(Serialize)]
pub struct DiscoverInputs<'a> {
    pub root: &'a str,
    pub file_digests: &'a std::collections::BTreeMap<String, String>,
}

#[derive(Serialize)]
pub struct ConsolidateInputs<'a> {
    pub graph: &'a ComponentGraph,
    pub model: &'a str,
    pub skip_ai: bool,
}

/// Governs whether a phase run consults and/or writes its cache. Mirrors the
/// `--force` flag and `useCache=only` contract: `Force` bypasses the lookup
/// but still writes; `Only` forbids running on a miss at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Normal,
    Force,
    Only,
}

/// Full pipeline output: the final component graph and the assembled output
/// tree.
pub struct PipelineOutput {
    pub graph: ComponentGraph,
    pub tree: assemble::OutputTree,
}

/// Sequences discover → consolidate → analyze → write → assemble for one
/// project root, threading each phase's cache and the shared fan-out limit.
pub struct PipelineRunner {
    ctx: PhaseContext,
}

impl PipelineRunner {
    pub fn new(ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        project: &str,
        root: &str,
        mode: CacheMode,
    ) -> Result<PipelineOutput, Error> {
        let root_path = PathBuf::from(root);
        let digests = discover::file_digests(&root_path)?;

        let discover_inputs = DiscoverInputs {
            root,
            file_digests: &digests,
        };
        let force = mode == CacheMode::Force;
        let project_owned = project.to_string();
        let root_owned = root.to_string();
        let digests_for_compute = digests.clone();
        let discovered: ComponentGraph = self
            .run_cacheable("discover", &discover_inputs, mode, force, || async move {
                Ok(discover::run(&project_owned, &root_owned, &digests_for_compute))
            })
            .await?;

        let model = self.ctx.config.phase_model("consolidate");
        let skip_ai = self.ctx.config.phase_skip_ai("consolidate");
        let consolidate_inputs = ConsolidateInputs {
            graph: &discovered,
            model: &model,
            skip_ai,
        };
        let invoker = self.ctx.invoker.clone();
        let discovered_for_compute = discovered.clone();
        let model_for_compute = model.clone();
        let consolidated: ComponentGraph = self
            .run_cacheable("consolidate", &consolidate_inputs, mode, force, || async move {
                consolidate::run(discovered_for_compute, &model_for_compute, skip_ai, invoker.as_ref())
                    .await
            })
            .await?;

        let analyze_model = self.ctx.config.phase_model("analyze");
        let analyze_timeout = self.ctx.config.phase_timeout_ms("analyze", 120_000);
        let analyzed = analyze::run(
            consolidated,
            &analyze_model,
            Some(analyze_timeout),
            self.ctx.invoker.clone(),
            self.ctx.fan_out_limit.clone(),
            self.ctx.cache("analyze"),
            mode,
        )
        .await;

        let write_model = self.ctx.config.phase_model("write");
        let articles = write::run(
            &analyzed,
            &write_model,
            self.ctx.invoker.clone(),
            self.ctx.fan_out_limit.clone(),
            self.ctx.cache("write"),
            mode,
        )
        .await;

        let tree = assemble::run(&analyzed, &articles);
        Ok(PipelineOutput {
            graph: analyzed,
            tree,
        })
    }

    async fn run_cacheable<T, F, Fut>(
        &self,
        phase: &str,
        inputs: &impl Serialize,
        mode: CacheMode,
        force: bool,
        compute: F,
    ) -> Result<T, Error>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        if mode == CacheMode::Only {
            let cache = self.ctx.cache(phase);
            let key = fingerprint(inputs)?;
            return match cache.load(&key).await {
                Some(value) => serde_json::from_value(value).map_err(|e| {
                    Error::Internal(format!("cached {phase} artifact did not deserialize: {e}"))
                }),
                None => Err(Error::Conflict(format!(
                    "useCache=only: no cached artifact for phase {phase}"
                ))),
            };
        }
        cached_run(&self.ctx, phase, inputs, force, compute).await
    }
}
