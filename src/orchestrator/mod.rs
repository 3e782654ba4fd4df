//! Stack orchestration.
//!
//! The orchestrator sequences lifecycle engine invocations over every
//! resource declared in a stack file. Independent branches run concurrently
//! on a [`JoinSet`], bounded by `policy.max_parallel`; a resource starts only
//! once all of its dependencies have been applied, and inputs are resolved
//! against their outputs. Records that are no longer declared are removed
//! after a fully successful apply, dependents first.

mod report;

pub use report::{ApplyReport, OutcomeStatus, ResourceOutcome};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{
    ConfigHasher, ConfigValidator, DependencyGraph, Interpolator, ResourceConfig, StackConfig,
    StackSettings,
};
use crate::engine::{LifecycleEngine, ReconcileOptions, ReconcileOutcome};
use crate::error::{ConfigError, ProvisioError, ReconcileError, Result};
use crate::planner::{PlannedAction, StackPlan};
use crate::provider::{ProviderRegistry, ResourceProvider};
use crate::state::{PropertyMap, ResourceIdentity, StateRecord, StateStore};

/// Name of the input that receives the stack's default tags.
const TAGS_INPUT: &str = "tags";

/// Runs plans, applies and destroys for one stack.
pub struct Orchestrator {
    engine: LifecycleEngine,
    registry: Arc<ProviderRegistry>,
    settings: StackSettings,
    hasher: ConfigHasher,
}

/// Message sent back by a finished reconciliation task.
type Finished = (String, Result<ReconcileOutcome>, Duration);

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, registry: ProviderRegistry, settings: &StackSettings) -> Self {
        Self {
            engine: LifecycleEngine::new(store),
            registry: Arc::new(registry),
            settings: settings.clone(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Returns the provider registry.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        self.engine.store()
    }

    /// Validates a stack against the registered resource types.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self, config: &StackConfig) -> Result<DependencyGraph> {
        ConfigValidator::new()
            .with_resource_types(self.registry.type_names())
            .validate(config)?;
        Ok(DependencyGraph::from_config(config))
    }

    /// Computes what `apply` would do, without side effects.
    ///
    /// Inputs are resolved against the outputs currently recorded for each
    /// dependency. When a dependency has no record yet, the dependent is
    /// reported as pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is invalid or state cannot be read.
    pub async fn plan(&self, config: &StackConfig) -> Result<StackPlan> {
        let graph = self.validate(config)?;
        let order = graph.topological_order()?;
        let mut plan = StackPlan::new(config.qualified_name(), self.hasher.hash_stack(config));

        info!("Planning {} resources for {}", order.len(), plan.stack);

        let mut interpolator = Interpolator::new(self.settings.variables());
        for name in &order {
            let Some(resource) = config.resource(name) else {
                continue;
            };
            if let Some(record) = self.engine.store().load(&identity_of(resource)).await? {
                interpolator.add_outputs(name.clone(), record.outputs);
            }
        }

        for name in &order {
            let Some(resource) = config.resource(name) else {
                continue;
            };
            let identity = identity_of(resource);

            let desired = match self.desired_inputs(resource, &interpolator) {
                Ok(desired) => desired,
                Err(reference) => {
                    plan.push(identity, PlannedAction::Pending { reference });
                    continue;
                }
            };

            let provider = self.registry.require(&resource.type_name)?;
            let action = match self.engine.preview(&identity, &desired, provider.as_ref()).await {
                Ok(decision) => PlannedAction::Reconcile { decision },
                Err(err @ ProvisioError::Reconcile(_)) => PlannedAction::Invalid {
                    message: err.to_string(),
                },
                Err(err) => return Err(err),
            };
            debug!("{identity}: planned {}", action.label());
            plan.push(identity, action);
        }

        for record in self.orphans(config).await? {
            plan.push(
                record.identity.clone(),
                PlannedAction::Remove {
                    protected: record.protect,
                },
            );
        }

        info!("Plan for {}: {}", plan.stack, plan.summary());
        Ok(plan)
    }

    /// Applies a stack.
    ///
    /// Failures of individual resources are reported in the returned
    /// [`ApplyReport`]; dependents of a failed resource are skipped while
    /// independent branches complete. Committed siblings are never rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is invalid or state cannot be listed.
    pub async fn apply(&self, config: &StackConfig) -> Result<ApplyReport> {
        let started = Instant::now();
        let graph = self.validate(config)?;
        let order = graph.topological_order()?;
        let position: BTreeMap<&str, usize> =
            order.iter().enumerate().map(|(i, name)| (name.as_str(), i)).collect();

        let mut report = ApplyReport::new(config.qualified_name());
        info!(
            "Applying {} resources to {} (max {} in parallel)",
            order.len(),
            report.stack,
            self.settings.max_parallel
        );

        let mut waiting: BTreeMap<&str, usize> = order
            .iter()
            .map(|name| (name.as_str(), graph.dependencies(name).len()))
            .collect();
        let mut ready: BTreeSet<(usize, &str)> = waiting
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| (position[name], *name))
            .collect();
        let mut outputs: BTreeMap<String, PropertyMap> = BTreeMap::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut tasks: JoinSet<Finished> = JoinSet::new();

        loop {
            while tasks.len() < self.settings.max_parallel {
                let Some((_, name)) = ready.pop_first() else {
                    break;
                };
                let Some(resource) = config.resource(name) else {
                    continue;
                };
                let identity = identity_of(resource);

                let failed_dependency = graph
                    .dependencies(name)
                    .into_iter()
                    .find(|dep| failed.contains(*dep));
                let prepared: Result<Job> = match failed_dependency {
                    Some(dependency) => Err(ReconcileError::DependencyFailed {
                        identity: identity.clone(),
                        dependency: dependency.to_string(),
                    }
                    .into()),
                    None => self.prepare(config, &graph, resource, &outputs),
                };

                match prepared {
                    Ok(job) => {
                        self.spawn(&mut tasks, name.to_string(), identity, job);
                    }
                    Err(err) => {
                        log_failure(&identity, &err);
                        report
                            .outcomes
                            .push(ResourceOutcome::failed(identity, err, Duration::ZERO));
                        failed.insert(name.to_string());
                        release(&graph, name, &mut waiting, &mut ready, &position);
                    }
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (name, result, duration) =
                joined.map_err(|e| ProvisioError::internal(format!("reconcile task failed: {e}")))?;
            let Some(resource) = config.resource(&name) else {
                continue;
            };

            match result {
                Ok(outcome) => {
                    info!("{}: {} in {:?}", outcome.record.identity, outcome.decision, duration);
                    outputs.insert(name.clone(), outcome.record.outputs.clone());
                    report.outcomes.push(ResourceOutcome::applied(
                        outcome.record.identity,
                        outcome.decision,
                        outcome.record.provider_id,
                        duration,
                    ));
                }
                Err(err) => {
                    let identity = identity_of(resource);
                    log_failure(&identity, &err);
                    report.outcomes.push(ResourceOutcome::failed(identity, err, duration));
                    failed.insert(name.clone());
                }
            }
            release(&graph, &name, &mut waiting, &mut ready, &position);
        }

        report
            .outcomes
            .sort_by_key(|o| position.get(o.identity.name.as_str()).copied().unwrap_or(usize::MAX));

        if failed.is_empty() {
            let orphans = self.orphans(config).await?;
            self.remove_all(orphans, false, &mut report).await;
        } else {
            warn!(
                "{} resources failed; leaving undeclared records in place",
                failed.len()
            );
        }

        report.duration = started.elapsed();
        info!("Apply of {} finished: {report}", report.stack);
        Ok(report)
    }

    /// Destroys every recorded resource of the stack, dependents first.
    ///
    /// Protected records are refused unless `force` is set. A resource is
    /// kept when one of its dependents could not be destroyed.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be listed.
    pub async fn destroy(&self, stack: &str, force: bool) -> Result<ApplyReport> {
        let started = Instant::now();
        let records = self.engine.store().list().await?;
        info!("Destroying {} recorded resources of {stack}", records.len());

        let mut report = ApplyReport::new(stack);
        self.remove_all(records, force, &mut report).await;

        report.duration = started.elapsed();
        info!("Destroy of {stack} finished: {report}");
        Ok(report)
    }

    /// Resolves the inputs and options of a resource whose dependencies succeeded.
    fn prepare(
        &self,
        config: &StackConfig,
        graph: &DependencyGraph,
        resource: &ResourceConfig,
        outputs: &BTreeMap<String, PropertyMap>,
    ) -> Result<Job> {
        let provider = self.registry.require(&resource.type_name)?;
        let dependencies = graph.dependencies(&resource.name);

        let mut interpolator = Interpolator::new(self.settings.variables());
        for dep in &dependencies {
            if let Some(found) = outputs.get(*dep) {
                interpolator.add_outputs(*dep, found.clone());
            }
        }

        let desired = self.desired_inputs(resource, &interpolator).map_err(|reference| {
            ConfigError::validation(
                format!("Cannot resolve {reference} for resource '{}'", resource.name),
                format!("resources.{}.inputs", resource.name),
            )
        })?;

        let options = ReconcileOptions {
            protect: resource.protect,
            allow_replace: self.settings.allow_replace,
            dependencies: dependencies
                .iter()
                .filter_map(|dep| config.resource(dep))
                .map(identity_of)
                .collect(),
        };

        Ok(Job {
            provider,
            desired,
            options,
        })
    }

    fn spawn(&self, tasks: &mut JoinSet<Finished>, name: String, identity: ResourceIdentity, job: Job) {
        let engine = self.engine.clone();
        debug!("{identity}: scheduling");

        tasks.spawn(async move {
            let started = Instant::now();
            let task_identity = identity.clone();
            let handle = tokio::spawn(async move {
                engine
                    .reconcile(&task_identity, &job.desired, job.provider.as_ref(), &job.options)
                    .await
            });
            let result = handle.await.unwrap_or_else(|e| {
                Err(ProvisioError::internal(format!(
                    "reconciliation of {identity} aborted: {e}"
                )))
            });
            (name, result, started.elapsed())
        });
    }

    /// Applies default tags and resolves references.
    fn desired_inputs(
        &self,
        resource: &ResourceConfig,
        interpolator: &Interpolator,
    ) -> std::result::Result<PropertyMap, String> {
        let mut inputs = resource.inputs.clone();
        if let Some(serde_json::Value::Object(tags)) = inputs.get_mut(TAGS_INPUT) {
            for (key, value) in &self.settings.default_tags {
                tags.entry(key.clone())
                    .or_insert_with(|| serde_json::Value::String(value.clone()));
            }
        }
        interpolator
            .resolve_properties(&inputs)
            .map_err(|reference| reference.to_string())
    }

    /// Returns recorded resources that are no longer declared.
    async fn orphans(&self, config: &StackConfig) -> Result<Vec<StateRecord>> {
        let declared: BTreeSet<ResourceIdentity> = config.resources.iter().map(identity_of).collect();
        let orphans: Vec<StateRecord> = self
            .engine
            .store()
            .list()
            .await?
            .into_iter()
            .filter(|record| !declared.contains(&record.identity))
            .collect();
        if !orphans.is_empty() {
            debug!("{} recorded resources are no longer declared", orphans.len());
        }
        Ok(orphans)
    }

    /// Destroys records sequentially, dependents before their dependencies.
    async fn remove_all(&self, records: Vec<StateRecord>, force: bool, report: &mut ApplyReport) {
        let by_key: BTreeMap<String, StateRecord> = records
            .into_iter()
            .map(|record| (record.identity.to_string(), record))
            .collect();
        let graph = DependencyGraph::from_edges(by_key.iter().map(|(key, record)| {
            let deps: Vec<String> = record
                .dependencies
                .iter()
                .map(ToString::to_string)
                .filter(|dep| by_key.contains_key(dep))
                .collect();
            (key.clone(), deps)
        }));

        // Recorded dependencies cannot form a cycle unless the store was edited
        // by hand; fall back to key order then.
        let mut order = graph
            .topological_order()
            .unwrap_or_else(|_| by_key.keys().cloned().collect());
        order.reverse();

        let mut kept: BTreeSet<String> = BTreeSet::new();
        for key in order {
            let Some(record) = by_key.get(&key) else {
                continue;
            };
            let identity = record.identity.clone();
            let started = Instant::now();

            if let Some(dependent) = graph.dependents(&key).into_iter().find(|d| kept.contains(*d)) {
                let dependency = by_key
                    .get(dependent)
                    .map_or_else(|| dependent.to_string(), |r| r.identity.name.clone());
                let err = ReconcileError::DependencyFailed {
                    identity: identity.clone(),
                    dependency,
                };
                warn!("{err}");
                report.outcomes.push(ResourceOutcome::failed(identity, err, Duration::ZERO));
                kept.insert(key);
                continue;
            }

            let result = match self.registry.require(&identity.type_name) {
                Ok(provider) => self.engine.destroy(&identity, provider.as_ref(), force).await,
                Err(err) => Err(err.into()),
            };

            match result {
                Ok(removed) => {
                    info!("{identity}: removed");
                    report.outcomes.push(ResourceOutcome::removed(
                        identity,
                        removed.map(|r| r.provider_id),
                        started.elapsed(),
                    ));
                }
                Err(err) => {
                    log_failure(&identity, &err);
                    report
                        .outcomes
                        .push(ResourceOutcome::failed(identity, err, started.elapsed()));
                    kept.insert(key);
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.engine)
            .field("registry", &self.registry)
            .field("stack", &format!("{}-{}", self.settings.project, self.settings.stack))
            .finish_non_exhaustive()
    }
}

/// Everything a reconciliation task needs.
struct Job {
    provider: Arc<dyn ResourceProvider>,
    desired: PropertyMap,
    options: ReconcileOptions,
}

fn identity_of(resource: &ResourceConfig) -> ResourceIdentity {
    ResourceIdentity::new(&resource.type_name, &resource.name)
}

/// Marks `name` as finished and queues dependents whose dependencies are all done.
fn release<'a>(
    graph: &'a DependencyGraph,
    name: &str,
    waiting: &mut BTreeMap<&'a str, usize>,
    ready: &mut BTreeSet<(usize, &'a str)>,
    position: &BTreeMap<&str, usize>,
) {
    for dependent in graph.dependents(name) {
        if let Some(count) = waiting.get_mut(dependent) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                if let Some(pos) = position.get(dependent) {
                    ready.insert((*pos, dependent));
                }
            }
        }
    }
}

fn log_failure(identity: &ResourceIdentity, err: &ProvisioError) {
    if err.as_reconcile().is_some_and(ReconcileError::is_skip) {
        warn!("{err}");
    } else {
        error!("{identity}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{Capabilities, CheckResult, CreateResult, ProviderResult};
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ECHO: &str = "test:Echo";
    const SLOW: &str = "test:Slow";

    /// Echoes inputs as outputs; fails `create` when `fail: true`.
    #[derive(Default)]
    struct EchoProvider {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceProvider for EchoProvider {
        fn type_name(&self) -> &str {
            ECHO
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                diff: false,
                update: false,
                delete: true,
            }
        }

        async fn check(&self, _olds: Option<&PropertyMap>, news: &PropertyMap) -> ProviderResult<CheckResult> {
            Ok(CheckResult::ok(news.clone()))
        }

        async fn create(&self, inputs: &PropertyMap) -> ProviderResult<CreateResult> {
            if inputs.get("fail") == Some(&json!(true)) {
                return Err(ProviderError::failed("denied"));
            }
            let name = inputs.get("name").and_then(|v| v.as_str()).unwrap_or("anon");
            Ok(CreateResult {
                id: format!("echo-{name}"),
                outputs: inputs.clone(),
            })
        }

        async fn delete(&self, id: &str, _olds: &PropertyMap) -> ProviderResult<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    /// Holds each `create` open for a while and records how many overlap.
    #[derive(Default)]
    struct SlowProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceProvider for SlowProvider {
        fn type_name(&self) -> &str {
            SLOW
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                diff: false,
                update: false,
                delete: true,
            }
        }

        async fn check(&self, _olds: Option<&PropertyMap>, news: &PropertyMap) -> ProviderResult<CheckResult> {
            Ok(CheckResult::ok(news.clone()))
        }

        async fn create(&self, inputs: &PropertyMap) -> ProviderResult<CreateResult> {
            let name = inputs.get("name").and_then(|v| v.as_str()).unwrap_or("anon");
            self.events.lock().unwrap().push(format!("start {name}"));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(50)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("end {name}"));
            Ok(CreateResult {
                id: format!("slow-{name}"),
                outputs: inputs.clone(),
            })
        }

        async fn delete(&self, _id: &str, _olds: &PropertyMap) -> ProviderResult<()> {
            Ok(())
        }
    }

    fn fixture() -> (Orchestrator, Arc<EchoProvider>, Arc<MemoryStateStore>) {
        let provider = Arc::new(EchoProvider::default());
        let store = Arc::new(MemoryStateStore::new());
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let mut settings = StackSettings::new("demo02", "dev");
        settings.default_tags.insert(String::from("stack"), String::from("dev"));
        let orchestrator = Orchestrator::new(store.clone(), registry, &settings);
        (orchestrator, provider, store)
    }

    fn stack(yaml: &str) -> StackConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn id(name: &str) -> ResourceIdentity {
        ResourceIdentity::new(ECHO, name)
    }

    #[tokio::test]
    async fn test_independent_branches_overlap_up_to_max_parallel() {
        let provider = Arc::new(SlowProvider::default());
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let mut settings = StackSettings::new("demo02", "dev");
        settings.max_parallel = 2;
        let orchestrator = Orchestrator::new(Arc::new(MemoryStateStore::new()), registry, &settings);

        let config = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Slow, name: a, inputs: { name: a } }
  - { type: test:Slow, name: b, inputs: { name: b } }
  - { type: test:Slow, name: c, inputs: { name: c } }
  - { type: test:Slow, name: d, depends_on: [a], inputs: { name: d } }
",
        );

        let report = orchestrator.apply(&config).await.unwrap();
        assert!(report.is_success(), "{report}");
        assert_eq!(provider.peak.load(Ordering::SeqCst), 2);

        let events = provider.events.lock().unwrap().clone();
        let at = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert!(at("end a") < at("start d"), "{events:?}");
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_but_not_siblings() {
        let (orchestrator, _, store) = fixture();
        let config = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Echo, name: a, inputs: { name: a, fail: true } }
  - { type: test:Echo, name: b, depends_on: [a], inputs: { name: b } }
  - { type: test:Echo, name: c, depends_on: [b], inputs: { name: c } }
  - { type: test:Echo, name: d, inputs: { name: d } }
",
        );

        let report = orchestrator.apply(&config).await.unwrap();

        assert_eq!(report.outcome("a").unwrap().label(), "failed");
        assert_eq!(report.outcome("b").unwrap().label(), "skipped");
        assert_eq!(report.outcome("c").unwrap().label(), "skipped");
        assert_eq!(report.outcome("d").unwrap().label(), "create");
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 2);

        let err = report.outcome("c").unwrap().error().unwrap();
        assert!(matches!(
            err.as_reconcile(),
            Some(ReconcileError::DependencyFailed { dependency, .. }) if dependency == "b"
        ));

        assert!(store.load(&id("a")).await.unwrap().is_none());
        assert!(store.load(&id("b")).await.unwrap().is_none());
        assert!(store.load(&id("d")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_references_resolve_from_dependency_outputs() {
        let (orchestrator, _, store) = fixture();
        let config = stack(
            r#"
project:
  name: demo02
resources:
  - { type: test:Echo, name: site, inputs: { name: site, port: 8080 } }
  - type: test:Echo
    name: content
    inputs:
      name: content
      port: "${site.port}"
      url: "https://${site.name}.${prefix}.example:${site.port}"
      tags: { owner: web }
"#,
        );

        let report = orchestrator.apply(&config).await.unwrap();
        assert!(report.is_success());

        let record = store.load(&id("content")).await.unwrap().unwrap();
        assert_eq!(record.inputs["port"], json!(8080));
        assert_eq!(record.inputs["url"], json!("https://site.demo02.example:8080"));
        assert_eq!(record.inputs["tags"], json!({"owner": "web", "stack": "dev"}));
        assert_eq!(record.dependencies, vec![id("site")]);
    }

    #[tokio::test]
    async fn test_second_apply_changes_nothing() {
        let (orchestrator, _, _) = fixture();
        let config = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Echo, name: a, inputs: { name: a } }
  - { type: test:Echo, name: b, depends_on: [a], inputs: { name: b } }
",
        );

        let first = orchestrator.apply(&config).await.unwrap();
        assert_eq!(first.changed(), 2);

        let second = orchestrator.apply(&config).await.unwrap();
        assert!(second.is_success());
        assert_eq!(second.changed(), 0);
    }

    #[tokio::test]
    async fn test_undeclared_records_are_removed_dependents_first() {
        let (orchestrator, provider, store) = fixture();
        let before = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Echo, name: a, inputs: { name: a } }
  - { type: test:Echo, name: b, depends_on: [a], inputs: { name: b } }
  - { type: test:Echo, name: c, inputs: { name: c } }
",
        );
        orchestrator.apply(&before).await.unwrap();

        let after = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Echo, name: c, inputs: { name: c } }
",
        );
        let report = orchestrator.apply(&after).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.outcome("a").unwrap().label(), "removed");
        assert_eq!(*provider.deleted.lock().unwrap(), vec!["echo-b", "echo-a"]);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_protected_orphan_is_refused() {
        let (orchestrator, provider, store) = fixture();
        let before = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Echo, name: keep, protect: true, inputs: { name: keep } }
",
        );
        orchestrator.apply(&before).await.unwrap();

        let after = stack("project:\n  name: demo02\n");
        let report = orchestrator.apply(&after).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.outcome("keep").unwrap().error().and_then(ProvisioError::as_reconcile),
            Some(ReconcileError::Protected { .. })
        ));
        assert!(provider.deleted.lock().unwrap().is_empty());
        assert!(store.load(&id("keep")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_plan_has_no_side_effects() {
        let (orchestrator, provider, store) = fixture();
        let config = stack(
            r#"
project:
  name: demo02
resources:
  - { type: test:Echo, name: site, inputs: { name: site } }
  - { type: test:Echo, name: content, inputs: { name: "${site.name}-content" } }
"#,
        );

        let plan = orchestrator.plan(&config).await.unwrap();

        assert_eq!(plan.changes.len(), 2);
        assert_eq!(plan.changes[0].action.label(), "create");
        assert!(matches!(
            &plan.changes[1].action,
            PlannedAction::Pending { reference } if reference == "${site.name}"
        ));
        assert!(store.list().await.unwrap().is_empty());
        assert!(provider.deleted.lock().unwrap().is_empty());

        orchestrator.apply(&config).await.unwrap();
        let plan = orchestrator.plan(&config).await.unwrap();
        assert!(!plan.has_changes());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything_unless_protected() {
        let (orchestrator, provider, store) = fixture();
        let config = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Echo, name: a, protect: true, inputs: { name: a } }
  - { type: test:Echo, name: b, depends_on: [a], inputs: { name: b } }
",
        );
        orchestrator.apply(&config).await.unwrap();

        let report = orchestrator.destroy("demo02-dev", false).await.unwrap();
        assert_eq!(report.outcome("b").unwrap().label(), "removed");
        assert_eq!(report.outcome("a").unwrap().label(), "failed");
        assert_eq!(store.list().await.unwrap().len(), 1);

        let report = orchestrator.destroy("demo02-dev", true).await.unwrap();
        assert!(report.is_success());
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(*provider.deleted.lock().unwrap(), vec!["echo-b", "echo-a"]);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected_before_any_change() {
        let (orchestrator, _, store) = fixture();
        let config = stack(
            r"
project:
  name: demo02
resources:
  - { type: test:Missing, name: a }
",
        );

        let err = orchestrator.apply(&config).await.unwrap_err();
        assert!(matches!(err, ProvisioError::Config(ConfigError::UnknownResourceType { .. })));
        assert!(store.list().await.unwrap().is_empty());
    }
}
