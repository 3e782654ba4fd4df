//! Lifecycle engine: reconcile, preview and destroy one resource instance.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{LifecycleOperation, ProviderError, ReconcileError, Result};
use crate::provider::{ResourceProvider, changed_keys};
use crate::state::{PropertyMap, ResourceIdentity, StateRecord, StateStore};

use super::decision::LifecycleDecision;
use super::guard::{IdentityGuard, IdentityLocks};

/// Per-instance settings for a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Refuse replacement and deletion.
    pub protect: bool,
    /// Stack policy: whether replacements may run at all.
    pub allow_replace: bool,
    /// Dependencies recorded with the instance.
    pub dependencies: Vec<ResourceIdentity>,
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// The record now in the store.
    pub record: StateRecord,
    /// What was done.
    pub decision: LifecycleDecision,
}

/// Drives providers for single resource instances and commits their state.
#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn StateStore>,
    locks: Arc<IdentityLocks>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            protect: false,
            allow_replace: true,
            dependencies: Vec::new(),
        }
    }
}

impl LifecycleEngine {
    /// Creates an engine over a state store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: Arc::new(IdentityLocks::new()),
        }
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Brings one resource instance in line with its desired inputs.
    ///
    /// # Errors
    ///
    /// Fails with [`ReconcileError::ConcurrentReconcile`] when the identity is
    /// already being reconciled, [`ReconcileError::Validation`] when `check`
    /// reports failures, [`ReconcileError::ReplacementRequiredButDenied`] when
    /// a replace is needed but not allowed, [`ReconcileError::Provider`] when
    /// a lifecycle method fails, and with a state error when persistence fails.
    pub async fn reconcile(
        &self,
        identity: &ResourceIdentity,
        desired: &PropertyMap,
        provider: &dyn ResourceProvider,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let _guard = self.acquire(identity)?;

        let prior = self.store.load(identity).await?;
        let inputs = Self::check(identity, provider, prior.as_ref(), desired).await?;

        let Some(prior) = prior else {
            let record = self.create(identity, provider, inputs, options).await?;
            return Ok(ReconcileOutcome {
                record,
                decision: LifecycleDecision::Create,
            });
        };

        let decision = Self::decide(identity, provider, &prior, &inputs).await?;
        debug!("{identity}: {decision}");

        let record = match &decision {
            LifecycleDecision::NoChange | LifecycleDecision::Create => {
                self.refresh_metadata(prior, options).await?
            }
            LifecycleDecision::Update { .. } => {
                self.update(identity, provider, &prior, inputs, options).await?
            }
            LifecycleDecision::Replace { triggering } => {
                if options.protect || !options.allow_replace {
                    return Err(ReconcileError::ReplacementRequiredButDenied {
                        identity: identity.clone(),
                        properties: triggering.iter().cloned().collect(),
                    }
                    .into());
                }
                self.replace(identity, provider, &prior, inputs, options).await?
            }
        };

        Ok(ReconcileOutcome { record, decision })
    }

    /// Computes what `reconcile` would do, without side effects.
    ///
    /// Only `check` and `diff` are called.
    ///
    /// # Errors
    ///
    /// Fails with [`ReconcileError::Validation`] or [`ReconcileError::Provider`].
    pub async fn preview(
        &self,
        identity: &ResourceIdentity,
        desired: &PropertyMap,
        provider: &dyn ResourceProvider,
    ) -> Result<LifecycleDecision> {
        let prior = self.store.load(identity).await?;
        let inputs = Self::check(identity, provider, prior.as_ref(), desired).await?;

        match prior {
            None => Ok(LifecycleDecision::Create),
            Some(prior) => Self::decide(identity, provider, &prior, &inputs).await,
        }
    }

    /// Deletes the external object and its record.
    ///
    /// Returns the removed record, or `None` if nothing was recorded.
    /// Without `delete` support the object is abandoned with a warning.
    ///
    /// # Errors
    ///
    /// Fails with [`ReconcileError::Protected`] for protected records unless
    /// `force` is set, and with [`ReconcileError::Provider`] when `delete` fails.
    pub async fn destroy(
        &self,
        identity: &ResourceIdentity,
        provider: &dyn ResourceProvider,
        force: bool,
    ) -> Result<Option<StateRecord>> {
        let _guard = self.acquire(identity)?;

        let Some(record) = self.store.load(identity).await? else {
            debug!("{identity}: nothing recorded, nothing to destroy");
            return Ok(None);
        };

        if record.protect && !force {
            return Err(ReconcileError::Protected {
                identity: identity.clone(),
            }
            .into());
        }

        Self::delete_external(identity, provider, &record).await?;
        self.store.delete(identity).await?;
        info!("{identity}: destroyed");

        Ok(Some(record))
    }

    fn acquire(&self, identity: &ResourceIdentity) -> Result<IdentityGuard> {
        self.locks.try_acquire(identity).ok_or_else(|| {
            ReconcileError::ConcurrentReconcile {
                identity: identity.clone(),
            }
            .into()
        })
    }

    async fn check(
        identity: &ResourceIdentity,
        provider: &dyn ResourceProvider,
        prior: Option<&StateRecord>,
        desired: &PropertyMap,
    ) -> Result<PropertyMap> {
        let result = provider
            .check(prior.map(|r| &r.inputs), desired)
            .await
            .map_err(|e| provider_error(identity, LifecycleOperation::Check, e))?;

        if result.failures.is_empty() {
            Ok(result.inputs)
        } else {
            Err(ReconcileError::Validation {
                identity: identity.clone(),
                failures: result.failures,
            }
            .into())
        }
    }

    async fn decide(
        identity: &ResourceIdentity,
        provider: &dyn ResourceProvider,
        prior: &StateRecord,
        inputs: &PropertyMap,
    ) -> Result<LifecycleDecision> {
        if &prior.inputs == inputs {
            return Ok(LifecycleDecision::NoChange);
        }

        let capabilities = provider.capabilities();
        if !capabilities.diff {
            let changed = changed_keys(&prior.inputs, inputs);
            return Ok(LifecycleDecision::Replace { triggering: changed });
        }

        let diff = provider
            .diff(&prior.provider_id, &prior.outputs, inputs)
            .await
            .map_err(|e| provider_error(identity, LifecycleOperation::Diff, e))?;

        if !diff.changes {
            return Ok(LifecycleDecision::NoChange);
        }

        if !diff.replaces.is_empty() {
            return Ok(LifecycleDecision::Replace {
                triggering: diff.replaces,
            });
        }

        let changed: BTreeSet<String> = if diff.changed.is_empty() {
            changed_keys(&prior.inputs, inputs)
        } else {
            diff.changed
        };

        if capabilities.update {
            Ok(LifecycleDecision::Update { changed })
        } else {
            Ok(LifecycleDecision::Replace { triggering: changed })
        }
    }

    async fn create(
        &self,
        identity: &ResourceIdentity,
        provider: &dyn ResourceProvider,
        inputs: PropertyMap,
        options: &ReconcileOptions,
    ) -> Result<StateRecord> {
        info!("{identity}: creating");
        let created = provider
            .create(&inputs)
            .await
            .map_err(|e| provider_error(identity, LifecycleOperation::Create, e))?;

        let record = StateRecord::new(identity.clone(), created.id, inputs, created.outputs)
            .with_dependencies(options.dependencies.clone())
            .with_protect(options.protect);
        self.store.save(&record).await?;

        info!("{identity}: created with id {}", record.provider_id);
        Ok(record)
    }

    async fn update(
        &self,
        identity: &ResourceIdentity,
        provider: &dyn ResourceProvider,
        prior: &StateRecord,
        inputs: PropertyMap,
        options: &ReconcileOptions,
    ) -> Result<StateRecord> {
        info!("{identity}: updating {} in place", prior.provider_id);
        let updated = provider
            .update(&prior.provider_id, &prior.outputs, &inputs)
            .await
            .map_err(|e| provider_error(identity, LifecycleOperation::Update, e))?;

        let record = prior
            .updated(inputs, updated.outputs)
            .with_dependencies(options.dependencies.clone())
            .with_protect(options.protect);
        self.store.save(&record).await?;
        Ok(record)
    }

    async fn replace(
        &self,
        identity: &ResourceIdentity,
        provider: &dyn ResourceProvider,
        prior: &StateRecord,
        inputs: PropertyMap,
        options: &ReconcileOptions,
    ) -> Result<StateRecord> {
        info!("{identity}: replacing {}", prior.provider_id);

        if provider.capabilities().delete {
            provider
                .delete(&prior.provider_id, &prior.outputs)
                .await
                .map_err(|e| provider_error(identity, LifecycleOperation::Delete, e))?;
            self.store.delete(identity).await?;
        } else {
            warn!(
                "{identity}: provider cannot delete; abandoning external object '{}'",
                prior.provider_id
            );
        }

        self.create(identity, provider, inputs, options).await
    }

    /// Persists changed `protect` or dependency metadata without touching the provider.
    async fn refresh_metadata(&self, prior: StateRecord, options: &ReconcileOptions) -> Result<StateRecord> {
        if prior.protect == options.protect && prior.dependencies == options.dependencies {
            return Ok(prior);
        }

        debug!("{}: refreshing recorded metadata", prior.identity);
        let record = prior
            .with_dependencies(options.dependencies.clone())
            .with_protect(options.protect);
        self.store.save(&record).await?;
        Ok(record)
    }

    async fn delete_external(
        identity: &ResourceIdentity,
        provider: &dyn ResourceProvider,
        record: &StateRecord,
    ) -> Result<()> {
        if provider.capabilities().delete {
            info!("{identity}: deleting {}", record.provider_id);
            provider
                .delete(&record.provider_id, &record.outputs)
                .await
                .map_err(|e| provider_error(identity, LifecycleOperation::Delete, e))?;
        } else {
            warn!(
                "{identity}: provider cannot delete; abandoning external object '{}'",
                record.provider_id
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("backend", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}

fn provider_error(
    identity: &ResourceIdentity,
    operation: LifecycleOperation,
    source: ProviderError,
) -> crate::error::ProvisioError {
    ReconcileError::Provider {
        identity: identity.clone(),
        operation,
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CheckFailure, ProvisioError};
    use crate::provider::{Capabilities, CheckResult, CreateResult, DiffResult, ProviderResult, UpdateResult};
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Calls {
        check: AtomicUsize,
        diff: AtomicUsize,
        create: AtomicUsize,
        update: AtomicUsize,
        delete: AtomicUsize,
    }

    impl Calls {
        fn snapshot(&self) -> [usize; 5] {
            [
                self.check.load(Ordering::SeqCst),
                self.diff.load(Ordering::SeqCst),
                self.create.load(Ordering::SeqCst),
                self.update.load(Ordering::SeqCst),
                self.delete.load(Ordering::SeqCst),
            ]
        }
    }

    /// Echoes inputs as outputs; ids are `id-<n>`.
    struct FakeProvider {
        capabilities: Capabilities,
        replace_on: Vec<&'static str>,
        fail_create: AtomicBool,
        create_delay: Option<Duration>,
        next_id: AtomicUsize,
        calls: Calls,
    }

    impl FakeProvider {
        fn new(capabilities: Capabilities) -> Self {
            Self {
                capabilities,
                replace_on: vec!["accountName"],
                fail_create: AtomicBool::new(false),
                create_delay: None,
                next_id: AtomicUsize::new(1),
                calls: Calls::default(),
            }
        }

        fn full() -> Self {
            Self::new(Capabilities {
                diff: true,
                update: true,
                delete: true,
            })
        }
    }

    #[async_trait]
    impl ResourceProvider for FakeProvider {
        fn type_name(&self) -> &str {
            "test:Fake"
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        async fn check(&self, _olds: Option<&PropertyMap>, news: &PropertyMap) -> ProviderResult<CheckResult> {
            self.calls.check.fetch_add(1, Ordering::SeqCst);
            let failures = news
                .keys()
                .filter(|k| k.starts_with("invalid"))
                .map(|k| CheckFailure::new(k.as_str(), "rejected"))
                .collect();
            Ok(CheckResult {
                inputs: news.clone(),
                failures,
            })
        }

        async fn diff(&self, _id: &str, olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<DiffResult> {
            self.calls.diff.fetch_add(1, Ordering::SeqCst);
            Ok(DiffResult::from_changes(changed_keys(olds, news), &self.replace_on))
        }

        async fn create(&self, inputs: &PropertyMap) -> ProviderResult<CreateResult> {
            self.calls.create.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ProviderError::failed("quota exceeded"));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(CreateResult {
                id: format!("id-{n}"),
                outputs: inputs.clone(),
            })
        }

        async fn update(&self, _id: &str, _olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<UpdateResult> {
            self.calls.update.fetch_add(1, Ordering::SeqCst);
            Ok(UpdateResult { outputs: news.clone() })
        }

        async fn delete(&self, _id: &str, _olds: &PropertyMap) -> ProviderResult<()> {
            self.calls.delete.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine() -> (LifecycleEngine, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        (LifecycleEngine::new(Arc::clone(&store) as Arc<dyn StateStore>), store)
    }

    fn id() -> ResourceIdentity {
        ResourceIdentity::new("test:Fake", "site")
    }

    fn inputs(pairs: &[(&str, serde_json::Value)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_first_reconcile_creates_exactly_once() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();

        let outcome = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &ReconcileOptions::default())
            .await
            .expect("create");

        assert_eq!(outcome.decision, LifecycleDecision::Create);
        assert_eq!(provider.calls.snapshot(), [1, 0, 1, 0, 0]);
        assert_eq!(store.load(&id()).await.expect("load"), Some(outcome.record));
    }

    #[tokio::test]
    async fn test_second_identical_reconcile_only_checks_and_keeps_bytes() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();
        let desired = inputs(&[("accountName", json!("a1"))]);
        let options = ReconcileOptions::default();

        engine.reconcile(&id(), &desired, &provider, &options).await.expect("create");
        let before = store.raw(&id()).await.expect("record present");
        let calls_before = provider.calls.snapshot();

        let outcome = engine.reconcile(&id(), &desired, &provider, &options).await.expect("no-op");

        let calls_after = provider.calls.snapshot();
        assert_eq!(outcome.decision, LifecycleDecision::NoChange);
        assert_eq!(calls_after[0] - calls_before[0], 1);
        assert_eq!(calls_after[1..], calls_before[1..]);
        assert_eq!(store.raw(&id()).await.expect("record present"), before);
    }

    #[tokio::test]
    async fn test_without_diff_any_change_replaces() {
        let (engine, _store) = engine();
        let provider = FakeProvider::new(Capabilities {
            diff: false,
            update: true,
            delete: true,
        });
        let options = ReconcileOptions::default();

        engine
            .reconcile(&id(), &inputs(&[("tier", json!("hot"))]), &provider, &options)
            .await
            .expect("create");
        let outcome = engine
            .reconcile(&id(), &inputs(&[("tier", json!("cool"))]), &provider, &options)
            .await
            .expect("replace");

        assert!(matches!(outcome.decision, LifecycleDecision::Replace { .. }));
        assert_eq!(provider.calls.update.load(Ordering::SeqCst), 0);
        assert_eq!(provider.calls.diff.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_keeps_provider_id() {
        let (engine, _store) = engine();
        let provider = FakeProvider::full();
        let options = ReconcileOptions::default();

        let created = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1")), ("doc", json!("index.html"))]), &provider, &options)
            .await
            .expect("create");
        let updated = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1")), ("doc", json!("home.html"))]), &provider, &options)
            .await
            .expect("update");

        assert_eq!(
            updated.decision,
            LifecycleDecision::Update {
                changed: [String::from("doc")].into()
            }
        );
        assert_eq!(provider.calls.update.load(Ordering::SeqCst), 1);
        assert_eq!(updated.record.provider_id, created.record.provider_id);
        assert_eq!(updated.record.created_at, created.record.created_at);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_record() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();
        provider.fail_create.store(true, Ordering::SeqCst);

        let err = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &ReconcileOptions::default())
            .await
            .expect_err("create fails");

        assert!(matches!(
            err.as_reconcile(),
            Some(ReconcileError::Provider {
                operation: LifecycleOperation::Create,
                ..
            })
        ));
        assert!(store.load(&id()).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_account_change_without_diff_or_update_deletes_then_creates() {
        let (engine, _store) = engine();
        let provider = FakeProvider::new(Capabilities {
            diff: false,
            update: false,
            delete: true,
        });
        let options = ReconcileOptions::default();

        let first = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &options)
            .await
            .expect("create");
        let second = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a2"))]), &provider, &options)
            .await
            .expect("replace");

        assert_eq!(provider.calls.snapshot(), [2, 0, 2, 0, 1]);
        assert_ne!(second.record.provider_id, first.record.provider_id);
        assert_eq!(
            second.decision,
            LifecycleDecision::Replace {
                triggering: [String::from("accountName")].into()
            }
        );
    }

    #[tokio::test]
    async fn test_replace_without_delete_abandons_and_creates() {
        let (engine, store) = engine();
        let provider = FakeProvider::new(Capabilities::default());
        let options = ReconcileOptions::default();

        let first = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &options)
            .await
            .expect("create");
        let second = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a2"))]), &provider, &options)
            .await
            .expect("replace");

        assert_eq!(provider.calls.delete.load(Ordering::SeqCst), 0);
        assert_ne!(second.record.provider_id, first.record.provider_id);
        assert_eq!(store.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_during_abandon_keeps_old_record() {
        let (engine, store) = engine();
        let provider = FakeProvider::new(Capabilities::default());
        let options = ReconcileOptions::default();

        let first = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &options)
            .await
            .expect("create");
        provider.fail_create.store(true, Ordering::SeqCst);
        engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a2"))]), &provider, &options)
            .await
            .expect_err("create fails");

        assert_eq!(store.load(&id()).await.expect("load"), Some(first.record));
    }

    #[tokio::test]
    async fn test_validation_failure_runs_no_lifecycle_method() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();

        let err = engine
            .reconcile(
                &id(),
                &inputs(&[("invalidA", json!(1)), ("invalidB", json!(2))]),
                &provider,
                &ReconcileOptions::default(),
            )
            .await
            .expect_err("validation fails");

        match err.as_reconcile() {
            Some(ReconcileError::Validation { failures, .. }) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.calls.snapshot(), [1, 0, 0, 0, 0]);
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_protected_replace_is_denied_before_side_effects() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();
        let options = ReconcileOptions {
            protect: true,
            ..ReconcileOptions::default()
        };

        engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &options)
            .await
            .expect("create");
        let before = store.raw(&id()).await;

        let err = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a2"))]), &provider, &options)
            .await
            .expect_err("replace denied");

        assert!(matches!(
            err.as_reconcile(),
            Some(ReconcileError::ReplacementRequiredButDenied { properties, .. }) if properties == &vec![String::from("accountName")]
        ));
        assert_eq!(provider.calls.delete.load(Ordering::SeqCst), 0);
        assert_eq!(provider.calls.create.load(Ordering::SeqCst), 1);
        assert_eq!(store.raw(&id()).await, before);
    }

    #[tokio::test]
    async fn test_policy_can_deny_replacement() {
        let (engine, _store) = engine();
        let provider = FakeProvider::full();
        let options = ReconcileOptions {
            allow_replace: false,
            ..ReconcileOptions::default()
        };

        engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &options)
            .await
            .expect("create");
        let err = engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a2"))]), &provider, &options)
            .await
            .expect_err("replace denied");

        assert!(matches!(
            err,
            ProvisioError::Reconcile(ReconcileError::ReplacementRequiredButDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reconcile_of_same_identity_is_rejected() {
        let (engine, _store) = engine();
        let mut provider = FakeProvider::full();
        provider.create_delay = Some(Duration::from_millis(200));
        let provider = Arc::new(provider);
        let desired = inputs(&[("accountName", json!("a1"))]);

        let first = {
            let engine = engine.clone();
            let provider = Arc::clone(&provider);
            let desired = desired.clone();
            tokio::spawn(async move {
                engine
                    .reconcile(&id(), &desired, provider.as_ref(), &ReconcileOptions::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = engine
            .reconcile(&id(), &desired, provider.as_ref(), &ReconcileOptions::default())
            .await;

        assert!(matches!(
            second.as_ref().err().and_then(ProvisioError::as_reconcile),
            Some(ReconcileError::ConcurrentReconcile { .. })
        ));
        assert!(first.await.expect("task joins").is_ok());
        assert_eq!(provider.calls.create.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();
        let options = ReconcileOptions::default();

        let decision = engine
            .preview(&id(), &inputs(&[("accountName", json!("a1"))]), &provider)
            .await
            .expect("preview");
        assert_eq!(decision, LifecycleDecision::Create);
        assert!(store.list().await.expect("list").is_empty());

        engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &options)
            .await
            .expect("create");
        let decision = engine
            .preview(&id(), &inputs(&[("accountName", json!("a2"))]), &provider)
            .await
            .expect("preview");

        assert!(matches!(decision, LifecycleDecision::Replace { .. }));
        assert_eq!(provider.calls.create.load(Ordering::SeqCst), 1);
        assert_eq!(provider.calls.delete.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_destroy_respects_protect_and_removes_record() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();
        let options = ReconcileOptions {
            protect: true,
            ..ReconcileOptions::default()
        };

        engine
            .reconcile(&id(), &inputs(&[("accountName", json!("a1"))]), &provider, &options)
            .await
            .expect("create");

        let err = engine.destroy(&id(), &provider, false).await.expect_err("protected");
        assert!(matches!(err.as_reconcile(), Some(ReconcileError::Protected { .. })));

        let removed = engine.destroy(&id(), &provider, true).await.expect("forced destroy");
        assert!(removed.is_some());
        assert_eq!(provider.calls.delete.load(Ordering::SeqCst), 1);
        assert!(store.load(&id()).await.expect("load").is_none());

        assert!(engine.destroy(&id(), &provider, false).await.expect("idempotent").is_none());
    }

    #[tokio::test]
    async fn test_metadata_change_is_persisted_without_provider_calls() {
        let (engine, store) = engine();
        let provider = FakeProvider::full();
        let desired = inputs(&[("accountName", json!("a1"))]);

        engine
            .reconcile(&id(), &desired, &provider, &ReconcileOptions::default())
            .await
            .expect("create");
        let outcome = engine
            .reconcile(
                &id(),
                &desired,
                &provider,
                &ReconcileOptions {
                    protect: true,
                    ..ReconcileOptions::default()
                },
            )
            .await
            .expect("no-op");

        assert_eq!(outcome.decision, LifecycleDecision::NoChange);
        assert!(store.load(&id()).await.expect("load").is_some_and(|r| r.protect));
        assert_eq!(provider.calls.snapshot(), [2, 0, 1, 0, 0]);
    }
}
