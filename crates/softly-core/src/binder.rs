//! Binding providers to the collector of the test that is running.
//!
//! The binder is what a test runner calls at each step of a test's life:
//!
//! 1. [`post_process_test_instance`] when a test-class instance is created,
//!    to build and register the providers its fields want.
//! 2. [`before_each`] before each test, to point every registered provider
//!    at that test's collector.
//! 3. [`resolve_parameter`] for provider parameters of the test function.
//! 4. [`after_test_execution`] once the body returns, to fail the test with
//!    everything collected.
//!
//! When a class instance is shared by tests running concurrently, providers
//! are bound once to a [`ThreadKeyedCollector`] and `before_each` binds the
//! running thread to its test's collector instead.
//!
//! [`post_process_test_instance`]: SoftAssertionsBinder::post_process_test_instance
//! [`before_each`]: SoftAssertionsBinder::before_each
//! [`resolve_parameter`]: SoftAssertionsBinder::resolve_parameter
//! [`after_test_execution`]: SoftAssertionsBinder::after_test_execution

use crate::aggregate::{self, MultipleFailuresError};
use crate::collector::DefaultErrorCollector;
use crate::config::SoftlyConfig;
use crate::context::{ExecutionContext, Slot, StoreKey, StoreValue};
use crate::injection::{FieldDescriptor, ParameterDescriptor};
use crate::provider::{ProviderInstance, ProviderType, SoftAssertionsProvider};
use crate::thread_keyed::ThreadKeyedCollector;
use softly_proto::{Error, ErrorCollector, Result};
use std::any::TypeId;
use std::sync::{Arc, Mutex, PoisonError};

/// Why a finished test failed.
#[derive(Debug, thiserror::Error)]
pub enum TestOutcomeError {
    /// The binder could not do its job; the test result is meaningless.
    #[error(transparent)]
    Fatal(#[from] Error),

    /// Soft assertions failed.
    #[error(transparent)]
    Failures(#[from] MultipleFailuresError),
}

/// Providers created for a context and its descendants.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Mutex<Vec<Arc<dyn SoftAssertionsProvider>>>,
}

impl ProviderRegistry {
    fn register(&self, provider: Arc<dyn SoftAssertionsProvider>) {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn SoftAssertionsProvider>> {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CollectorSlot;
impl Slot for CollectorSlot {
    type Namespace = SoftAssertionsBinder;
    type Value = DefaultErrorCollector;
}

struct ThreadAdapterSlot;
impl Slot for ThreadAdapterSlot {
    type Namespace = SoftAssertionsBinder;
    type Value = ThreadKeyedCollector;
}

struct RegistrySlot;
impl Slot for RegistrySlot {
    type Namespace = SoftAssertionsBinder;
    type Value = ProviderRegistry;
}

/// Namespace of the per-type provider entries.
struct Providers;

fn provider_key(provider: &ProviderType) -> StoreKey {
    StoreKey::new(TypeId::of::<Providers>(), provider.type_id())
}

/// Creates, binds and finalizes soft assertion state on execution contexts.
#[derive(Debug, Clone, Default)]
pub struct SoftAssertionsBinder {
    config: SoftlyConfig,
}

impl SoftAssertionsBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SoftlyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SoftlyConfig {
        &self.config
    }

    /// True when one class instance is shared by concurrently running tests.
    pub fn is_per_class_concurrent(ctx: &ExecutionContext) -> bool {
        ctx.is_per_class() && ctx.is_concurrent()
    }

    /// The collector owned by `ctx`, created on first use.
    ///
    /// Never resolved through ancestors: every context gets its own.
    pub fn collector(&self, ctx: &ExecutionContext) -> Result<Arc<DefaultErrorCollector>> {
        ctx.store().get_or_try_insert_with::<CollectorSlot>(|| {
            tracing::debug!(context = %ctx.name(), "Creating error collector");
            Ok(DefaultErrorCollector::new())
        })
    }

    /// The provider of type `P` visible from `ctx`, created on first use.
    ///
    /// Any code holding the context gets the same instance, so other
    /// runner extensions can share the test's providers.
    pub fn provider<P: SoftAssertionsProvider + Default>(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Arc<P>> {
        let provider_type = ProviderType::of::<P>();
        self.provider_of(ctx, &provider_type)?
            .downcast::<P>()
            .ok_or_else(|| {
                Error::InternalConsistency(format!(
                    "provider stored for {} has a different type",
                    provider_type.name()
                ))
            })
    }

    /// Untyped [`SoftAssertionsBinder::provider`].
    pub fn provider_of(
        &self,
        ctx: &ExecutionContext,
        provider_type: &ProviderType,
    ) -> Result<ProviderInstance> {
        let value = ctx.get_or_insert_inherited_raw(provider_key(provider_type), || {
            let instance = self.instantiate(ctx, provider_type)?;
            Ok(Arc::new(instance) as StoreValue)
        })?;
        value
            .downcast::<ProviderInstance>()
            .map(|instance| ProviderInstance::clone(&instance))
            .map_err(|_| {
                Error::InternalConsistency(format!(
                    "store entry for {} is not a provider",
                    provider_type.name()
                ))
            })
    }

    fn instantiate(
        &self,
        ctx: &ExecutionContext,
        provider_type: &ProviderType,
    ) -> Result<ProviderInstance> {
        let instance = provider_type.instantiate()?;
        let provider = instance.provider();

        if Self::is_per_class_concurrent(ctx) {
            provider.set_delegate(self.thread_adapter(ctx)?);
        } else if ctx.has_test_method() {
            // before_each may already have run for this test.
            provider.set_delegate(self.collector(ctx)?);
        }

        self.registry(ctx)?.register(Arc::clone(provider));
        tracing::debug!(
            context = %ctx.name(),
            provider = provider_type.name(),
            bound = provider.delegate().is_some(),
            "Created soft assertions provider"
        );
        Ok(instance)
    }

    /// The per-thread adapter shared by a concurrent class, created on first use.
    pub fn thread_adapter(&self, ctx: &ExecutionContext) -> Result<Arc<ThreadKeyedCollector>> {
        ctx.get_or_insert_inherited::<ThreadAdapterSlot>(|| {
            tracing::debug!(context = %ctx.name(), "Creating per-thread collector adapter");
            Ok(ThreadKeyedCollector::new())
        })
    }

    fn registry(&self, ctx: &ExecutionContext) -> Result<Arc<ProviderRegistry>> {
        ctx.get_or_insert_inherited::<RegistrySlot>(|| Ok(ProviderRegistry::default()))
    }

    /// Providers registered for `ctx` or its nearest registering ancestor.
    pub fn registered_providers(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Arc<dyn SoftAssertionsProvider>>> {
        Ok(ctx
            .find_inherited::<RegistrySlot>()?
            .map(|registry| registry.snapshot())
            .unwrap_or_default())
    }

    /// Points every provider visible from `ctx` at `collector`.
    ///
    /// Returns whether any registry was found.
    pub fn rebind_all_providers(
        &self,
        ctx: &ExecutionContext,
        collector: &Arc<dyn ErrorCollector>,
    ) -> Result<bool> {
        let Some(registry) = ctx.find_inherited::<RegistrySlot>()? else {
            return Ok(false);
        };
        for provider in registry.snapshot() {
            provider.set_delegate(Arc::clone(collector));
        }
        Ok(true)
    }

    /// Builds and binds the providers wanted by the fields of a new
    /// test-class instance. Returns each field name with its provider.
    ///
    /// Every field is validated before anything is created.
    pub fn post_process_test_instance(
        &self,
        ctx: &ExecutionContext,
        fields: &[FieldDescriptor],
    ) -> Result<Vec<(String, ProviderInstance)>> {
        let provider_types = fields
            .iter()
            .map(|field| field.validate().map(|provider| (field.name.clone(), provider)))
            .collect::<Result<Vec<_>>>()?;

        provider_types
            .into_iter()
            .map(|(name, provider_type)| Ok((name, self.provider_of(ctx, provider_type)?)))
            .collect()
    }

    /// Routes the providers of the test about to run to its collector.
    ///
    /// Registries are found through enclosing contexts, so for nested
    /// classes the walk keeps going upward until a context sees none.
    pub fn before_each(&self, ctx: &ExecutionContext) -> Result<()> {
        let collector: Arc<dyn ErrorCollector> = self.collector(ctx)?;

        if Self::is_per_class_concurrent(ctx) {
            tracing::debug!(context = %ctx.name(), "Binding test collector to the current thread");
            self.thread_adapter(ctx)?.set_delegate(collector);
            return Ok(());
        }

        let mut current = ctx.clone();
        while self.rebind_all_providers(&current, &collector)? {
            tracing::debug!(context = %current.name(), "Rebound providers to test collector");
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(())
    }

    pub fn supports_parameter(&self, parameter: &ParameterDescriptor) -> Result<bool> {
        parameter.check()
    }

    /// A new provider for a test-function parameter, bound to the test's
    /// collector. Each call returns a distinct instance.
    pub fn resolve_parameter(
        &self,
        ctx: &ExecutionContext,
        parameter: &ParameterDescriptor,
    ) -> Result<ProviderInstance> {
        if !parameter.check()? {
            return Err(Error::Configuration(format!(
                "parameter [{}] of type {} is not a SoftAssertionsProvider",
                parameter.name,
                parameter.declared.type_name()
            )));
        }
        let provider_type = parameter.provider_type().ok_or_else(|| {
            Error::InternalConsistency(format!("parameter [{}] lost its provider type", parameter.name))
        })?;

        let instance = provider_type.instantiate()?;
        instance.provider().set_delegate(self.collector(ctx)?);
        Ok(instance)
    }

    /// Fails the finished test with every soft assertion failure it collected.
    ///
    /// The test's failures are drained, so finalizing a context a second
    /// time only reports what was collected since. For a concurrent class
    /// the calling thread is unbound, and failures that reached the shared
    /// adapter from threads with no binding are reported with this test.
    pub fn after_test_execution(
        &self,
        ctx: &ExecutionContext,
    ) -> std::result::Result<(), TestOutcomeError> {
        let failures = if Self::is_per_class_concurrent(ctx) {
            let adapter = self.thread_adapter(ctx)?;
            adapter.reset().ok_or_else(|| {
                Error::InternalConsistency(
                    "Expecting delegate to be present for current context".to_string(),
                )
            })?;
            let mut failures = self.collector(ctx)?.take_failures();
            let orphaned = adapter.take_orphaned_failures();
            if !orphaned.is_empty() {
                tracing::warn!(
                    context = %ctx.name(),
                    orphaned = orphaned.len(),
                    "Reporting failures collected on threads with no bound test"
                );
                failures.extend(orphaned);
            }
            failures
        } else {
            self.collector(ctx)?.take_failures()
        };

        tracing::debug!(context = %ctx.name(), failures = failures.len(), "Finished test");
        match aggregate::aggregate(failures, &self.config.report) {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}
