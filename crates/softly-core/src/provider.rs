//! The contract every fluent assertion root implements, and the runtime
//! descriptor used to construct providers on behalf of a test runner.

use crate::aggregate::{self, MultipleFailuresError};
use crate::collector::DefaultErrorCollector;
use crate::config::ReportConfig;
use softly_proto::{Error, ErrorCollector, Failure, FailureLocation, Result};
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A fluent assertion root whose failures go to an [`ErrorCollector`]
/// instead of panicking.
///
/// Implementors only expose the [`DefaultErrorCollector`] they embed. Until
/// a delegate is set that collector stores failures itself, so a provider
/// can be used on its own and checked with [`assert_all`]; once bound, every
/// failure lands in the delegate shared with other providers of the test.
///
/// [`assert_all`]: SoftAssertionsProvider::assert_all
pub trait SoftAssertionsProvider: Send + Sync + 'static {
    fn error_collector(&self) -> &DefaultErrorCollector;

    /// Settings used by [`SoftAssertionsProvider::assert_all`].
    fn report_config(&self) -> ReportConfig {
        ReportConfig::default()
    }

    fn delegate(&self) -> Option<Arc<dyn ErrorCollector>> {
        self.error_collector().delegate()
    }

    fn set_delegate(&self, collector: Arc<dyn ErrorCollector>) {
        self.error_collector().set_delegate(collector);
    }

    /// The seam fluent assertions call instead of panicking.
    fn collect_assertion_error(&self, failure: Failure) {
        self.error_collector().collect(failure);
    }

    fn succeeded(&self) {
        self.error_collector().record_success();
    }

    fn assertion_errors_collected(&self) -> Vec<Failure> {
        self.error_collector().failures()
    }

    fn had_any_success(&self) -> bool {
        self.error_collector().had_any_success()
    }

    /// Fails with every failure collected so far.
    fn assert_all(&self) -> std::result::Result<(), MultipleFailuresError> {
        aggregate::assert_all(self.error_collector(), &self.report_config())
    }

    /// Records an unconditional failure.
    #[track_caller]
    fn fail(&self, message: &str) {
        self.collect_assertion_error(Failure::here(message));
    }

    /// Records an unconditional failure caused by `cause`.
    #[track_caller]
    fn fail_with_cause(&self, message: &str, cause: &dyn std::error::Error) {
        self.collect_assertion_error(Failure::here(format!("{message}\ncaused by: {cause}")));
    }

    /// Records that code expected to panic or error returned normally.
    #[track_caller]
    fn should_have_panicked(&self, what: &str) {
        self.collect_assertion_error(Failure::here(format!(
            "Expecting code to raise {what} but it completed normally"
        )));
    }

    /// Runs a closure that uses hard assertions and collects its panic, if
    /// any, as a soft failure.
    ///
    /// The panic hook still runs, so the panic message is also printed by
    /// the test harness.
    #[track_caller]
    fn check<R>(&self, f: impl FnOnce() -> R) -> Option<R>
    where
        Self: Sized,
    {
        let location = FailureLocation::caller();
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                self.succeeded();
                Some(value)
            }
            Err(payload) => {
                self.collect_assertion_error(
                    Failure::from_panic_payload(payload.as_ref()).with_location(location),
                );
                None
            }
        }
    }
}

/// A constructed provider, viewable both as the provider trait object and
/// as its concrete type.
#[derive(Clone)]
pub struct ProviderInstance {
    provider: Arc<dyn SoftAssertionsProvider>,
    concrete: Arc<dyn Any + Send + Sync>,
}

impl ProviderInstance {
    pub fn new<P: SoftAssertionsProvider>(provider: P) -> Self {
        let provider = Arc::new(provider);
        Self {
            provider: provider.clone(),
            concrete: provider,
        }
    }

    pub fn provider(&self) -> &Arc<dyn SoftAssertionsProvider> {
        &self.provider
    }

    /// Returns the provider as `P` if that is its concrete type.
    pub fn downcast<P: SoftAssertionsProvider>(&self) -> Option<Arc<P>> {
        Arc::clone(&self.concrete).downcast::<P>().ok()
    }
}

impl fmt::Debug for ProviderInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInstance")
            .field("bound", &self.provider.delegate().is_some())
            .finish_non_exhaustive()
    }
}

type Factory = Arc<dyn Fn() -> std::result::Result<ProviderInstance, String> + Send + Sync>;

#[derive(Clone)]
enum Constructor {
    Abstract,
    NoDefault,
    Factory(Factory),
}

/// Describes a provider type a runner wants instantiated.
///
/// Stands in for reflective construction: the runner (or the test author)
/// says how to build the type, or that it cannot be built.
#[derive(Clone)]
pub struct ProviderType {
    name: &'static str,
    type_id: TypeId,
    constructor: Constructor,
}

impl ProviderType {
    /// A provider built with `P::default()`.
    pub fn of<P: SoftAssertionsProvider + Default>() -> Self {
        Self::with_factory::<P, _>(|| Ok(P::default()))
    }

    /// A provider built by `factory`. An `Err` is reported as a configuration error.
    pub fn with_factory<P, F>(factory: F) -> Self
    where
        P: SoftAssertionsProvider,
        F: Fn() -> std::result::Result<P, String> + Send + Sync + 'static,
    {
        Self {
            name: type_name::<P>(),
            type_id: TypeId::of::<P>(),
            constructor: Constructor::Factory(Arc::new(move || {
                factory().map(ProviderInstance::new)
            })),
        }
    }

    /// A type that can never be instantiated, such as `dyn SoftAssertionsProvider`.
    pub fn abstract_of<T: ?Sized + 'static>() -> Self {
        Self {
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            constructor: Constructor::Abstract,
        }
    }

    /// A concrete provider with no way to build it without arguments.
    pub fn without_default_constructor<P: SoftAssertionsProvider>() -> Self {
        Self {
            name: type_name::<P>(),
            type_id: TypeId::of::<P>(),
            constructor: Constructor::NoDefault,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.constructor, Constructor::Abstract)
    }

    pub fn has_default_constructor(&self) -> bool {
        matches!(self.constructor, Constructor::Factory(_))
    }

    /// Builds a new instance.
    ///
    /// Abstract types, types without a default constructor, failing
    /// factories and panicking factories are all configuration errors.
    pub fn instantiate(&self) -> Result<ProviderInstance> {
        let factory = match &self.constructor {
            Constructor::Abstract => {
                return Err(Error::Configuration(format!(
                    "the SoftAssertionsProvider implementation [{}] is abstract and cannot be instantiated",
                    self.name
                )));
            }
            Constructor::NoDefault => {
                return Err(Error::Configuration(format!(
                    "the SoftAssertionsProvider implementation [{}] has no default constructor and cannot be instantiated",
                    self.name
                )));
            }
            Constructor::Factory(factory) => factory,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(reason)) => Err(Error::Configuration(format!(
                "failed to instantiate [{}]: {reason}",
                self.name
            ))),
            Err(payload) => Err(Error::Configuration(format!(
                "instantiating [{}] panicked: {}",
                self.name,
                Failure::from_panic_payload(payload.as_ref()).message
            ))),
        }
    }
}

impl fmt::Debug for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderType")
            .field("name", &self.name)
            .field("abstract", &self.is_abstract())
            .field("default_constructor", &self.has_default_constructor())
            .finish()
    }
}
