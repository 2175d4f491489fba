//! A minimal test runner driving the binder through a class of tests.
//!
//! Each [`TestClass`] becomes a class context under a fresh engine root and
//! each [`TestCase`] a method context below it. The runner calls the binder
//! hooks in the order a real runner would, running tests one after another
//! or, for concurrent classes, all at once on scoped threads.

use crate::aggregate::MultipleFailuresError;
use crate::binder::{SoftAssertionsBinder, TestOutcomeError};
use crate::context::{ContextSpec, ContextTree, ExecutionContext, ExecutionMode, Lifecycle};
use crate::injection::{FieldDescriptor, ParameterDescriptor};
use crate::provider::{ProviderInstance, SoftAssertionsProvider};
use softly_proto::{Error, Failure, Result};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

type TestBody = Arc<dyn Fn(&TestArgs) + Send + Sync>;

/// One test function.
#[derive(Clone)]
pub struct TestCase {
    name: String,
    parameters: Vec<ParameterDescriptor>,
    body: TestBody,
}

impl TestCase {
    pub fn new(name: impl Into<String>, body: impl Fn(&TestArgs) + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

/// A test class: injected fields plus its tests.
#[derive(Debug, Clone)]
pub struct TestClass {
    name: String,
    lifecycle: Lifecycle,
    mode: ExecutionMode,
    fields: Vec<FieldDescriptor>,
    tests: Vec<TestCase>,
}

impl TestClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::default(),
            mode: ExecutionMode::default(),
            fields: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn test(mut self, test: TestCase) -> Self {
        self.tests.push(test);
        self
    }
}

/// What a test body receives: its injected fields, resolved parameters and
/// its context.
pub struct TestArgs {
    context: ExecutionContext,
    fields: Vec<(String, ProviderInstance)>,
    parameters: Vec<ProviderInstance>,
}

impl TestArgs {
    /// The provider injected into field `name`, if it is a `P`.
    pub fn field<P: SoftAssertionsProvider>(&self, name: &str) -> Option<Arc<P>> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, instance)| instance.downcast::<P>())
    }

    /// The resolved provider parameter at `index`, if it is a `P`.
    pub fn parameter<P: SoftAssertionsProvider>(&self, index: usize) -> Option<Arc<P>> {
        self.parameters.get(index).and_then(ProviderInstance::downcast::<P>)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

#[derive(Debug)]
pub enum TestOutcome {
    Passed,
    /// Soft assertions failed.
    Failed(MultipleFailuresError),
    /// Setup or binding failed before or after the body ran.
    Errored(Error),
    /// The body panicked. Soft failures collected before the panic are
    /// kept alongside the panic message.
    Panicked {
        message: String,
        failures: Option<MultipleFailuresError>,
    },
}

impl From<TestOutcomeError> for TestOutcome {
    fn from(error: TestOutcomeError) -> Self {
        match error {
            TestOutcomeError::Fatal(error) => TestOutcome::Errored(error),
            TestOutcomeError::Failures(failures) => TestOutcome::Failed(failures),
        }
    }
}

#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, TestOutcome::Passed)
    }

    /// The soft failures reported for this test, including those collected
    /// before a panic.
    pub fn failures(&self) -> &[Failure] {
        match &self.outcome {
            TestOutcome::Failed(failures)
            | TestOutcome::Panicked {
                failures: Some(failures),
                ..
            } => failures.failures(),
            _ => &[],
        }
    }
}

/// Runs test classes against a [`SoftAssertionsBinder`].
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    binder: SoftAssertionsBinder,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binder(binder: SoftAssertionsBinder) -> Self {
        Self { binder }
    }

    pub fn binder(&self) -> &SoftAssertionsBinder {
        &self.binder
    }

    /// Runs every test of `class` and reports each in declaration order.
    ///
    /// A class-level configuration error (bad fields of a per-class
    /// instance) aborts the run before any test starts.
    pub fn run(&self, class: &TestClass) -> Result<Vec<TestResult>> {
        let tree = ContextTree::new();
        let class_ctx = tree.root().child(
            ContextSpec::class(class.name.clone())
                .lifecycle(class.lifecycle)
                .execution_mode(class.mode),
        );

        let shared_fields = if class_ctx.is_per_class() {
            Some(self.binder.post_process_test_instance(&class_ctx, &class.fields)?)
        } else {
            None
        };

        tracing::debug!(
            class = %class.name,
            tests = class.tests.len(),
            concurrent = class_ctx.is_concurrent(),
            "Running test class"
        );

        let results = if class_ctx.is_concurrent() {
            thread::scope(|scope| {
                let handles: Vec<_> = class
                    .tests
                    .iter()
                    .map(|test| {
                        let class_ctx = &class_ctx;
                        let shared = shared_fields.as_deref();
                        scope.spawn(move || self.run_test(class, class_ctx, shared, test))
                    })
                    .collect();
                handles
                    .into_iter()
                    .zip(&class.tests)
                    .map(|(handle, test)| {
                        handle.join().unwrap_or_else(|payload| TestResult {
                            name: test.name.clone(),
                            outcome: TestOutcome::Panicked {
                                message: Failure::from_panic_payload(payload.as_ref()).message,
                                failures: None,
                            },
                        })
                    })
                    .collect()
            })
        } else {
            class
                .tests
                .iter()
                .map(|test| self.run_test(class, &class_ctx, shared_fields.as_deref(), test))
                .collect()
        };

        class_ctx.close();
        Ok(results)
    }

    fn run_test(
        &self,
        class: &TestClass,
        class_ctx: &ExecutionContext,
        shared_fields: Option<&[(String, ProviderInstance)]>,
        test: &TestCase,
    ) -> TestResult {
        let method_ctx = class_ctx.child(ContextSpec::method(test.name.clone()));
        let outcome = self.execute(class, &method_ctx, shared_fields, test);
        method_ctx.close();
        TestResult {
            name: test.name.clone(),
            outcome,
        }
    }

    fn execute(
        &self,
        class: &TestClass,
        method_ctx: &ExecutionContext,
        shared_fields: Option<&[(String, ProviderInstance)]>,
        test: &TestCase,
    ) -> TestOutcome {
        // A pooled thread must leave unbound whichever way the test ends.
        let _unbind = scopeguard::guard((), |()| self.unbind_thread(method_ctx));

        let args = match self.prepare(class, method_ctx, shared_fields, test) {
            Ok(args) => args,
            Err(error) => return TestOutcome::Errored(error),
        };

        let panicked = panic::catch_unwind(AssertUnwindSafe(|| (test.body)(&args)))
            .err()
            .map(|payload| Failure::from_panic_payload(payload.as_ref()).message);
        let finished = self.binder.after_test_execution(method_ctx);

        match (panicked, finished) {
            (None, Ok(())) => TestOutcome::Passed,
            (None, Err(error)) => error.into(),
            (Some(message), Ok(())) => TestOutcome::Panicked {
                message,
                failures: None,
            },
            (Some(message), Err(TestOutcomeError::Failures(failures))) => TestOutcome::Panicked {
                message,
                failures: Some(failures),
            },
            (Some(message), Err(TestOutcomeError::Fatal(error))) => {
                tracing::warn!(test = %test.name, panic = %message, "Test panicked before a fatal binder error");
                TestOutcome::Errored(error)
            }
        }
    }

    fn unbind_thread(&self, method_ctx: &ExecutionContext) {
        if !SoftAssertionsBinder::is_per_class_concurrent(method_ctx) {
            return;
        }
        match self.binder.thread_adapter(method_ctx) {
            Ok(adapter) => {
                adapter.reset();
            }
            Err(error) => {
                tracing::warn!(context = %method_ctx.name(), %error, "Could not unbind test thread");
            }
        }
    }

    fn prepare(
        &self,
        class: &TestClass,
        method_ctx: &ExecutionContext,
        shared_fields: Option<&[(String, ProviderInstance)]>,
        test: &TestCase,
    ) -> Result<TestArgs> {
        let fields = match shared_fields {
            Some(fields) => fields.to_vec(),
            None => self
                .binder
                .post_process_test_instance(method_ctx, &class.fields)?,
        };

        self.binder.before_each(method_ctx)?;

        let mut parameters = Vec::with_capacity(test.parameters.len());
        for parameter in &test.parameters {
            if self.binder.supports_parameter(parameter)? {
                parameters.push(self.binder.resolve_parameter(method_ctx, parameter)?);
            }
        }

        Ok(TestArgs {
            context: method_ctx.clone(),
            fields,
            parameters,
        })
    }
}
