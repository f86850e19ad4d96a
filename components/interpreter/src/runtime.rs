//! Runtime construction
//!
//! A [`Runtime`] owns the state shared by all of its contexts: the limits,
//! the collaborators (bytecode executor, metamethod lookup, collector), the
//! panic hook and the preallocated sentinel error objects. It also owns the
//! main context, which can never yield.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use core_types::{ConfigError, RuntimeConfig, Status};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::coroutine::ThreadRef;
use crate::error::RuntimeError;
use crate::gc_integration::{Collector, NoCollector};
use crate::metatable::{MetamethodLookup, UserDataMetamethods};
use crate::value::Value;
use crate::vm::{BytecodeExecutor, RegisterVm};

/// Last chance to react to an error nothing handled; the runtime panics
/// after it returns.
pub type PanicHook = Rc<dyn Fn(&ExecutionContext, &RuntimeError)>;

/// State shared by every context of a runtime
pub struct GlobalState {
    pub(crate) config: RuntimeConfig,
    pub(crate) executor: Rc<dyn BytecodeExecutor>,
    pub(crate) metamethods: Rc<dyn MetamethodLookup>,
    pub(crate) collector: Rc<dyn Collector>,
    pub(crate) panic_hook: RefCell<Option<PanicHook>>,
    /// Protection depth of the main context
    pub(crate) main_protection: Cell<usize>,
    memory_error: Value,
    error_in_error: Value,
}

impl GlobalState {
    /// Limits in effect
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Replace the panic hook, returning the previous one
    pub fn set_panic_hook(&self, hook: Option<PanicHook>) -> Option<PanicHook> {
        self.panic_hook.replace(hook)
    }

    /// Error object of a status whose objects are fixed messages
    pub(crate) fn sentinel_message(&self, status: Status) -> Value {
        match status {
            Status::MemoryError => self.memory_error.clone(),
            Status::ErrorInErrorHandling => self.error_in_error.clone(),
            other => Value::from(other.to_string()),
        }
    }
}

impl fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalState")
            .field("config", &self.config)
            .field("has_panic_hook", &self.panic_hook.borrow().is_some())
            .field("main_protection", &self.main_protection.get())
            .finish()
    }
}

/// A runtime and its main context
#[derive(Debug)]
pub struct Runtime {
    global: Rc<GlobalState>,
    main: ThreadRef,
}

impl Runtime {
    /// Runtime with default limits and collaborators
    pub fn new() -> Self {
        let global = RuntimeBuilder::new().global_state(RuntimeConfig::default());
        Self::from_global(global)
    }

    /// Start configuring a runtime
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    fn from_global(global: GlobalState) -> Self {
        let global = Rc::new(global);
        let main = ThreadRef::new(ExecutionContext::new(Rc::clone(&global), true));
        main.borrow_mut().stack_ready();
        debug!(max_stack = global.config.max_stack, "runtime created");
        Self { global, main }
    }

    /// The root context
    pub fn main_thread(&self) -> &ThreadRef {
        &self.main
    }

    /// A new coroutine context; push its body (and arguments) before the
    /// first resume
    pub fn new_thread(&self) -> ThreadRef {
        ThreadRef::new(ExecutionContext::new(Rc::clone(&self.global), false))
    }

    /// Limits in effect
    pub fn config(&self) -> &RuntimeConfig {
        &self.global.config
    }

    /// Shared state
    pub fn global(&self) -> &Rc<GlobalState> {
        &self.global
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Runtime`]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    executor: Rc<dyn BytecodeExecutor>,
    metamethods: Rc<dyn MetamethodLookup>,
    collector: Rc<dyn Collector>,
    panic_hook: Option<PanicHook>,
}

impl RuntimeBuilder {
    /// Defaults: default limits, [`RegisterVm`], userdata metatables and no
    /// collector
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            executor: Rc::new(RegisterVm),
            metamethods: Rc::new(UserDataMetamethods),
            collector: Rc::new(NoCollector),
            panic_hook: None,
        }
    }

    /// Limits to use
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Executor for interpreted frames
    pub fn executor(mut self, executor: Rc<dyn BytecodeExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Metamethod source
    pub fn metamethods(mut self, metamethods: Rc<dyn MetamethodLookup>) -> Self {
        self.metamethods = metamethods;
        self
    }

    /// Collector notified at safe points
    pub fn collector(mut self, collector: Rc<dyn Collector>) -> Self {
        self.collector = collector;
        self
    }

    /// Hook run before the runtime panics on an unhandled error
    pub fn panic_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ExecutionContext, &RuntimeError) + 'static,
    {
        self.panic_hook = Some(Rc::new(hook));
        self
    }

    fn global_state(self, config: RuntimeConfig) -> GlobalState {
        GlobalState {
            config,
            executor: self.executor,
            metamethods: self.metamethods,
            collector: self.collector,
            panic_hook: RefCell::new(self.panic_hook),
            main_protection: Cell::new(0),
            memory_error: Value::from(Status::MemoryError.sentinel_message().unwrap_or_default()),
            error_in_error: Value::from(
                Status::ErrorInErrorHandling
                    .sentinel_message()
                    .unwrap_or_default(),
            ),
        }
    }

    /// Validate the configuration and build the runtime
    pub fn build(self) -> Result<Runtime, ConfigError> {
        self.config.validate()?;
        let config = self.config.clone();
        Ok(Runtime::from_global(self.global_state(config)))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("has_panic_hook", &self.panic_hook.is_some())
            .finish()
    }
}
