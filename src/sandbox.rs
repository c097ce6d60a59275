//! Isolated execution substrate for untrusted contract code.
//!
//! Contracts are rhai scripts. The sandbox compiles a source string into a
//! reusable [`Artifact`] and runs it against a per-run engine that exposes
//! only what the executor installs: a raw engine seeded with the core,
//! string, array, map, and math packages. Time facilities stay out of the
//! sandbox so contract runs are deterministic, and a progress hook enforces
//! the wall-clock quantum.
//!
//! Faults are folded into a fixed taxonomy (compile, runtime, timeout) so
//! the log records they produce hash identically on replay.

use std::time::{Duration, Instant};

use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, MoreStringPackage, Package,
};
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};

/// In-script function call nesting limit
const MAX_SCRIPT_CALL_LEVELS: usize = 64;

/// A compiled, reusable contract artifact
#[derive(Clone, Debug)]
pub struct Artifact {
    ast: AST,
}

/// Sandbox faults, normalised for stable serialisation
#[derive(Clone, Debug, thiserror::Error)]
pub enum SandboxError {
    /// Source failed to compile
    #[error("compile error: {0}")]
    Compile(String),
    /// Execution raised a fault
    #[error("runtime error: {0}")]
    Runtime(String),
    /// Execution exceeded the wall-clock quantum
    #[error("contract execution exceeded the {}s quantum", .0.as_secs())]
    Timeout(Duration),
}

impl SandboxError {
    /// Taxonomy name carried into transaction logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Compile(_) => "CompileError",
            Self::Runtime(_) => "RuntimeError",
            Self::Timeout(_) => "Timeout",
        }
    }

    /// Message carried into transaction logs.
    ///
    /// The timeout message is a fixed string: quantum expiry depends on wall
    /// time, so its wording must not.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Compile(message) | Self::Runtime(message) => message.clone(),
            Self::Timeout(_) => "contract execution exceeded the execution quantum".to_string(),
        }
    }
}

/// Bounded-time executor of compiled contract artifacts
pub struct Sandbox {
    quantum: Duration,
}

impl Sandbox {
    /// Create a sandbox enforcing `quantum` per top-level run
    #[must_use]
    pub fn new(quantum: Duration) -> Self {
        Self { quantum }
    }

    /// The wall-clock ceiling per top-level run
    #[must_use]
    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    /// Deadline for a top-level run starting now
    #[must_use]
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.quantum
    }

    /// Compile `source` into a reusable artifact
    pub fn compile(&self, source: &str) -> Result<Artifact, SandboxError> {
        let engine = self.sealed_engine();
        let ast = engine
            .compile(source)
            .map_err(|err| SandboxError::Compile(err.to_string()))?;
        Ok(Artifact { ast })
    }

    /// Run a compiled artifact until completion or `deadline`.
    ///
    /// `install` registers the host bindings for this run on a fresh engine;
    /// nothing registered survives the run. Nested contract calls share the
    /// top-level deadline, so a reentrant chain cannot stretch the quantum.
    pub fn run(
        &self,
        artifact: &Artifact,
        scope: &mut Scope<'_>,
        deadline: Instant,
        install: impl FnOnce(&mut Engine),
    ) -> Result<(), SandboxError> {
        let mut engine = self.sealed_engine();
        engine.on_progress(move |_operations| {
            if Instant::now() >= deadline {
                Some(Dynamic::from("quantum exceeded"))
            } else {
                None
            }
        });
        install(&mut engine);

        engine
            .run_ast_with_scope(scope, &artifact.ast)
            .map_err(|err| match *err {
                EvalAltResult::ErrorTerminated(..) => SandboxError::Timeout(self.quantum),
                other => SandboxError::Runtime(other.to_string()),
            })
    }

    /// A raw engine with sealed globals: core language, strings, arrays,
    /// maps, and math. No time, no I/O, no host reachability beyond what a
    /// run installs. `print`/`debug` drain to the tracing sink.
    fn sealed_engine(&self) -> Engine {
        let mut engine = Engine::new_raw();
        engine.register_global_module(CorePackage::new().as_shared_module());
        engine.register_global_module(MoreStringPackage::new().as_shared_module());
        engine.register_global_module(BasicArrayPackage::new().as_shared_module());
        engine.register_global_module(BasicMapPackage::new().as_shared_module());
        engine.register_global_module(BasicMathPackage::new().as_shared_module());
        engine.set_max_call_levels(MAX_SCRIPT_CALL_LEVELS);
        engine.on_print(|text| tracing::debug!(target: "emberchain::sandbox", "{text}"));
        engine.on_debug(|text, source, position| {
            tracing::debug!(target: "emberchain::sandbox", ?source, ?position, "{text}");
        });
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sandbox() -> Sandbox {
        Sandbox::new(Duration::from_millis(200))
    }

    #[test]
    fn test_compile_error_is_normalised() {
        let err = sandbox().compile("let = ;").unwrap_err();
        assert_eq!(err.name(), "CompileError");
    }

    #[test]
    fn test_run_with_installed_binding() {
        let sandbox = sandbox();
        let artifact = sandbox.compile("note(40 + 2);").unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut scope = Scope::new();
        sandbox
            .run(&artifact, &mut scope, sandbox.deadline(), |engine| {
                engine.register_fn("note", move |value: i64| {
                    sink.borrow_mut().push(value);
                });
            })
            .unwrap();

        assert_eq!(*seen.borrow(), vec![42]);
    }

    #[test]
    fn test_runtime_fault_is_normalised() {
        let sandbox = sandbox();
        let artifact = sandbox.compile("undefined_function();").unwrap();

        let mut scope = Scope::new();
        let err = sandbox
            .run(&artifact, &mut scope, sandbox.deadline(), |_| {})
            .unwrap_err();

        assert_eq!(err.name(), "RuntimeError");
    }

    #[test]
    fn test_timeout_terminates_run() {
        let sandbox = sandbox();
        let artifact = sandbox.compile("let x = 0; loop { x += 1; }").unwrap();

        let mut scope = Scope::new();
        let err = sandbox
            .run(&artifact, &mut scope, sandbox.deadline(), |_| {})
            .unwrap_err();

        assert_eq!(err.name(), "Timeout");
        assert_eq!(err.message(), "contract execution exceeded the execution quantum");
    }

    #[test]
    fn test_scope_constants_are_visible() {
        let sandbox = sandbox();
        let artifact = sandbox.compile("check(greeting);").unwrap();

        let seen = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&seen);
        let mut scope = Scope::new();
        scope.push_constant("greeting", "hello".to_string());
        sandbox
            .run(&artifact, &mut scope, sandbox.deadline(), |engine| {
                engine.register_fn("check", move |value: &str| {
                    *sink.borrow_mut() = value.to_string();
                });
            })
            .unwrap();

        assert_eq!(*seen.borrow(), "hello");
    }
}
