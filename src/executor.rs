//! Transaction executor: deploy/invoke dispatch and host bindings.
//!
//! This is the enforcement mechanism of the engine. It resolves each
//! transaction into a contract run, builds the per-run host bindings the
//! sandbox exposes to contract code, and folds every failure into a soft
//! error record; block production never aborts on a bad transaction.
//!
//! ## Deployment
//!
//! A deployment targets the pseudo-contract `contract` with action `deploy`.
//! The base64 source from the payload is wrapped in a dispatch template that
//! declares an `actions` map, injects the user code, and invokes the handler
//! named by the current action. The wrapped source is compiled once and
//! cached; the bootstrap run executes with the reserved action `create`.
//!
//! ## Invocation
//!
//! An invocation resolves the registry entry, parses the payload, and runs
//! the cached artifact with the invoke bindings. `execute_smart_contract`
//! re-enters the executor depth-first: the original sender is propagated,
//! events merge into the outer sink in emission order, and the top-level
//! deadline is shared so reentrancy cannot stretch the quantum.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::registry::{ContractEntry, ContractRegistry, DuplicateContract};
use crate::sandbox::{Artifact, Sandbox, SandboxError};
use crate::store::{table_name, StateStore};
use crate::types::Transaction;
use crate::{DEPLOY_ACTION, DEPLOY_TARGET, RESERVED_ACTION};

/// An event emitted by contract code via `emit`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name
    pub event: String,
    /// Event data, deep-copied out of the sandbox
    pub data: Value,
}

/// Contract-level execution failures.
///
/// All of these are soft: they are serialised into the transaction's logs
/// and recorded in the block, never raised out of block production.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Transaction missing sender, contract, or action
    #[error("the parameters sender, contract and action are required")]
    MissingOperands,
    /// Attempt to invoke the reserved bootstrap action
    #[error("you cannot trigger the create action")]
    ReservedAction,
    /// Invocation target not in the registry
    #[error("contract doesn't exist")]
    UnknownContract,
    /// Deployment under a name that is already registered
    #[error("contract already exists")]
    DuplicateContract,
    /// Deploy payload missing `name` or `code`, or with wrong types
    #[error("parameters name and code are mandatory to deploy a contract")]
    BadDeployPayload,
    /// Sandbox fault: compile error, runtime fault, or timeout
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl From<DuplicateContract> for ExecError {
    fn from(_: DuplicateContract) -> Self {
        Self::DuplicateContract
    }
}

impl ExecError {
    /// Serialise into the transaction log record
    fn to_logs(&self) -> Value {
        match self {
            Self::Sandbox(fault) => {
                json!({ "error": { "name": fault.name(), "message": fault.message() } })
            }
            other => json!({ "error": other.to_string() }),
        }
    }

    /// Raise inside a calling script as a runtime error
    fn into_eval_error(self) -> Box<EvalAltResult> {
        Box::new(EvalAltResult::ErrorRuntime(
            self.to_string().into(),
            Position::NONE,
        ))
    }
}

/// Shared state of one top-level contract run and its nested calls
#[derive(Clone)]
struct RunContext {
    /// Wall-clock deadline, shared across reentrant calls
    deadline: Instant,
    /// Event sink; nested calls merge into it in emission order
    events: Rc<RefCell<Vec<Event>>>,
    /// Reentrancy depth of this run
    depth: usize,
}

impl RunContext {
    fn top_level(deadline: Instant) -> Self {
        Self {
            deadline,
            events: Rc::new(RefCell::new(Vec::new())),
            depth: 0,
        }
    }

    fn nested(&self) -> Self {
        Self {
            deadline: self.deadline,
            events: Rc::clone(&self.events),
            depth: self.depth + 1,
        }
    }

    fn take_events(&self) -> Vec<Event> {
        self.events.take()
    }
}

/// Executes transactions against the state store via the sandbox
pub struct Executor {
    store: Rc<RefCell<StateStore>>,
    registry: ContractRegistry,
    sandbox: Sandbox,
    /// Compiled artifacts keyed by contract name; rebuilt from registry
    /// source on miss, cleared on replay
    artifacts: RefCell<HashMap<String, Artifact>>,
    max_call_depth: usize,
}

impl Executor {
    /// Create an executor over the chain's store.
    ///
    /// Returned behind `Rc` because reentrant host bindings re-enter the
    /// executor from inside a contract run.
    #[must_use]
    pub fn new(
        store: Rc<RefCell<StateStore>>,
        quantum: Duration,
        max_call_depth: usize,
    ) -> Rc<Self> {
        let registry = ContractRegistry::new(Rc::clone(&store));
        Rc::new(Self {
            store,
            registry,
            sandbox: Sandbox::new(quantum),
            artifacts: RefCell::new(HashMap::new()),
            max_call_depth,
        })
    }

    /// The contract registry view
    #[must_use]
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Drop all cached artifacts. Called before replay; sources in the
    /// registry recompile deterministically on demand.
    pub fn clear_artifacts(&self) {
        self.artifacts.borrow_mut().clear();
    }

    /// Execute one transaction and return its log record as JSON text.
    ///
    /// Never fails: every error is folded into an `{"error": …}` record.
    pub fn execute(self: &Rc<Self>, tx: &Transaction) -> String {
        let logs = match self.dispatch(tx) {
            Ok(events) => json!({ "events": events }),
            Err(err) => {
                debug!(
                    target: "emberchain::executor",
                    tx = %tx.transaction_id,
                    error = %err,
                    "transaction failed"
                );
                err.to_logs()
            }
        };
        logs.to_string()
    }

    fn dispatch(self: &Rc<Self>, tx: &Transaction) -> Result<Vec<Event>, ExecError> {
        let (Some(sender), Some(contract), Some(action)) = (
            tx.sender.as_deref(),
            tx.contract.as_deref(),
            tx.action.as_deref(),
        ) else {
            return Err(ExecError::MissingOperands);
        };

        debug!(
            target: "emberchain::executor",
            tx = %tx.transaction_id,
            sender,
            contract,
            action,
            "executing transaction"
        );

        if contract == DEPLOY_TARGET && action == DEPLOY_ACTION {
            self.deploy(sender, tx.payload.as_deref())
        } else {
            self.invoke(sender, contract, action, tx.payload.as_deref())
        }
    }

    /// Deploy a new contract: validate the manifest, compile the wrapped
    /// source, run the `create` bootstrap, and register the entry with the
    /// tables the bootstrap created. A faulting bootstrap registers nothing.
    fn deploy(self: &Rc<Self>, sender: &str, payload: Option<&str>) -> Result<Vec<Event>, ExecError> {
        let raw = payload.ok_or(ExecError::BadDeployPayload)?;
        let manifest: Value = serde_json::from_str(raw)
            .map_err(|err| SandboxError::Runtime(format!("invalid deploy payload: {err}")))?;

        let name = manifest
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());
        let code = manifest.get("code").and_then(Value::as_str);
        let (Some(name), Some(code)) = (name, code) else {
            return Err(ExecError::BadDeployPayload);
        };

        if self.registry.contains(name) {
            return Err(ExecError::DuplicateContract);
        }

        let source = decode_source(code)?;
        let wrapped = wrap_dispatch(&source);
        let artifact = self.sandbox.compile(&wrapped)?;

        let params = manifest.get("params").cloned().unwrap_or(Value::Null);
        let ctx = RunContext::top_level(self.sandbox.deadline());
        let pending_tables = Rc::new(RefCell::new(Vec::new()));

        // `sender` and `owner` are absent from the deploy host surface, but
        // handlers created during the bootstrap may still capture the names;
        // they must exist in scope, as unit, for every run of the script.
        let mut scope = Scope::new();
        scope.push_constant_dynamic("sender", Dynamic::UNIT);
        scope.push_constant_dynamic("owner", Dynamic::UNIT);
        scope.push_constant("action", RESERVED_ACTION.to_string());
        scope.push_dynamic("payload", json_to_dynamic(&params)?);

        self.sandbox.run(&artifact, &mut scope, ctx.deadline, |engine| {
            self.install_common(engine, &ctx, sender);
            self.install_deploy_tables(engine, name, &pending_tables);
        })?;

        let entry = ContractEntry {
            name: name.to_string(),
            owner: sender.to_string(),
            code: wrapped,
            tables: pending_tables.take(),
        };
        self.registry.insert(&entry)?;
        self.artifacts.borrow_mut().insert(entry.name.clone(), artifact);

        info!(
            target: "emberchain::executor",
            contract = %entry.name,
            owner = %entry.owner,
            tables = entry.tables.len(),
            "contract deployed"
        );

        Ok(ctx.take_events())
    }

    /// Top-level invocation of a deployed contract
    fn invoke(
        self: &Rc<Self>,
        sender: &str,
        contract: &str,
        action: &str,
        payload: Option<&str>,
    ) -> Result<Vec<Event>, ExecError> {
        let ctx = RunContext::top_level(self.sandbox.deadline());
        let entry = self.resolve(contract, action, &ctx)?;
        let payload = parse_payload(payload)?;
        self.run_invoke(sender, action, &entry, &payload, &ctx)?;
        Ok(ctx.take_events())
    }

    /// Reentrant invocation from inside a contract run
    fn invoke_nested(
        self: &Rc<Self>,
        sender: &str,
        contract: &str,
        action: &str,
        payload: &Value,
        ctx: &RunContext,
    ) -> Result<(), ExecError> {
        let entry = self.resolve(contract, action, ctx)?;
        self.run_invoke(sender, action, &entry, payload, ctx)
    }

    /// Shared invocation checks: depth cap, reserved action, registry lookup
    fn resolve(
        &self,
        contract: &str,
        action: &str,
        ctx: &RunContext,
    ) -> Result<ContractEntry, ExecError> {
        if ctx.depth >= self.max_call_depth {
            return Err(
                SandboxError::Runtime("maximum contract call depth exceeded".to_string()).into(),
            );
        }
        if action == RESERVED_ACTION {
            return Err(ExecError::ReservedAction);
        }
        self.registry.get(contract).ok_or(ExecError::UnknownContract)
    }

    fn run_invoke(
        self: &Rc<Self>,
        sender: &str,
        action: &str,
        entry: &ContractEntry,
        payload: &Value,
        ctx: &RunContext,
    ) -> Result<(), ExecError> {
        let artifact = self.artifact_for(entry)?;

        let mut scope = Scope::new();
        scope.push_constant("sender", sender.to_string());
        scope.push_constant("owner", entry.owner.clone());
        scope.push_constant("action", action.to_string());
        scope.push_dynamic("payload", json_to_dynamic(payload)?);

        self.sandbox
            .run(&artifact, &mut scope, ctx.deadline, |engine| {
                self.install_common(engine, ctx, sender);
                self.install_invoke_tables(engine, &entry.name);
            })
            .map_err(ExecError::from)
    }

    /// Cached artifact for a registry entry, compiling on miss
    fn artifact_for(&self, entry: &ContractEntry) -> Result<Artifact, ExecError> {
        if let Some(artifact) = self.artifacts.borrow().get(&entry.name) {
            return Ok(artifact.clone());
        }
        let artifact = self.sandbox.compile(&entry.code)?;
        self.artifacts
            .borrow_mut()
            .insert(entry.name.clone(), artifact.clone());
        Ok(artifact)
    }

    /// Bindings present in every run: table handle methods, cross-contract
    /// reads, `emit`, and reentrant `execute_smart_contract`
    fn install_common(self: &Rc<Self>, engine: &mut Engine, ctx: &RunContext, sender: &str) {
        engine
            .register_type_with_name::<TableHandle>("Table")
            .register_fn("insert", TableHandle::insert)
            .register_fn("find", TableHandle::find)
            .register_fn("find_one", TableHandle::find_one)
            .register_fn("update", TableHandle::update);

        let store = Rc::clone(&self.store);
        engine.register_fn(
            "find_in_table",
            move |contract: &str, table: &str, query: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
                let query = dynamic_to_json(&query)?;
                let name = table_name(contract, table);
                let rows = store
                    .borrow()
                    .collection(&name)
                    .map(|collection| collection.find(&query))
                    .unwrap_or_default();
                rhai::serde::to_dynamic(rows)
            },
        );

        let store = Rc::clone(&self.store);
        engine.register_fn(
            "find_one_in_table",
            move |contract: &str, table: &str, query: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
                let query = dynamic_to_json(&query)?;
                let name = table_name(contract, table);
                let row = store
                    .borrow()
                    .collection(&name)
                    .and_then(|collection| collection.find_one(&query));
                rhai::serde::to_dynamic(row)
            },
        );

        let events = Rc::clone(&ctx.events);
        engine.register_fn(
            "emit",
            move |event: &str, data: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let data = dynamic_to_json(&data)?;
                events.borrow_mut().push(Event {
                    event: event.to_string(),
                    data,
                });
                Ok(())
            },
        );

        let exec = Rc::clone(self);
        let nested = ctx.nested();
        let sender = sender.to_string();
        engine.register_fn(
            "execute_smart_contract",
            move |contract: &str, action: &str, payload: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let payload = if payload.is_unit() {
                    json!({})
                } else {
                    dynamic_to_json(&payload)?
                };
                exec.invoke_nested(&sender, contract, action, &payload, &nested)
                    .map_err(ExecError::into_eval_error)
            },
        );
    }

    /// Deploy-run table bindings: `create_table` records into the pending
    /// set that seeds the new registry entry. `get_table` is absent because
    /// the entry does not exist yet.
    fn install_deploy_tables(
        &self,
        engine: &mut Engine,
        contract: &str,
        pending: &Rc<RefCell<Vec<String>>>,
    ) {
        let store = Rc::clone(&self.store);
        let pending = Rc::clone(pending);
        let contract = contract.to_string();
        engine.register_fn("create_table", move |name: &str| -> Dynamic {
            let qualified = table_name(&contract, name);
            store.borrow_mut().create_collection(&qualified);
            let mut recorded = pending.borrow_mut();
            if !recorded.iter().any(|table| table == &qualified) {
                recorded.push(qualified.clone());
            }
            Dynamic::from(TableHandle::new(Rc::clone(&store), qualified))
        });
    }

    /// Invoke-run table bindings. `create_table` stays namespaced under the
    /// executing contract and records into its owned set; `get_table` hands
    /// out a handle only for tables that set contains.
    fn install_invoke_tables(&self, engine: &mut Engine, contract: &str) {
        let store = Rc::clone(&self.store);
        let registry = self.registry.clone();
        let owner_contract = contract.to_string();
        engine.register_fn("create_table", move |name: &str| -> Dynamic {
            let qualified = table_name(&owner_contract, name);
            store.borrow_mut().create_collection(&qualified);
            registry.record_table(&owner_contract, &qualified);
            Dynamic::from(TableHandle::new(Rc::clone(&store), qualified))
        });

        let store = Rc::clone(&self.store);
        let registry = self.registry.clone();
        let owner_contract = contract.to_string();
        engine.register_fn("get_table", move |name: &str| -> Dynamic {
            let qualified = table_name(&owner_contract, name);
            let owned = registry
                .get(&owner_contract)
                .is_some_and(|entry| entry.tables.iter().any(|table| table == &qualified));
            if owned {
                Dynamic::from(TableHandle::new(Rc::clone(&store), qualified))
            } else {
                Dynamic::UNIT
            }
        });
    }
}

/// Handle to a single table, passed into contract code by value
#[derive(Clone)]
struct TableHandle {
    store: Rc<RefCell<StateStore>>,
    name: String,
}

impl TableHandle {
    fn new(store: Rc<RefCell<StateStore>>, name: String) -> Self {
        Self { store, name }
    }

    fn insert(&mut self, doc: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let doc = dynamic_to_json(&doc)?;
        self.store
            .borrow_mut()
            .create_collection(&self.name)
            .insert(doc);
        Ok(())
    }

    fn find(&mut self, query: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
        let query = dynamic_to_json(&query)?;
        let rows = self
            .store
            .borrow()
            .collection(&self.name)
            .map(|collection| collection.find(&query))
            .unwrap_or_default();
        rhai::serde::to_dynamic(rows)
    }

    fn find_one(&mut self, query: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
        let query = dynamic_to_json(&query)?;
        let row = self
            .store
            .borrow()
            .collection(&self.name)
            .and_then(|collection| collection.find_one(&query));
        rhai::serde::to_dynamic(row)
    }

    fn update(&mut self, query: Dynamic, doc: Dynamic) -> Result<i64, Box<EvalAltResult>> {
        let query = dynamic_to_json(&query)?;
        let doc = dynamic_to_json(&doc)?;
        let replaced = self
            .store
            .borrow_mut()
            .collection_mut(&self.name)
            .map(|collection| collection.update(&query, &doc))
            .unwrap_or(0);
        Ok(i64::try_from(replaced).unwrap_or(i64::MAX))
    }
}

/// Wrap user source in the dispatch template: declare the `actions` map,
/// inject the code, and call the handler named by the current action.
fn wrap_dispatch(source: &str) -> String {
    format!(
        "let actions = #{{}};\n\
         {source}\n\
         if action in actions && type_of(actions[action]) == \"Fn\" {{\n\
             let handler = actions[action];\n\
             handler.call(payload);\n\
         }}\n"
    )
}

/// Decode base64 contract source into UTF-8 text
fn decode_source(code: &str) -> Result<String, ExecError> {
    let bytes = BASE64
        .decode(code)
        .map_err(|err| SandboxError::Compile(format!("contract code is not valid base64: {err}")))?;
    let source = String::from_utf8(bytes)
        .map_err(|err| SandboxError::Compile(format!("contract code is not valid UTF-8: {err}")))?;
    Ok(source)
}

/// Parse an invoke payload: null or empty means `{}`; anything else must be
/// a JSON object.
fn parse_payload(raw: Option<&str>) -> Result<Value, ExecError> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(json!({}));
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| SandboxError::Runtime(format!("invalid payload: {err}")))?;
    match value {
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(value),
        _ => Err(SandboxError::Runtime("payload must be a JSON object".to_string()).into()),
    }
}

/// Deep copy out of the sandbox: sandbox values to JSON
fn dynamic_to_json(value: &Dynamic) -> Result<Value, Box<EvalAltResult>> {
    rhai::serde::from_dynamic(value)
}

/// Deep copy into the sandbox: JSON to sandbox values
fn json_to_dynamic(value: &Value) -> Result<Dynamic, SandboxError> {
    rhai::serde::to_dynamic(value).map_err(|err| SandboxError::Runtime(err.to_string()))
}
