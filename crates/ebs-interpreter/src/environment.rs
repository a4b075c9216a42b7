//! Scope chain and execution environment.
//!
//! A `Scope` is one link of a lexical chain; lookups walk outward through
//! the enclosing links. The `Environment` owns the shared base scope and
//! gives every thread its own scope-chain override and call stack, so
//! handler threads can fork local scopes without disturbing the script
//! thread.

use std::fmt;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::{DashMap, DashSet};
use ebs_ast::StatementKind;
use smol_str::SmolStr;

use crate::value::stringify;
use crate::Value;

/// Why an assignment did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    /// No scope on the chain defines the name.
    Undefined,
    /// The name is bound as a constant.
    Const,
}

/// One link of the scope chain. Bindings are concurrent so values defined
/// in the shared base scope can be read and written from any thread.
#[derive(Debug, Default)]
pub struct Scope {
    values: DashMap<SmolStr, Value>,
    consts: DashSet<SmolStr>,
    enclosing: Option<Arc<Scope>>,
}

impl Scope {
    /// Root scope with no enclosing link.
    pub fn new() -> Self {
        Scope::default()
    }

    /// Child scope linked to the given enclosing scope.
    pub fn with_enclosing(enclosing: Arc<Scope>) -> Self {
        Scope {
            values: DashMap::new(),
            consts: DashSet::new(),
            enclosing: Some(enclosing),
        }
    }

    pub fn enclosing(&self) -> Option<&Arc<Scope>> {
        self.enclosing.as_ref()
    }

    /// Define a binding in this scope, shadowing any outer binding of the
    /// same name. Redefining an existing local binding overwrites it.
    pub fn define(&self, name: SmolStr, value: Value) {
        self.consts.remove(&name);
        self.values.insert(name, value);
    }

    /// Define a constant binding; later assignments fail.
    pub fn define_const(&self, name: SmolStr, value: Value) {
        self.values.insert(name.clone(), value);
        self.consts.insert(name);
    }

    /// Read a binding, searching outward through enclosing scopes.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        self.enclosing.as_ref().and_then(|outer| outer.get(name))
    }

    /// Check for a binding anywhere on the chain.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
            || self
                .enclosing
                .as_ref()
                .is_some_and(|outer| outer.contains(name))
    }

    /// Overwrite the nearest existing binding. Never creates one.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        if self.values.contains_key(name) {
            if self.consts.contains(name) {
                return Err(AssignError::Const);
            }
            self.values.insert(name.into(), value);
            return Ok(());
        }
        match &self.enclosing {
            Some(outer) => outer.assign(name, value),
            None => Err(AssignError::Undefined),
        }
    }

    /// Names bound in this scope only.
    pub fn local_names(&self) -> Vec<SmolStr> {
        self.values.iter().map(|e| e.key().clone()).collect()
    }
}

/// One frame of a thread's call stack. The message may contain `%1`,
/// `%2`, ... placeholders filled from `values` when rendered.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub line: u32,
    pub kind: StatementKind,
    pub message: SmolStr,
    pub values: Vec<Value>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut message = self.message.to_string();
        for (i, value) in self.values.iter().enumerate() {
            let placeholder = format!("%{}", i + 1);
            if message.contains(&placeholder) {
                message = message.replace(&placeholder, &stringify(value));
            }
        }
        write!(f, "line {} {} : {}", self.line, self.kind.name(), message)
    }
}

/// Shared execution environment: one base scope, per-thread scope-chain
/// overrides, per-thread call stacks, process-wide flags and the open-file
/// registry.
#[derive(Debug, Default)]
pub struct Environment {
    base: Arc<Scope>,
    overrides: DashMap<ThreadId, Arc<Scope>>,
    call_stacks: DashMap<ThreadId, Vec<StackFrame>>,
    echo: AtomicBool,
    debug: AtomicBool,
    open_files: DashMap<SmolStr, File>,
}

impl Environment {
    pub fn new() -> Self {
        Environment::default()
    }

    /// The calling thread's current scope: its override if it pushed one,
    /// otherwise the shared base.
    pub fn values(&self) -> Arc<Scope> {
        let id = thread::current().id();
        match self.overrides.get(&id) {
            Some(scope) => scope.clone(),
            None => self.base.clone(),
        }
    }

    /// The shared base scope, regardless of thread overrides.
    pub fn base_values(&self) -> Arc<Scope> {
        self.base.clone()
    }

    /// Push a fresh scope linked to the calling thread's current scope.
    pub fn push_scope(&self) {
        let id = thread::current().id();
        let scope = Arc::new(Scope::with_enclosing(self.values()));
        self.overrides.insert(id, scope);
    }

    /// Pop the calling thread's innermost scope. Falls back to the base
    /// scope when the chain is exhausted; popping past that is a no-op.
    pub fn pop_scope(&self) {
        let id = thread::current().id();
        let Some(current) = self.overrides.get(&id).map(|s| s.clone()) else {
            return;
        };
        match current.enclosing() {
            Some(outer) if !Arc::ptr_eq(outer, &self.base) => {
                self.overrides.insert(id, outer.clone());
            }
            _ => {
                self.overrides.remove(&id);
            }
        }
    }

    /// Push a frame on the calling thread's call stack.
    pub fn push_frame(
        &self,
        line: u32,
        kind: StatementKind,
        message: impl Into<SmolStr>,
        values: Vec<Value>,
    ) {
        let id = thread::current().id();
        self.call_stacks.entry(id).or_default().push(StackFrame {
            line,
            kind,
            message: message.into(),
            values,
        });
    }

    /// Pop the calling thread's innermost frame. An empty stack is not an
    /// error; threads may unwind past their first frame.
    pub fn pop_frame(&self) -> Option<StackFrame> {
        let id = thread::current().id();
        self.call_stacks.get_mut(&id)?.pop()
    }

    /// Snapshot of the calling thread's call stack, innermost frame last.
    pub fn stack_snapshot(&self) -> Vec<StackFrame> {
        let id = thread::current().id();
        self.call_stacks
            .get(&id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Drop every frame of the calling thread's call stack.
    pub fn clear_stack(&self) {
        let id = thread::current().id();
        self.call_stacks.remove(&id);
    }

    pub fn echo(&self) -> bool {
        self.echo.load(Ordering::Relaxed)
    }

    pub fn set_echo(&self, on: bool) {
        self.echo.store(on, Ordering::Relaxed);
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::Relaxed);
    }

    /// Register an open file under a handle name. Any thread may register
    /// or close.
    pub fn register_file(&self, handle: SmolStr, file: File) {
        self.open_files.insert(handle, file);
    }

    /// Close a registered file. Returns false when the handle is unknown,
    /// so a double close is harmless.
    pub fn close_file(&self, handle: &str) -> bool {
        match self.open_files.remove(handle) {
            Some((_, file)) => {
                let _ = file.sync_all();
                true
            }
            None => false,
        }
    }

    /// Best-effort sweep closing every registered file. Individual close
    /// failures are ignored.
    pub fn close_all_files(&self) {
        let handles: Vec<SmolStr> = self.open_files.iter().map(|e| e.key().clone()).collect();
        for handle in handles {
            self.close_file(&handle);
        }
    }
}
