//! Runtime context: everything a script run needs, resolved up front.
//!
//! The front end (or a test) hands the interpreter a finished context:
//! the top-level statements, every callable block by name, the shared
//! environment, and any globals the host wants seeded before line one.

use std::path::PathBuf;
use std::sync::Arc;

use ebs_ast::{BlockStatement, Statement};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{Environment, Value};

pub struct RuntimeContext {
    pub name: SmolStr,
    pub source_path: Option<PathBuf>,
    pub statements: Vec<Statement>,
    /// Callable blocks by name, pre-resolved; no import machinery runs
    /// at execution time.
    pub blocks: FxHashMap<SmolStr, Arc<BlockStatement>>,
    pub environment: Arc<Environment>,
    /// Bindings defined in the base scope before execution starts.
    pub globals: Vec<(SmolStr, Value)>,
}

impl RuntimeContext {
    pub fn new(name: impl Into<SmolStr>, statements: Vec<Statement>) -> Self {
        RuntimeContext {
            name: name.into(),
            source_path: None,
            statements,
            blocks: FxHashMap::default(),
            environment: Arc::new(Environment::new()),
            globals: Vec::new(),
        }
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = environment;
        self
    }

    /// Register a callable block. Blocks registered here are reachable
    /// from any call site by name.
    pub fn add_block(mut self, block: BlockStatement) -> Self {
        if let Some(name) = block.name.clone() {
            self.blocks.insert(name, Arc::new(block));
        }
        self
    }

    /// Seed a global binding defined before the first statement runs.
    pub fn seed_global(mut self, name: impl Into<SmolStr>, value: Value) -> Self {
        self.globals.push((name.into(), value));
        self
    }
}
