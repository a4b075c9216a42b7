//! Thread-safe tree-walking interpreter for the EBS scripting language.
//!
//! Executes pre-built syntax trees directly. The environment model is safe
//! to share across threads: handler threads fork their own scope chains on
//! top of a shared base scope and keep independent call stacks.

use ebs_ast::ErrorCategory;
use smol_str::SmolStr;
use thiserror::Error;

mod array;
mod builtins;
mod context;
mod db;
mod environment;
mod eval;
mod ui;
mod value;

pub use array::EbsArray;
pub use builtins::{BuiltinHost, BuiltinRegistry, ParamSpec};
pub use context::RuntimeContext;
pub use db::{DbAdapter, DbConnection, DbCursor, MemoryAdapter, NoopAdapter};
pub use environment::{AssignError, Environment, Scope, StackFrame};
pub use eval::Interpreter;
pub use ui::{NoopUiHost, UiHost};
pub use value::{check_data_type, convert_value, default_value, stringify, Value};

/// Fine-grained classification of runtime failures. The classification
/// drives handler matching in `try` statements via [`ErrorCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UndefinedVariable,
    TypeMismatch,
    IndexOutOfRange,
    ArrayCapacityExceeded,
    Iteration,
    DivisionByZero,
    UnresolvedCall,
    ConditionType,
    ReturnTypeMismatch,
    Io,
    Db,
    Ui,
    /// Raised explicitly by a script `raise` statement.
    Raised(ErrorCategory),
    /// Catch-all for failures with no finer classification.
    Runtime,
}

impl ErrorKind {
    /// Category used when matching this error against a handler arm.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::UndefinedVariable => ErrorCategory::NullError,
            ErrorKind::TypeMismatch
            | ErrorKind::ConditionType
            | ErrorKind::ReturnTypeMismatch
            | ErrorKind::Iteration => ErrorCategory::TypeError,
            ErrorKind::IndexOutOfRange | ErrorKind::ArrayCapacityExceeded => {
                ErrorCategory::IndexError
            }
            ErrorKind::DivisionByZero => ErrorCategory::MathError,
            ErrorKind::UnresolvedCall => ErrorCategory::NotFoundError,
            ErrorKind::Io | ErrorKind::Ui => ErrorCategory::IoError,
            ErrorKind::Db => ErrorCategory::DbError,
            ErrorKind::Raised(category) => *category,
            ErrorKind::Runtime => ErrorCategory::AnyError,
        }
    }
}

/// A runtime error with the source line and a snapshot of the failing
/// thread's call stack at the moment it was raised.
#[derive(Error, Debug, Clone)]
#[error("Runtime error on line {line} : {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: u32,
    pub stack: Vec<StackFrame>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, line: u32, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            line,
            stack: Vec::new(),
        }
    }

    /// Category used for handler matching.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Render the captured call stack, innermost frame first.
    pub fn render_stack(&self) -> String {
        let mut out = String::new();
        for frame in &self.stack {
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out
    }
}

/// Result type for interpreter operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Unwind signals produced by statement execution. `Break`, `Continue`,
/// and `Return` propagate outward through the ordinary return path until
/// a loop or a matching block consumes them.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return {
        value: Value,
        /// Name of the block this return targets, if any.
        function: Option<SmolStr>,
    },
}

impl Flow {
    pub fn is_normal(&self) -> bool {
        matches!(self, Flow::Normal)
    }
}

/// Destination for script output. The `print` statement writes here
/// unconditionally; statement echoing also goes through the sink when
/// the environment's echo flag is on.
pub trait OutputSink: Send + Sync {
    fn print(&self, text: &str);
}

/// Default sink writing lines to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn print(&self, text: &str) {
        println!("{}", text);
    }
}
