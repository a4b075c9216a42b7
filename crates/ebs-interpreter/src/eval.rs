//! Statement and expression evaluation.
//!
//! The interpreter walks the tree directly. Statements produce a `Flow`
//! so break/continue/return travel outward through the ordinary return
//! path; expressions produce a `Value`. Every error carries the source
//! line and a snapshot of the failing thread's call stack.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use dashmap::{DashMap, DashSet};
use ebs_ast::{
    BinaryOp, BlockStatement, DataType, Expression, Literal, Statement, StatementKind, UnaryOp,
    VarStatement,
};
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;

use crate::array::EbsArray;
use crate::builtins::{BuiltinHost, BuiltinRegistry};
use crate::db::{DbAdapter, DbConnection, DbCursor, NoopAdapter};
use crate::ui::{self, NoopUiHost, UiHost};
use crate::value::{check_data_type, convert_value, string_boolean, stringify};
use crate::{
    AssignError, Environment, ErrorKind, Flow, OutputSink, Result, RuntimeContext, RuntimeError,
    StdoutSink, Value,
};

/// Tree-walking interpreter over a resolved [`RuntimeContext`].
pub struct Interpreter {
    context: RuntimeContext,
    builtins: Arc<dyn BuiltinHost>,
    db: Arc<dyn DbAdapter>,
    ui: Arc<dyn UiHost>,
    out: Arc<dyn OutputSink>,
    connections: DashMap<SmolStr, Box<dyn DbConnection>>,
    cursors: DashMap<SmolStr, Mutex<Box<dyn DbCursor>>>,
    artifacts: DashSet<SmolStr>,
    shutdown: Arc<AtomicBool>,
}

impl Interpreter {
    pub fn new(context: RuntimeContext) -> Self {
        Interpreter {
            context,
            builtins: Arc::new(BuiltinRegistry::new()),
            db: Arc::new(NoopAdapter),
            ui: Arc::new(NoopUiHost),
            out: Arc::new(StdoutSink),
            connections: DashMap::new(),
            cursors: DashMap::new(),
            artifacts: DashSet::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_builtins(mut self, builtins: Arc<dyn BuiltinHost>) -> Self {
        self.builtins = builtins;
        self
    }

    pub fn with_db(mut self, db: Arc<dyn DbAdapter>) -> Self {
        self.db = db;
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiHost>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_output(mut self, out: Arc<dyn OutputSink>) -> Self {
        self.out = out;
        self
    }

    pub fn env(&self) -> &Arc<Environment> {
        &self.context.environment
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Flag checked cooperatively inside loops and between top-level
    /// statements; handler threads are stopped by setting it.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, AtomicOrdering::Relaxed);
    }

    /// Run the script from its first statement. A top-level `return`
    /// ends the run; break/continue at top level are errors.
    pub fn interpret(&self) -> Result<()> {
        let env = self.env();
        tracing::debug!(script = %self.context.name, "interpret");

        env.clear_stack();
        env.push_frame(
            0,
            StatementKind::Script,
            "script %1",
            vec![Value::Str(self.context.name.clone())],
        );
        let base = env.base_values();
        base.define("__name__".into(), Value::Str(self.context.name.clone()));
        if let Some(path) = &self.context.source_path {
            base.define(
                "__source__".into(),
                Value::Str(path.to_string_lossy().to_string().into()),
            );
        }
        for (name, value) in &self.context.globals {
            base.define(name.clone(), value.clone());
        }

        let result = self.run_script();
        env.pop_frame();
        result
    }

    fn run_script(&self) -> Result<()> {
        for stmt in &self.context.statements {
            if self.shutdown.load(AtomicOrdering::Relaxed) {
                return Err(self.error(ErrorKind::Runtime, stmt.line(), "Execution interrupted."));
            }
            match self.exec(stmt)? {
                Flow::Normal => {}
                Flow::Return { .. } => break,
                Flow::Break => {
                    return Err(self.error(ErrorKind::Runtime, stmt.line(), "'break' outside loop."))
                }
                Flow::Continue => {
                    return Err(self.error(
                        ErrorKind::Runtime,
                        stmt.line(),
                        "'continue' outside loop.",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Close every open cursor, connection, and file. Individual close
    /// failures are swallowed; teardown always finishes the sweep.
    pub fn cleanup(&self) {
        let cursor_names: Vec<SmolStr> = self.cursors.iter().map(|e| e.key().clone()).collect();
        for name in cursor_names {
            if let Some((_, cursor)) = self.cursors.remove(&name) {
                let mut cursor = cursor.into_inner();
                let _ = cursor.close();
            }
        }
        let connection_names: Vec<SmolStr> =
            self.connections.iter().map(|e| e.key().clone()).collect();
        for name in connection_names {
            if let Some((_, connection)) = self.connections.remove(&name) {
                let _ = connection.close();
            }
        }
        self.env().close_all_files();
    }

    fn error(&self, kind: ErrorKind, line: u32, message: impl Into<String>) -> RuntimeError {
        let mut err = RuntimeError::new(kind, line, message);
        err.stack = self.env().stack_snapshot();
        err
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Execute a statement inside its own call-stack frame, so an error
    /// raised anywhere below snapshots one frame per enclosing
    /// construct. The frame is popped on every exit path.
    fn exec(&self, stmt: &Statement) -> Result<Flow> {
        if self.env().debug() {
            tracing::trace!(line = stmt.line(), kind = stmt.kind().name(), "exec");
        }
        if let Statement::Block(block) = stmt {
            // exec_block pushes the block frame itself.
            let (flow, _) = self.exec_block(block, None)?;
            return Ok(flow);
        }
        let env = self.env();
        let (message, values) = frame_message(stmt);
        env.push_frame(stmt.line(), stmt.kind(), message, values);
        if env.echo() {
            if let Some(frame) = env.stack_snapshot().last() {
                self.out.print(&frame.to_string());
            }
        }
        let result = self.dispatch(stmt);
        env.pop_frame();
        result
    }

    fn dispatch(&self, stmt: &Statement) -> Result<Flow> {
        match stmt {
            Statement::Var(var) => self.exec_var(var),
            Statement::Assign { name, value, line } => {
                let value = self.eval(value)?;
                self.env()
                    .values()
                    .assign(name, value)
                    .map_err(|e| match e {
                        AssignError::Undefined => self.error(
                            ErrorKind::UndefinedVariable,
                            *line,
                            format!("Undefined variable '{}'.", name),
                        ),
                        AssignError::Const => self.error(
                            ErrorKind::TypeMismatch,
                            *line,
                            format!("Cannot reassign constant '{}'.", name),
                        ),
                    })?;
                Ok(Flow::Normal)
            }
            Statement::IndexAssign {
                target,
                value,
                line,
            } => self.exec_index_assign(target, value, *line),
            Statement::Print { value, .. } => {
                let value = self.eval(value)?;
                self.out.print(&stringify(&value));
                Ok(Flow::Normal)
            }
            Statement::Call { name, args, line } => {
                self.call_function(name, args, *line)?;
                Ok(Flow::Normal)
            }
            // Handled in exec before the frame push.
            Statement::Block(block) => {
                let (flow, _) = self.exec_block(block, None)?;
                Ok(flow)
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval_boolean(condition)? {
                    self.exec_branch(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_branch(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Statement::While {
                condition,
                body,
                line,
            } => {
                let mut iterations: i32 = 0;
                loop {
                    self.check_interrupt(*line)?;
                    if !self.eval_boolean(condition)? {
                        break;
                    }
                    iterations = self.bump_loop_counter(iterations, *line)?;
                    match self.exec_branch(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return { .. } => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::DoWhile {
                body,
                condition,
                line,
            } => {
                let mut iterations: i32 = 0;
                loop {
                    self.check_interrupt(*line)?;
                    iterations = self.bump_loop_counter(iterations, *line)?;
                    match self.exec_branch(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return { .. } => return Ok(ret),
                    }
                    if !self.eval_boolean(condition)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::For {
                init,
                condition,
                increment,
                body,
                line,
            } => self.exec_for(init.as_deref(), condition.as_ref(), increment.as_deref(), body, *line),
            Statement::ForEach {
                variable,
                iterable,
                body,
                line,
            } => self.exec_for_each(variable, iterable, body, *line),
            Statement::Break { .. } => Ok(Flow::Break),
            Statement::Continue { .. } => Ok(Flow::Continue),
            Statement::Return {
                value, function, ..
            } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return {
                    value,
                    function: function.clone(),
                })
            }
            Statement::Try { body, handlers, .. } => {
                let env = self.env();
                env.push_scope();
                let result = self.exec_all(body);
                env.pop_scope();
                match result {
                    Ok(flow) => Ok(flow),
                    Err(err) => {
                        for handler in handlers {
                            if handler.category.matches(err.category()) {
                                env.push_scope();
                                if let Some(variable) = &handler.variable {
                                    env.values().define(
                                        variable.clone(),
                                        Value::Str(err.message.clone().into()),
                                    );
                                }
                                let flow = self.exec_all(&handler.body);
                                env.pop_scope();
                                return flow;
                            }
                        }
                        Err(err)
                    }
                }
            }
            Statement::Raise {
                category,
                message,
                line,
            } => {
                let message = stringify(&self.eval(message)?);
                Err(self.error(ErrorKind::Raised(*category), *line, message))
            }
            Statement::Connect { name, spec, line } => {
                let spec = stringify(&self.eval(spec)?);
                let connection = self
                    .db
                    .connect(&spec)
                    .map_err(|m| self.error(ErrorKind::Db, *line, format!("Connect -> {}", m)))?;
                self.connections.insert(name.clone(), connection);
                Ok(Flow::Normal)
            }
            Statement::OpenCursor {
                name,
                connection,
                sql,
                args,
                line,
            } => self.exec_open_cursor(name, connection, sql, args, *line),
            Statement::CloseCursor { name, .. } => {
                // Double close is harmless.
                if let Some((_, cursor)) = self.cursors.remove(name) {
                    let mut cursor = cursor.into_inner();
                    let _ = cursor.close();
                }
                Ok(Flow::Normal)
            }
            Statement::CloseConnection { name, .. } => {
                if let Some((_, connection)) = self.connections.remove(name) {
                    let _ = connection.close();
                }
                Ok(Flow::Normal)
            }
            Statement::Artifact { name, spec, line } => {
                let spec = stringify(&self.eval(spec)?);
                let rx = self.ui.create_artifact(name, &spec);
                ui::await_artifact(rx, ui::CREATE_TIMEOUT)
                    .map_err(|m| self.error(ErrorKind::Ui, *line, m))?;
                self.artifacts.insert(name.clone());
                Ok(Flow::Normal)
            }
            Statement::ArtifactSet {
                artifact,
                property,
                value,
                line,
            } => {
                if !self.artifacts.contains(artifact) {
                    return Err(self.error(
                        ErrorKind::Ui,
                        *line,
                        format!("Artifact '{}' not found.", artifact),
                    ));
                }
                let value = self.eval(value)?;
                self.ui
                    .set_property(artifact, property, &value)
                    .map_err(|m| self.error(ErrorKind::Ui, *line, format!("Set property -> {}", m)))?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_var(&self, var: &VarStatement) -> Result<Flow> {
        let value = match &var.initializer {
            Some(expr) => self.eval(expr)?,
            None => Value::Null,
        };
        let value = match var.var_type {
            Some(ty) => convert_value(ty, value).map_err(|m| {
                self.error(
                    ErrorKind::TypeMismatch,
                    var.line,
                    format!("Variable '{}' -> {}", var.name, m),
                )
            })?,
            None => value,
        };
        let scope = self.env().values();
        if var.is_const {
            scope.define_const(var.name.clone(), value);
        } else {
            scope.define(var.name.clone(), value);
        }
        Ok(Flow::Normal)
    }

    fn exec_index_assign(&self, target: &Expression, value: &Expression, line: u32) -> Result<Flow> {
        let value = self.eval(value)?;
        match target {
            Expression::Property { target, name, .. } => {
                let container = self.eval(target)?;
                let Some(map) = container.as_map() else {
                    return Err(self.error(
                        ErrorKind::TypeMismatch,
                        line,
                        format!(
                            "Cannot set property '{}' on type '{}'.",
                            name,
                            container.type_name()
                        ),
                    ));
                };
                let mut map = map.write();
                let key = match existing_key(&map, name) {
                    Some(key) => key,
                    None => {
                        return Err(self.error(
                            ErrorKind::Runtime,
                            line,
                            format!("Property '{}' does not exist in record.", name),
                        ))
                    }
                };
                map.insert(key, value);
                Ok(Flow::Normal)
            }
            Expression::Index { target, index, .. } => {
                let container = self.eval(target)?;
                let idx = self.eval(index)?;
                self.set_indexed(&container, &idx, value, index_position(target), line)?;
                Ok(Flow::Normal)
            }
            _ => Err(self.error(ErrorKind::Runtime, line, "Invalid assignment target.")),
        }
    }

    fn exec_for(
        &self,
        init: Option<&Statement>,
        condition: Option<&Expression>,
        increment: Option<&Statement>,
        body: &[Statement],
        line: u32,
    ) -> Result<Flow> {
        let env = self.env();
        env.push_scope();
        let result = (|| {
            if let Some(init) = init {
                self.exec(init)?;
            }
            let mut iterations: i32 = 0;
            loop {
                self.check_interrupt(line)?;
                let go = match condition {
                    Some(condition) => self.eval_boolean(condition)?,
                    None => true,
                };
                if !go {
                    break;
                }
                iterations = self.bump_loop_counter(iterations, line)?;
                match self.exec_branch(body)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    ret @ Flow::Return { .. } => return Ok(ret),
                }
                if let Some(increment) = increment {
                    self.exec(increment)?;
                }
            }
            Ok(Flow::Normal)
        })();
        env.pop_scope();
        result
    }

    fn exec_for_each(
        &self,
        variable: &SmolStr,
        iterable: &Expression,
        body: &[Statement],
        line: u32,
    ) -> Result<Flow> {
        let iterable = self.eval(iterable)?;
        let items: Vec<Value> = match &iterable {
            Value::Array(arr) => arr.read().values().to_vec(),
            Value::Map(map) => map.read().keys().map(|k| Value::Str(k.clone())).collect(),
            Value::Str(s) => s
                .chars()
                .map(|c| Value::Str(SmolStr::new(c.to_string())))
                .collect(),
            other => {
                return Err(self.error(
                    ErrorKind::Iteration,
                    line,
                    format!("Cannot iterate over type '{}'.", other.type_name()),
                ))
            }
        };
        let env = self.env();
        for item in items {
            self.check_interrupt(line)?;
            env.push_scope();
            env.values().define(variable.clone(), item);
            let flow = self.exec_all(body);
            env.pop_scope();
            match flow? {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
                ret @ Flow::Return { .. } => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_open_cursor(
        &self,
        name: &SmolStr,
        connection: &SmolStr,
        sql: &Expression,
        args: &[Expression],
        line: u32,
    ) -> Result<Flow> {
        let sql = stringify(&self.eval(sql)?);
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        let conn = self.connections.get(connection).ok_or_else(|| {
            self.error(
                ErrorKind::Db,
                line,
                format!("Connection '{}' is not open.", connection),
            )
        })?;
        let cursor = conn
            .open_cursor(&sql, &values)
            .map_err(|m| self.error(ErrorKind::Db, line, format!("Open cursor -> {}", m)))?;
        drop(conn);
        self.cursors.insert(name.clone(), Mutex::new(cursor));
        self.env()
            .values()
            .define(name.clone(), Value::Cursor(name.clone()));
        Ok(Flow::Normal)
    }

    /// Run a block in a fresh scope with its own call-stack frame. A
    /// `return` targeting this block is consumed here: its value is type
    /// checked against the declared return type and handed back with
    /// `Flow::Normal`. Frame and scope are popped on every exit path.
    fn exec_block(
        &self,
        block: &BlockStatement,
        param_inits: Option<Vec<Statement>>,
    ) -> Result<(Flow, Value)> {
        let env = self.env();
        env.push_scope();
        let (message, values) = match &block.name {
            Some(name) => ("block '%1'".into(), vec![Value::Str(name.clone())]),
            None => (SmolStr::new("block"), vec![]),
        };
        env.push_frame(block.line, StatementKind::Block, message, values);
        let result = (|| {
            if let Some(inits) = &param_inits {
                for init in inits {
                    self.exec(init)?;
                }
            }
            for stmt in &block.statements {
                match self.exec(stmt)? {
                    Flow::Normal => {}
                    Flow::Return { value, function } => {
                        if function == block.name {
                            if let Some(ty) = block.return_type {
                                if !check_data_type(ty, &value) {
                                    return Err(self.error(
                                        ErrorKind::ReturnTypeMismatch,
                                        stmt.line(),
                                        format!(
                                            "Return value '{}' not correct type '{}'.",
                                            stringify(&value),
                                            ty
                                        ),
                                    ));
                                }
                            }
                            return Ok((Flow::Normal, value));
                        }
                        return Ok((Flow::Return { value, function }, Value::Null));
                    }
                    other => return Ok((other, Value::Null)),
                }
            }
            Ok((Flow::Normal, Value::Null))
        })();
        env.pop_frame();
        env.pop_scope();
        result
    }

    fn exec_branch(&self, body: &[Statement]) -> Result<Flow> {
        let env = self.env();
        env.push_scope();
        let result = self.exec_all(body);
        env.pop_scope();
        result
    }

    fn exec_all(&self, body: &[Statement]) -> Result<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn check_interrupt(&self, line: u32) -> Result<()> {
        if self.shutdown.load(AtomicOrdering::Relaxed) {
            return Err(self.error(ErrorKind::Runtime, line, "Execution interrupted."));
        }
        Ok(())
    }

    fn bump_loop_counter(&self, iterations: i32, line: u32) -> Result<i32> {
        iterations
            .checked_add(1)
            .ok_or_else(|| self.error(ErrorKind::Iteration, line, "Infinite loop detected!"))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn eval(&self, expr: &Expression) -> Result<Value> {
        match expr {
            Expression::Literal { value, .. } => Ok(eval_literal(value)),
            Expression::Variable { name, line } => {
                self.env().values().get(name).ok_or_else(|| {
                    self.error(
                        ErrorKind::UndefinedVariable,
                        *line,
                        format!("Undefined variable '{}'.", name),
                    )
                })
            }
            Expression::Unary { op, operand, line } => {
                let value = self.eval(operand)?;
                self.eval_unary(*op, value, *line)
            }
            Expression::Binary {
                left,
                op,
                right,
                line,
            } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.eval_operator(left, *op, right, *line)
            }
            Expression::ChainComparison {
                operands,
                ops,
                line,
            } => self.eval_chain_comparison(operands, ops, *line),
            Expression::Call { name, args, line } => self.call_function(name, args, *line),
            Expression::Index {
                target,
                index,
                line,
            } => {
                let container = self.eval(target)?;
                let idx = self.eval(index)?;
                let env = self.env();
                env.push_frame(
                    *line,
                    StatementKind::Expression,
                    "IndexExpression [%1]",
                    vec![idx.clone()],
                );
                let result = self.get_indexed(&container, &idx, index_position(target), *line);
                env.pop_frame();
                result
            }
            Expression::Property { target, name, line } => {
                let container = self.eval(target)?;
                let Some(map) = container.as_map() else {
                    return Err(self.error(
                        ErrorKind::TypeMismatch,
                        *line,
                        format!(
                            "Cannot read property '{}' of type '{}'.",
                            name,
                            container.type_name()
                        ),
                    ));
                };
                let map = map.read();
                let key = existing_key(&map, name);
                Ok(key.and_then(|k| map.get(&k).cloned()).unwrap_or(Value::Null))
            }
            Expression::Length { target, line } => {
                let value = self.eval(target)?;
                let len = match &value {
                    Value::Array(arr) => arr.read().len(),
                    Value::Map(map) => map.read().len(),
                    Value::Str(s) => s.chars().count(),
                    other => {
                        return Err(self.error(
                            ErrorKind::TypeMismatch,
                            *line,
                            format!("Cannot take length of type '{}'.", other.type_name()),
                        ))
                    }
                };
                Ok(Value::Int(len as i32))
            }
            Expression::ArrayInit {
                element_type,
                dims,
                line,
            } => self.eval_array_init(*element_type, dims, *line),
            Expression::ArrayLiteral {
                target,
                elements,
                line,
            } => self.eval_array_literal(target.as_deref(), elements, *line),
            Expression::CursorHasNext { cursor, line } => {
                let entry = self.cursors.get(cursor).ok_or_else(|| {
                    self.error(
                        ErrorKind::Db,
                        *line,
                        format!("Cursor '{}' is not open.", cursor),
                    )
                })?;
                let mut guard = entry.lock();
                let has_next = guard
                    .has_next()
                    .map_err(|m| self.error(ErrorKind::Db, *line, format!("Cursor -> {}", m)))?;
                Ok(Value::Bool(has_next))
            }
            Expression::CursorNext { cursor, line } => {
                let entry = self.cursors.get(cursor).ok_or_else(|| {
                    self.error(
                        ErrorKind::Db,
                        *line,
                        format!("Cursor '{}' is not open.", cursor),
                    )
                })?;
                let mut guard = entry.lock();
                let row = guard
                    .next_row()
                    .map_err(|m| self.error(ErrorKind::Db, *line, format!("Cursor -> {}", m)))?;
                Ok(match row {
                    Some(row) => Value::map(row),
                    None => Value::Null,
                })
            }
            Expression::ArtifactGet {
                artifact,
                property,
                line,
            } => {
                if !self.artifacts.contains(artifact) {
                    return Err(self.error(
                        ErrorKind::Ui,
                        *line,
                        format!("Artifact '{}' not found.", artifact),
                    ));
                }
                self.ui
                    .get_property(artifact, property)
                    .map_err(|m| self.error(ErrorKind::Ui, *line, format!("Get property -> {}", m)))
            }
        }
    }

    fn eval_boolean(&self, condition: &Expression) -> Result<bool> {
        let value = self.eval(condition)?;
        value.as_bool().ok_or_else(|| {
            self.error(
                ErrorKind::ConditionType,
                condition.line(),
                format!("Condition must be a boolean, got '{}'.", stringify(&value)),
            )
        })
    }

    fn eval_unary(&self, op: UnaryOp, value: Value, line: u32) -> Result<Value> {
        match op {
            UnaryOp::Neg => match value {
                Value::Byte(n) => Ok(Value::Byte(n.wrapping_neg())),
                Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
                Value::Long(n) => Ok(Value::Long(n.wrapping_neg())),
                Value::Float(n) => Ok(Value::Float(-n)),
                Value::Double(n) => Ok(Value::Double(-n)),
                other => Err(self.error(
                    ErrorKind::TypeMismatch,
                    line,
                    format!("Operand of '-' must be numeric, got '{}'.", other.type_name()),
                )),
            },
            UnaryOp::Pos => {
                if value.is_numeric() {
                    Ok(value)
                } else {
                    Err(self.error(
                        ErrorKind::TypeMismatch,
                        line,
                        format!("Operand of '+' must be numeric, got '{}'.", value.type_name()),
                    ))
                }
            }
            UnaryOp::Not => match value.as_bool() {
                Some(b) => Ok(Value::Bool(!b)),
                None => Err(self.error(
                    ErrorKind::TypeMismatch,
                    line,
                    format!("Operand of '!' must be a boolean, got '{}'.", value.type_name()),
                )),
            },
        }
    }

    /// Left-to-right chained comparison. Each link's right operand is
    /// carried raw (pre-promotion) into the next link; a false link stops
    /// the chain and the remaining operands are never evaluated.
    fn eval_chain_comparison(
        &self,
        operands: &[Expression],
        ops: &[BinaryOp],
        line: u32,
    ) -> Result<Value> {
        if operands.len() != ops.len() + 1 || ops.is_empty() {
            return Err(self.error(ErrorKind::Runtime, line, "Malformed comparison chain."));
        }
        if let Some(op) = ops.iter().find(|op| !op.is_comparison()) {
            return Err(self.error(
                ErrorKind::TypeMismatch,
                line,
                format!("Operator '{}' cannot be chained.", op.symbol()),
            ));
        }
        let mut left = self.eval(&operands[0])?;
        for (op, operand) in ops.iter().zip(&operands[1..]) {
            let right = self.eval(operand)?;
            let result = self.eval_operator(left, *op, right.clone(), line)?;
            if result != Value::Bool(true) {
                return Ok(Value::Bool(false));
            }
            left = right;
        }
        Ok(Value::Bool(true))
    }

    // ------------------------------------------------------------------
    // Binary operators
    // ------------------------------------------------------------------

    /// Apply a binary operator: first null handling, then the promotion
    /// matrix, then the operator itself on same-typed operands.
    pub fn eval_operator(
        &self,
        left: Value,
        op: BinaryOp,
        right: Value,
        line: u32,
    ) -> Result<Value> {
        use BinaryOp::*;

        // Null equality is decided before any coercion.
        if matches!(op, Eq | Neq) && (left.is_null() || right.is_null()) {
            let both_null = left.is_null() && right.is_null();
            return Ok(Value::Bool(if op == Eq { both_null } else { !both_null }));
        }

        let (left, right) = normalize_nulls(left, right);
        let (left, right) = promote(left, right);

        match op {
            And | Or => match (left.as_bool(), right.as_bool()) {
                (Some(a), Some(b)) => Ok(Value::Bool(if op == And { a && b } else { a || b })),
                _ => Err(self.error(
                    ErrorKind::TypeMismatch,
                    line,
                    format!("Operands of '{}' must be booleans.", op.symbol()),
                )),
            },
            Eq => Ok(Value::Bool(left == right)),
            Neq => Ok(Value::Bool(left != right)),
            Gt | Gte | Lt | Lte => {
                let result = self.compare(&left, &right, op, line)?;
                Ok(Value::Bool(result))
            }
            Plus => self.eval_plus(left, right),
            Minus | Star => self.eval_arithmetic(left, op, right, line),
            Slash => self.eval_division(left, right, line, false),
            Percent => self.eval_division(left, right, line, true),
            Caret => match (left.as_f64(), right.as_f64()) {
                // Exponentiation always lands in double.
                (Some(base), Some(exp)) => Ok(Value::Double(base.powf(exp))),
                _ => Err(self.error(
                    ErrorKind::TypeMismatch,
                    line,
                    format!(
                        "Operator '^' requires numeric operands, got '{}' and '{}'.",
                        left.type_name(),
                        right.type_name()
                    ),
                )),
            },
        }
    }

    fn compare(&self, left: &Value, right: &Value, op: BinaryOp, line: u32) -> Result<bool> {
        use Value::*;
        let ord = match (left, right) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Long(a), Long(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            // Booleans order as 1/0.
            (Bool(a), Bool(b)) => Some((*a as i32).cmp(&(*b as i32))),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Date(a), DateTime(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (DateTime(a), Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            _ => {
                return Err(self.error(
                    ErrorKind::TypeMismatch,
                    line,
                    format!(
                        "Cannot compare '{}' and '{}'.",
                        left.type_name(),
                        right.type_name()
                    ),
                ))
            }
        };
        // NaN compares false under every ordering operator.
        let Some(ord) = ord else { return Ok(false) };
        Ok(match op {
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::Gte => ord != Ordering::Less,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Lte => ord != Ordering::Greater,
            _ => unreachable!("not a comparison operator"),
        })
    }

    fn eval_plus(&self, left: Value, right: Value) -> Result<Value> {
        use Value::*;
        Ok(match (&left, &right) {
            (Int(a), Int(b)) => Int(a.wrapping_add(*b)),
            (Long(a), Long(b)) => Long(a.wrapping_add(*b)),
            (Float(a), Float(b)) => Float(a + b),
            (Double(a), Double(b)) => Double(a + b),
            (Str(a), Str(b)) => Str(format!("{}{}", a, b).into()),
            // Anything else concatenates its textual forms. Existing
            // scripts lean on this, keep it.
            _ => Str(format!("{}{}", stringify(&left), stringify(&right)).into()),
        })
    }

    fn eval_arithmetic(&self, left: Value, op: BinaryOp, right: Value, line: u32) -> Result<Value> {
        use Value::*;
        let star = op == BinaryOp::Star;
        match (&left, &right) {
            (Int(a), Int(b)) => Ok(Int(if star {
                a.wrapping_mul(*b)
            } else {
                a.wrapping_sub(*b)
            })),
            (Long(a), Long(b)) => Ok(Long(if star {
                a.wrapping_mul(*b)
            } else {
                a.wrapping_sub(*b)
            })),
            (Float(a), Float(b)) => Ok(Float(if star { a * b } else { a - b })),
            (Double(a), Double(b)) => Ok(Double(if star { a * b } else { a - b })),
            _ => Err(self.error(
                ErrorKind::TypeMismatch,
                line,
                format!(
                    "Operator '{}' requires numeric operands, got '{}' and '{}'.",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ),
            )),
        }
    }

    fn eval_division(&self, left: Value, right: Value, line: u32, modulo: bool) -> Result<Value> {
        use Value::*;
        let zero_message = if modulo {
            "Modulo by zero."
        } else {
            "Division by zero."
        };
        match (&left, &right) {
            (Int(a), Int(b)) => {
                if *b == 0 {
                    return Err(self.error(ErrorKind::DivisionByZero, line, zero_message));
                }
                Ok(Int(if modulo { a.wrapping_rem(*b) } else { a.wrapping_div(*b) }))
            }
            (Long(a), Long(b)) => {
                if *b == 0 {
                    return Err(self.error(ErrorKind::DivisionByZero, line, zero_message));
                }
                Ok(Long(if modulo { a.wrapping_rem(*b) } else { a.wrapping_div(*b) }))
            }
            (Float(a), Float(b)) => {
                if *b == 0.0 {
                    return Err(self.error(ErrorKind::DivisionByZero, line, zero_message));
                }
                Ok(Float(if modulo { a % b } else { a / b }))
            }
            (Double(a), Double(b)) => {
                if *b == 0.0 {
                    return Err(self.error(ErrorKind::DivisionByZero, line, zero_message));
                }
                Ok(Double(if modulo { a % b } else { a / b }))
            }
            _ => Err(self.error(
                ErrorKind::TypeMismatch,
                line,
                format!(
                    "Operator '{}' requires numeric operands, got '{}' and '{}'.",
                    if modulo { "%" } else { "/" },
                    left.type_name(),
                    right.type_name()
                ),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Resolve a call: builtins by exact lowercase name first, then user
    /// blocks from the context. Builtin arguments are coerced to their
    /// declared parameter types except for `any`/`json` parameters.
    fn call_function(&self, name: &SmolStr, args: &[Expression], line: u32) -> Result<Value> {
        let lower = name.to_lowercase();
        if self.builtins.is_builtin(&lower) {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg)?);
            }
            if let Some(spec) = self.builtins.param_spec(&lower) {
                if spec.len() != values.len() {
                    return Err(self.error(
                        ErrorKind::TypeMismatch,
                        line,
                        format!(
                            "Builtin '{}' expects {} arguments, got {}.",
                            name,
                            spec.len(),
                            values.len()
                        ),
                    ));
                }
                for (param, value) in spec.iter().zip(values.iter_mut()) {
                    if matches!(param.data_type, DataType::Any | DataType::Json) {
                        continue;
                    }
                    let converted = convert_value(param.data_type, value.clone()).map_err(|m| {
                        self.error(ErrorKind::TypeMismatch, line, format!("Call Builtin -> {}", m))
                    })?;
                    *value = converted;
                }
            }
            let env = self.env();
            env.push_frame(line, StatementKind::Builtin, name.clone(), values.clone());
            let result = self
                .builtins
                .call(&lower, values)
                .map_err(|m| self.error(ErrorKind::Runtime, line, format!("Call Builtin -> {}", m)));
            env.pop_frame();
            return result;
        }

        if let Some(block) = self.context.blocks.get(name.as_str()).map(|b| b.clone()) {
            if block.parameters.len() != args.len() {
                return Err(self.error(
                    ErrorKind::UnresolvedCall,
                    line,
                    format!(
                        "Call '{}' expects {} parameters, got {}.",
                        name,
                        block.parameters.len(),
                        args.len()
                    ),
                ));
            }
            // Parameters become var statements executed in the block's
            // fresh scope; their initializers still see the caller's
            // bindings through the chain.
            let inits: Vec<Statement> = block
                .parameters
                .iter()
                .zip(args)
                .map(|(param, arg)| {
                    Statement::Var(VarStatement {
                        name: param.name.clone(),
                        var_type: Some(param.data_type),
                        initializer: Some(arg.clone()),
                        is_const: false,
                        line,
                    })
                })
                .collect();
            let (flow, value) = self.exec_block(&block, Some(inits))?;
            return match flow {
                Flow::Normal => Ok(value),
                Flow::Break => Err(self.error(ErrorKind::Runtime, line, "'break' outside loop.")),
                Flow::Continue => {
                    Err(self.error(ErrorKind::Runtime, line, "'continue' outside loop."))
                }
                Flow::Return { function, .. } => Err(self.error(
                    ErrorKind::Runtime,
                    line,
                    format!(
                        "Return targets unknown block '{}'.",
                        function.unwrap_or_default()
                    ),
                )),
            };
        }

        Err(self.error(
            ErrorKind::UnresolvedCall,
            line,
            format!("Call cannot find '{}'.", name),
        ))
    }

    // ------------------------------------------------------------------
    // Arrays and indexing
    // ------------------------------------------------------------------

    fn eval_array_init(
        &self,
        element_type: DataType,
        dims: &[Option<Expression>],
        line: u32,
    ) -> Result<Value> {
        if dims.is_empty() {
            return Err(self.error(
                ErrorKind::Runtime,
                line,
                "Array initialization requires at least one dimension.",
            ));
        }
        let mut sizes = Vec::with_capacity(dims.len());
        for dim in dims {
            sizes.push(match dim {
                None => None,
                Some(expr) => Some(self.to_dimension(expr, line)?),
            });
        }
        Ok(create_empty_array(element_type, &sizes))
    }

    fn to_dimension(&self, expr: &Expression, line: u32) -> Result<usize> {
        let value = self.eval(expr)?;
        let n = match &value {
            Value::Byte(n) => *n as i64,
            Value::Int(n) => *n as i64,
            Value::Long(n) => *n,
            _ => {
                return Err(self.error(
                    ErrorKind::Runtime,
                    line,
                    format!("Array dimension '{}' must be a number.", stringify(&value)),
                ))
            }
        };
        if n < 0 {
            return Err(self.error(
                ErrorKind::Runtime,
                line,
                format!("Array dimension {} must be non-negative.", n),
            ));
        }
        Ok(n as usize)
    }

    /// Evaluate an array literal against its target:
    /// no target allocates a fresh dynamic array with an inferred element
    /// type; a variable target must already hold an array; an indexed
    /// target synthesizes a missing child sized to the literal.
    fn eval_array_literal(
        &self,
        target: Option<&Expression>,
        elements: &[Expression],
        line: u32,
    ) -> Result<Value> {
        match target {
            None => {
                let element_type = infer_element_type(elements);
                let arr = Arc::new(RwLock::new(EbsArray::dynamic(element_type)));
                self.assign_literal(&arr, elements, line)?;
                Ok(Value::Array(arr))
            }
            Some(Expression::Variable { name, .. }) => {
                let value = self.env().values().get(name).ok_or_else(|| {
                    self.error(
                        ErrorKind::UndefinedVariable,
                        line,
                        format!("Undefined variable '{}'.", name),
                    )
                })?;
                let Some(arr) = value.as_array() else {
                    return Err(self.error(
                        ErrorKind::TypeMismatch,
                        line,
                        format!("'{}' is not an array.", name),
                    ));
                };
                self.assign_literal(arr, elements, line)?;
                Ok(value.clone())
            }
            Some(Expression::Index { target, index, .. }) => {
                let parent = self.eval(target)?;
                let Some(parent) = parent.as_array() else {
                    return Err(self.error(
                        ErrorKind::TypeMismatch,
                        line,
                        "Indexed literal target is not an array.",
                    ));
                };
                let idx_value = self.eval(index)?;
                let idx = self.to_index(&idx_value, index_position(target), line)?;
                let child = self.child_for_literal(parent, idx, elements, line)?;
                self.assign_literal(&child, elements, line)?;
                Ok(Value::Array(child))
            }
            Some(other) => Err(self.error(
                ErrorKind::Runtime,
                other.line(),
                "Invalid array literal target.",
            )),
        }
    }

    /// Fetch the child array at `index`, synthesizing one when the slot
    /// is empty. A fixed parent forces a fixed child sized to the
    /// literal; a dynamic parent gets a dynamic child.
    fn child_for_literal(
        &self,
        parent: &Arc<RwLock<EbsArray>>,
        index: usize,
        elements: &[Expression],
        line: u32,
    ) -> Result<Arc<RwLock<EbsArray>>> {
        let (len, fixed, element_type) = {
            let guard = parent.read();
            (guard.len(), guard.is_fixed(), guard.element_type())
        };
        if index > len || (fixed && index >= len) {
            return Err(self.error(
                ErrorKind::IndexOutOfRange,
                line,
                format!("Index out of bounds: {} (size {}).", index, len),
            ));
        }
        let existing = parent.read().get(index);
        if let Some(Value::Array(child)) = existing {
            return Ok(child);
        }
        let leaf_type = if element_type == DataType::Array {
            infer_element_type(elements)
        } else {
            element_type
        };
        let child = Arc::new(RwLock::new(if fixed {
            EbsArray::fixed(leaf_type, elements.len())
        } else {
            EbsArray::dynamic(leaf_type)
        }));
        parent.write().place_child(index, Value::Array(child.clone()));
        Ok(child)
    }

    /// Write a literal's elements into an array. Fixed arrays never grow:
    /// an oversized literal is an error at every nesting depth. Dynamic
    /// arrays expand to at least the literal length. Leaf values go
    /// through their textual form into the element type.
    fn assign_literal(
        &self,
        arr: &Arc<RwLock<EbsArray>>,
        elements: &[Expression],
        line: u32,
    ) -> Result<()> {
        let (fixed, capacity) = {
            let guard = arr.read();
            (guard.is_fixed(), guard.len())
        };
        if fixed && elements.len() > capacity {
            return Err(self.error(
                ErrorKind::ArrayCapacityExceeded,
                line,
                format!(
                    "Array literal length ({}) exceeds fixed array length ({}).",
                    elements.len(),
                    capacity
                ),
            ));
        }
        if !fixed {
            arr.write()
                .expand_to(elements.len())
                .map_err(|m| self.error(ErrorKind::Runtime, line, m))?;
        }
        for (i, element) in elements.iter().enumerate() {
            if let Expression::ArrayLiteral {
                target: None,
                elements: nested,
                ..
            } = element
            {
                let child_arr = self.child_for_literal(arr, i, nested, line)?;
                {
                    let guard = child_arr.read();
                    if guard.is_fixed() && nested.len() > guard.len() {
                        return Err(self.error(
                            ErrorKind::ArrayCapacityExceeded,
                            line,
                            format!(
                                "Nested array literal length ({}) exceeds fixed child length ({}) at index {}.",
                                nested.len(),
                                guard.len(),
                                i + 1
                            ),
                        ));
                    }
                }
                self.assign_literal(&child_arr, nested, line)?;
            } else {
                let value = self.eval(element)?;
                let element_type = arr.read().element_type();
                let value = match element_type {
                    DataType::Any | DataType::Json | DataType::Array => value,
                    ty => convert_value(ty, Value::Str(stringify(&value).into()))
                        .map_err(|m| self.error(ErrorKind::TypeMismatch, line, m))?,
                };
                arr.write()
                    .set(i, value)
                    .map_err(|m| self.error(ErrorKind::Runtime, line, m))?;
            }
        }
        Ok(())
    }

    /// `position` is the 1-based place of the index in a chained
    /// expression like `a[i][j]`, named in error messages.
    fn to_index(&self, value: &Value, position: usize, line: u32) -> Result<usize> {
        let n = match value {
            Value::Byte(n) => *n as i64,
            Value::Int(n) => *n as i64,
            Value::Long(n) => *n,
            _ => {
                return Err(self.error(
                    ErrorKind::TypeMismatch,
                    line,
                    format!("Index {} must be a number.", position),
                ))
            }
        };
        if n < 0 {
            return Err(self.error(
                ErrorKind::IndexOutOfRange,
                line,
                format!("Index {} must be non-negative, got {}.", position, n),
            ));
        }
        Ok(n as usize)
    }

    /// Read an element from an array, record, or string.
    fn get_indexed(
        &self,
        container: &Value,
        index: &Value,
        position: usize,
        line: u32,
    ) -> Result<Value> {
        match container {
            Value::Array(arr) => {
                let idx = self.to_index(index, position, line)?;
                let guard = arr.read();
                if idx >= guard.len() {
                    return Err(self.error(
                        ErrorKind::IndexOutOfRange,
                        line,
                        format!("Index out of bounds: {} (size {}).", idx, guard.len()),
                    ));
                }
                Ok(guard.get(idx).unwrap_or(Value::Null))
            }
            Value::Map(map) => {
                let key = SmolStr::new(stringify(index));
                Ok(map.read().get(&key).cloned().unwrap_or(Value::Null))
            }
            Value::Str(s) => {
                let idx = self.to_index(index, position, line)?;
                let mut chars = s.chars();
                match chars.nth(idx) {
                    Some(c) => Ok(Value::Str(SmolStr::new(c.to_string()))),
                    None => Err(self.error(
                        ErrorKind::IndexOutOfRange,
                        line,
                        format!("Index out of bounds: {} (size {}).", idx, s.chars().count()),
                    )),
                }
            }
            other => Err(self.error(
                ErrorKind::TypeMismatch,
                line,
                format!("Cannot index into type '{}'.", other.type_name()),
            )),
        }
    }

    /// Write an element into an array or record. Array writes tolerate
    /// `index == len` as an append; strings are immutable.
    fn set_indexed(
        &self,
        container: &Value,
        index: &Value,
        value: Value,
        position: usize,
        line: u32,
    ) -> Result<()> {
        match container {
            Value::Array(arr) => {
                let idx = self.to_index(index, position, line)?;
                let len = arr.read().len();
                if idx > len {
                    return Err(self.error(
                        ErrorKind::IndexOutOfRange,
                        line,
                        format!("Index out of bounds: {} (size {}).", idx, len),
                    ));
                }
                arr.write().set(idx, value).map_err(|m| {
                    let kind = if idx == len {
                        ErrorKind::ArrayCapacityExceeded
                    } else {
                        ErrorKind::TypeMismatch
                    };
                    self.error(kind, line, m)
                })
            }
            Value::Map(map) => {
                let key = SmolStr::new(stringify(index));
                map.write().insert(key, value);
                Ok(())
            }
            other => Err(self.error(
                ErrorKind::TypeMismatch,
                line,
                format!("Cannot assign into type '{}'.", other.type_name()),
            )),
        }
    }
}

// ----------------------------------------------------------------------
// Free helpers
// ----------------------------------------------------------------------

fn eval_literal(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Long(n) => Value::Long(*n),
        Literal::Double(n) => Value::Double(*n),
        Literal::Str(s) => reinterpret_string(s),
    }
}

/// String literals that look like dates become date values at evaluation
/// time. Deliberate: scripts write dates as plain strings and expect
/// chronological comparisons to work.
fn reinterpret_string(s: &SmolStr) -> Value {
    let text = s.as_str();
    let bytes = text.as_bytes();
    let dateish =
        bytes.len() >= 10 && bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b'-';
    if dateish {
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Value::Date(date);
        }
        if text.contains(' ') {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
                return Value::DateTime(dt);
            }
        }
    }
    Value::Str(s.clone())
}

/// Replace nulls with the zero value of the other operand's type, so
/// `null + 1` behaves like `0 + 1` and `null + "x"` like `"" + "x"`.
fn normalize_nulls(left: Value, right: Value) -> (Value, Value) {
    match (&left, &right) {
        (Value::Null, other) if !other.is_null() => (zero_like(other), right),
        (other, Value::Null) if !other.is_null() => {
            let zero = zero_like(other);
            (left, zero)
        }
        _ => (left, right),
    }
}

fn zero_like(value: &Value) -> Value {
    match value {
        Value::Byte(_) => Value::Byte(0),
        Value::Int(_) => Value::Int(0),
        Value::Long(_) => Value::Long(0),
        Value::Float(_) => Value::Float(0.0),
        Value::Double(_) => Value::Double(0.0),
        Value::Str(_) => Value::Str(SmolStr::default()),
        Value::Bool(_) => Value::Bool(false),
        _ => Value::Null,
    }
}

/// Promotion matrix: bytes widen to int, numeric pairs widen to the
/// wider width, a long/float pair lands in double to keep precision, and
/// a string next to a number or boolean pulls the other side into its
/// textual form.
fn promote(left: Value, right: Value) -> (Value, Value) {
    let left = match left {
        Value::Byte(n) => Value::Int(n as i32),
        other => other,
    };
    let right = match right {
        Value::Byte(n) => Value::Int(n as i32),
        other => other,
    };
    match (&left, &right) {
        (l, Value::Str(_)) if l.is_numeric() => {
            let text = stringify(&left);
            (Value::Str(text.into()), right)
        }
        (Value::Str(_), r) if r.is_numeric() => {
            let text = stringify(&right);
            (left, Value::Str(text.into()))
        }
        (Value::Bool(b), Value::Str(_)) => (Value::Str(string_boolean(*b).into()), right),
        (Value::Str(_), Value::Bool(b)) => {
            let text = string_boolean(*b);
            (left, Value::Str(text.into()))
        }
        (l, r) if l.is_numeric() && r.is_numeric() => widen_pair(left, right),
        _ => (left, right),
    }
}

fn widen_pair(left: Value, right: Value) -> (Value, Value) {
    use Value::*;
    // Long and float cannot represent each other; both land in double.
    if matches!(
        (&left, &right),
        (Long(_), Float(_)) | (Float(_), Long(_))
    ) {
        return (
            Double(left.as_f64().unwrap_or_default()),
            Double(right.as_f64().unwrap_or_default()),
        );
    }
    let rank = numeric_rank(&left).max(numeric_rank(&right));
    (widen_to(left, rank), widen_to(right, rank))
}

fn numeric_rank(value: &Value) -> u8 {
    match value {
        Value::Int(_) => 0,
        Value::Long(_) => 1,
        Value::Float(_) => 2,
        Value::Double(_) => 3,
        _ => 0,
    }
}

fn widen_to(value: Value, rank: u8) -> Value {
    use Value::*;
    match rank {
        0 => value,
        1 => match value {
            Int(n) => Long(n as i64),
            other => other,
        },
        2 => match value {
            Int(n) => Float(n as f32),
            Long(n) => Float(n as f32),
            other => other,
        },
        _ => match value {
            Int(n) => Double(n as f64),
            Long(n) => Double(n as f64),
            Float(n) => Double(n as f64),
            other => other,
        },
    }
}

/// Element type for an untargeted array literal: one consistent scalar
/// type wins, anything mixed falls back to the generic element type.
fn infer_element_type(elements: &[Expression]) -> DataType {
    let mut inferred: Option<DataType> = None;
    for element in elements {
        let ty = match element {
            Expression::Literal { value, .. } => match value {
                Literal::Int(_) => DataType::Integer,
                Literal::Double(_) => DataType::Double,
                Literal::Bool(_) => DataType::Bool,
                Literal::Str(_) => DataType::String,
                _ => return DataType::Any,
            },
            Expression::ArrayLiteral { .. } => DataType::Array,
            _ => return DataType::Any,
        };
        match inferred {
            None => inferred = Some(ty),
            Some(seen) if seen == ty => {}
            Some(_) => return DataType::Any,
        }
    }
    inferred.unwrap_or(DataType::Any)
}

fn create_empty_array(element_type: DataType, dims: &[Option<usize>]) -> Value {
    let Some((head, rest)) = dims.split_first() else {
        return Value::array(EbsArray::dynamic(element_type));
    };
    let level_type = if rest.is_empty() {
        element_type
    } else {
        DataType::Array
    };
    match head {
        None => Value::array(EbsArray::dynamic(level_type)),
        Some(n) => {
            let mut arr = EbsArray::fixed(level_type, *n);
            if !rest.is_empty() {
                for i in 0..*n {
                    arr.place_child(i, create_empty_array(element_type, rest));
                }
            }
            Value::array(arr)
        }
    }
}

/// 1-based position of an index whose container is `target`: the
/// innermost bracket of `a[i][j]` is position 1, the next is 2.
fn index_position(target: &Expression) -> usize {
    match target {
        Expression::Index { target, .. } => index_position(target) + 1,
        _ => 1,
    }
}

/// Find a record key, exact match first, then case-insensitive.
fn existing_key(
    map: &indexmap::IndexMap<SmolStr, Value>,
    name: &SmolStr,
) -> Option<SmolStr> {
    if map.contains_key(name) {
        return Some(name.clone());
    }
    map.keys()
        .find(|k| k.eq_ignore_ascii_case(name))
        .cloned()
}

fn frame_message(stmt: &Statement) -> (SmolStr, Vec<Value>) {
    match stmt {
        Statement::Var(v) => ("var '%1'".into(), vec![Value::Str(v.name.clone())]),
        Statement::Assign { name, .. } => {
            ("assign '%1'".into(), vec![Value::Str(name.clone())])
        }
        Statement::IndexAssign { .. } => ("index assign".into(), vec![]),
        Statement::Print { .. } => ("print".into(), vec![]),
        Statement::Call { name, .. } => ("call '%1'".into(), vec![Value::Str(name.clone())]),
        Statement::Block(b) => match &b.name {
            Some(name) => ("block '%1'".into(), vec![Value::Str(name.clone())]),
            None => ("block".into(), vec![]),
        },
        Statement::If { .. } => ("if".into(), vec![]),
        Statement::While { .. } => ("while".into(), vec![]),
        Statement::DoWhile { .. } => ("do while".into(), vec![]),
        Statement::For { .. } => ("for".into(), vec![]),
        Statement::ForEach { variable, .. } => {
            ("for each '%1'".into(), vec![Value::Str(variable.clone())])
        }
        Statement::Break { .. } => ("break".into(), vec![]),
        Statement::Continue { .. } => ("continue".into(), vec![]),
        Statement::Return { .. } => ("return".into(), vec![]),
        Statement::Try { .. } => ("try".into(), vec![]),
        Statement::Raise { category, .. } => {
            ("raise '%1'".into(), vec![Value::Str(category.name().into())])
        }
        Statement::Connect { name, .. } => {
            ("connect '%1'".into(), vec![Value::Str(name.clone())])
        }
        Statement::OpenCursor { name, .. } => {
            ("open cursor '%1'".into(), vec![Value::Str(name.clone())])
        }
        Statement::CloseCursor { name, .. } => {
            ("close cursor '%1'".into(), vec![Value::Str(name.clone())])
        }
        Statement::CloseConnection { name, .. } => {
            ("close connection '%1'".into(), vec![Value::Str(name.clone())])
        }
        Statement::Artifact { name, .. } => {
            ("artifact '%1'".into(), vec![Value::Str(name.clone())])
        }
        Statement::ArtifactSet { property, .. } => {
            ("set property '%1'".into(), vec![Value::Str(property.clone())])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> Interpreter {
        Interpreter::new(RuntimeContext::new("test", vec![]))
    }

    fn apply(left: Value, op: BinaryOp, right: Value) -> Result<Value> {
        interp().eval_operator(left, op, right, 1)
    }

    mod operators {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn int_arithmetic_stays_int() {
            assert_eq!(
                apply(Value::Int(2), BinaryOp::Plus, Value::Int(3)).unwrap(),
                Value::Int(5)
            );
            assert_eq!(
                apply(Value::Int(2), BinaryOp::Star, Value::Int(3)).unwrap(),
                Value::Int(6)
            );
        }

        #[test]
        fn int_widens_to_double() {
            assert_eq!(
                apply(Value::Int(1), BinaryOp::Plus, Value::Double(0.5)).unwrap(),
                Value::Double(1.5)
            );
        }

        #[test]
        fn long_and_float_land_in_double() {
            assert_eq!(
                apply(Value::Long(2), BinaryOp::Plus, Value::Float(0.5)).unwrap(),
                Value::Double(2.5)
            );
        }

        #[test]
        fn byte_promotes_to_int() {
            assert_eq!(
                apply(Value::Byte(100), BinaryOp::Plus, Value::Byte(100)).unwrap(),
                Value::Int(200)
            );
        }

        #[test]
        fn plus_concatenates_string_and_number() {
            assert_eq!(
                apply(Value::Str("a".into()), BinaryOp::Plus, Value::Int(1)).unwrap(),
                Value::Str("a1".into())
            );
        }

        #[test]
        fn float_concatenation_keeps_short_form() {
            assert_eq!(
                apply(Value::Str("x".into()), BinaryOp::Plus, Value::Float(0.1)).unwrap(),
                Value::Str("x0.1".into())
            );
        }

        #[test]
        fn boolean_meets_string_as_y_n() {
            assert_eq!(
                apply(Value::Bool(true), BinaryOp::Plus, Value::Str("!".into())).unwrap(),
                Value::Str("Y!".into())
            );
        }

        #[test]
        fn plus_fallback_concatenates_anything() {
            let date = Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
            assert_eq!(
                apply(date, BinaryOp::Plus, Value::Int(7)).unwrap(),
                Value::Str("2024-01-027".into())
            );
        }

        #[test]
        fn minus_rejects_strings() {
            let err = apply(Value::Str("a".into()), BinaryOp::Minus, Value::Int(1)).unwrap_err();
            assert_eq!(err.kind, ErrorKind::TypeMismatch);
        }

        #[test]
        fn division_by_zero_is_hard_for_every_width() {
            for (l, r) in [
                (Value::Int(1), Value::Int(0)),
                (Value::Long(1), Value::Long(0)),
                (Value::Double(1.0), Value::Double(0.0)),
            ] {
                let err = apply(l, BinaryOp::Slash, r).unwrap_err();
                assert_eq!(err.kind, ErrorKind::DivisionByZero);
            }
        }

        #[test]
        fn modulo_by_zero_is_an_error() {
            let err = apply(Value::Int(5), BinaryOp::Percent, Value::Int(0)).unwrap_err();
            assert_eq!(err.kind, ErrorKind::DivisionByZero);
        }

        #[test]
        fn caret_is_always_double() {
            assert_eq!(
                apply(Value::Int(2), BinaryOp::Caret, Value::Int(10)).unwrap(),
                Value::Double(1024.0)
            );
        }

        #[test]
        fn null_equality_precedes_coercion() {
            assert_eq!(
                apply(Value::Null, BinaryOp::Eq, Value::Null).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                apply(Value::Null, BinaryOp::Eq, Value::Int(0)).unwrap(),
                Value::Bool(false)
            );
            assert_eq!(
                apply(Value::Null, BinaryOp::Neq, Value::Int(0)).unwrap(),
                Value::Bool(true)
            );
        }

        #[test]
        fn null_normalizes_to_zero_value_elsewhere() {
            assert_eq!(
                apply(Value::Null, BinaryOp::Plus, Value::Int(5)).unwrap(),
                Value::Int(5)
            );
            assert_eq!(
                apply(Value::Null, BinaryOp::Plus, Value::Str("x".into())).unwrap(),
                Value::Str("x".into())
            );
            assert_eq!(
                apply(Value::Null, BinaryOp::Or, Value::Bool(true)).unwrap(),
                Value::Bool(true)
            );
        }

        #[test]
        fn string_comparison_is_lexicographic() {
            assert_eq!(
                apply(Value::Str("apple".into()), BinaryOp::Lt, Value::Str("banana".into()))
                    .unwrap(),
                Value::Bool(true)
            );
        }

        #[test]
        fn booleans_order_as_one_and_zero() {
            assert_eq!(
                apply(Value::Bool(true), BinaryOp::Gt, Value::Bool(false)).unwrap(),
                Value::Bool(true)
            );
        }

        #[test]
        fn dates_compare_chronologically() {
            let earlier = Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
            let later = Value::Date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
            assert_eq!(
                apply(earlier, BinaryOp::Lt, later).unwrap(),
                Value::Bool(true)
            );
        }
    }

    mod literals {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn date_like_strings_become_dates() {
            let value = eval_literal(&Literal::Str("2024-03-15".into()));
            assert_eq!(
                value,
                Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
            );
        }

        #[test]
        fn datetime_like_strings_become_datetimes() {
            let value = eval_literal(&Literal::Str("2024-03-15 10:30:00".into()));
            assert!(matches!(value, Value::DateTime(_)));
        }

        #[test]
        fn ordinary_strings_stay_strings() {
            assert_eq!(
                eval_literal(&Literal::Str("hello world".into())),
                Value::Str("hello world".into())
            );
            assert_eq!(
                eval_literal(&Literal::Str("2024-13-99".into())),
                Value::Str("2024-13-99".into())
            );
        }
    }

    mod inference {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn consistent_literals_pick_their_type() {
            let elements = vec![Expression::int(1, 1), Expression::int(2, 1)];
            assert_eq!(infer_element_type(&elements), DataType::Integer);
        }

        #[test]
        fn mixed_literals_fall_back_to_generic() {
            let elements = vec![Expression::int(1, 1), Expression::string("a", 1)];
            assert_eq!(infer_element_type(&elements), DataType::Any);
        }
    }
}
