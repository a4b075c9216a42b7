//! EBS Language Abstract Syntax Tree
//!
//! Defines the statement and expression node types executed by the
//! interpreter. Scripts arrive as pre-built trees; every node carries the
//! 1-based source line it originated from for call-stack traces.

pub use smol_str::SmolStr;

// ============================================================================
// Declared Types
// ============================================================================

/// Declared data types for variables, parameters, and array elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    Integer,
    Long,
    Float,
    Double,
    String,
    Date,
    Bool,
    Json,
    Array,
    Record,
    Map,
    /// Matches any value; no conversion or checking is applied.
    Any,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Byte => "byte",
            DataType::Integer => "integer",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::Bool => "boolean",
            DataType::Json => "json",
            DataType::Array => "array",
            DataType::Record => "record",
            DataType::Map => "map",
            DataType::Any => "any",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Integer
                | DataType::Long
                | DataType::Float
                | DataType::Double
        )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Star => "*",
            BinaryOp::Slash => "/",
            BinaryOp::Percent => "%",
            BinaryOp::Caret => "^",
        }
    }

    /// Comparison operators are the ones allowed in chained form.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Gt
                | BinaryOp::Gte
                | BinaryOp::Lt
                | BinaryOp::Lte
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

// ============================================================================
// Error Categories
// ============================================================================

/// Error categories scripts can raise and handle. `AnyError` matches every
/// category when used in a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    AnyError,
    IoError,
    DbError,
    TypeError,
    NullError,
    IndexError,
    MathError,
    ParseError,
    NetworkError,
    NotFoundError,
    AccessError,
    ValidationError,
}

impl ErrorCategory {
    pub fn matches(&self, other: ErrorCategory) -> bool {
        *self == ErrorCategory::AnyError || *self == other
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::AnyError => "any_error",
            ErrorCategory::IoError => "io_error",
            ErrorCategory::DbError => "db_error",
            ErrorCategory::TypeError => "type_error",
            ErrorCategory::NullError => "null_error",
            ErrorCategory::IndexError => "index_error",
            ErrorCategory::MathError => "math_error",
            ErrorCategory::ParseError => "parse_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::NotFoundError => "not_found_error",
            ErrorCategory::AccessError => "access_error",
            ErrorCategory::ValidationError => "validation_error",
        }
    }
}

// ============================================================================
// Call-Stack Frame Kinds
// ============================================================================

/// Classifies the statement a call-stack frame was pushed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Script,
    Statement,
    Expression,
    Condition,
    Block,
    Loop,
    Builtin,
    Sql,
}

impl StatementKind {
    pub fn name(&self) -> &'static str {
        match self {
            StatementKind::Script => "SCRIPT",
            StatementKind::Statement => "STATEMENT",
            StatementKind::Expression => "EXPRESSION",
            StatementKind::Condition => "CONDITION",
            StatementKind::Block => "BLOCK",
            StatementKind::Loop => "LOOP",
            StatementKind::Builtin => "BUILTIN",
            StatementKind::Sql => "SQL",
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Literal constants as they come out of the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(SmolStr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal {
        value: Literal,
        line: u32,
    },
    Variable {
        name: SmolStr,
        line: u32,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        line: u32,
    },
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
        line: u32,
    },
    /// Chained comparison such as `a < b < c`: `operands.len() == ops.len() + 1`.
    ChainComparison {
        operands: Vec<Expression>,
        ops: Vec<BinaryOp>,
        line: u32,
    },
    Call {
        name: SmolStr,
        args: Vec<Expression>,
        line: u32,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
        line: u32,
    },
    /// Field access on a record/map value: `rec.field`.
    Property {
        target: Box<Expression>,
        name: SmolStr,
        line: u32,
    },
    /// `length of x` over arrays, maps, and strings.
    Length {
        target: Box<Expression>,
        line: u32,
    },
    /// Array allocation: `new integer[3][4]`, `new string[]`.
    /// A `None` dimension means a dynamic (unsized) level.
    ArrayInit {
        element_type: DataType,
        dims: Vec<Option<Expression>>,
        line: u32,
    },
    /// `[1, 2, 3]` with an optional assignment target resolved at runtime.
    ArrayLiteral {
        target: Option<Box<Expression>>,
        elements: Vec<Expression>,
        line: u32,
    },
    CursorHasNext {
        cursor: SmolStr,
        line: u32,
    },
    CursorNext {
        cursor: SmolStr,
        line: u32,
    },
    /// Property read on a UI artifact handle.
    ArtifactGet {
        artifact: SmolStr,
        property: SmolStr,
        line: u32,
    },
}

impl Expression {
    pub fn line(&self) -> u32 {
        match self {
            Expression::Literal { line, .. }
            | Expression::Variable { line, .. }
            | Expression::Unary { line, .. }
            | Expression::Binary { line, .. }
            | Expression::ChainComparison { line, .. }
            | Expression::Call { line, .. }
            | Expression::Index { line, .. }
            | Expression::Property { line, .. }
            | Expression::Length { line, .. }
            | Expression::ArrayInit { line, .. }
            | Expression::ArrayLiteral { line, .. }
            | Expression::CursorHasNext { line, .. }
            | Expression::CursorNext { line, .. }
            | Expression::ArtifactGet { line, .. } => *line,
        }
    }

    pub fn int(value: i32, line: u32) -> Expression {
        Expression::Literal {
            value: Literal::Int(value),
            line,
        }
    }

    pub fn long(value: i64, line: u32) -> Expression {
        Expression::Literal {
            value: Literal::Long(value),
            line,
        }
    }

    pub fn double(value: f64, line: u32) -> Expression {
        Expression::Literal {
            value: Literal::Double(value),
            line,
        }
    }

    pub fn boolean(value: bool, line: u32) -> Expression {
        Expression::Literal {
            value: Literal::Bool(value),
            line,
        }
    }

    pub fn string(value: impl Into<SmolStr>, line: u32) -> Expression {
        Expression::Literal {
            value: Literal::Str(value.into()),
            line,
        }
    }

    pub fn null(line: u32) -> Expression {
        Expression::Literal {
            value: Literal::Null,
            line,
        }
    }

    pub fn variable(name: impl Into<SmolStr>, line: u32) -> Expression {
        Expression::Variable {
            name: name.into(),
            line,
        }
    }

    pub fn binary(left: Expression, op: BinaryOp, right: Expression, line: u32) -> Expression {
        Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
            line,
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Variable declaration: `var x = 1`, `integer n = 0`, `const pi = 3.14`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarStatement {
    pub name: SmolStr,
    pub var_type: Option<DataType>,
    pub initializer: Option<Expression>,
    pub is_const: bool,
    pub line: u32,
}

/// A named, parameterized, callable block, or an anonymous nested block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub name: Option<SmolStr>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<DataType>,
    pub statements: Vec<Statement>,
    pub line: u32,
}

impl BlockStatement {
    /// Anonymous block with no parameters.
    pub fn anonymous(statements: Vec<Statement>, line: u32) -> Self {
        BlockStatement {
            name: None,
            parameters: Vec::new(),
            return_type: None,
            statements,
            line,
        }
    }
}

/// Declared parameter of a callable block.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: SmolStr,
    pub data_type: DataType,
}

/// A typed handler arm of a `try` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    pub category: ErrorCategory,
    /// Name the error message is bound to inside the handler scope.
    pub variable: Option<SmolStr>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Var(VarStatement),
    Assign {
        name: SmolStr,
        value: Expression,
        line: u32,
    },
    /// Assignment through an `Index` or `Property` target expression.
    IndexAssign {
        target: Expression,
        value: Expression,
        line: u32,
    },
    Print {
        value: Expression,
        line: u32,
    },
    Call {
        name: SmolStr,
        args: Vec<Expression>,
        line: u32,
    },
    Block(BlockStatement),
    If {
        condition: Expression,
        then_branch: Vec<Statement>,
        else_branch: Option<Vec<Statement>>,
        line: u32,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
        line: u32,
    },
    DoWhile {
        body: Vec<Statement>,
        condition: Expression,
        line: u32,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        increment: Option<Box<Statement>>,
        body: Vec<Statement>,
        line: u32,
    },
    ForEach {
        variable: SmolStr,
        iterable: Expression,
        body: Vec<Statement>,
        line: u32,
    },
    Break {
        line: u32,
    },
    Continue {
        line: u32,
    },
    Return {
        value: Option<Expression>,
        /// Name of the enclosing callable block, filled in by the front end.
        function: Option<SmolStr>,
        line: u32,
    },
    Try {
        body: Vec<Statement>,
        handlers: Vec<ExceptionHandler>,
        line: u32,
    },
    Raise {
        category: ErrorCategory,
        message: Expression,
        line: u32,
    },
    Connect {
        name: SmolStr,
        spec: Expression,
        line: u32,
    },
    OpenCursor {
        name: SmolStr,
        connection: SmolStr,
        sql: Expression,
        args: Vec<Expression>,
        line: u32,
    },
    CloseCursor {
        name: SmolStr,
        line: u32,
    },
    CloseConnection {
        name: SmolStr,
        line: u32,
    },
    /// UI artifact creation request handed to the host.
    Artifact {
        name: SmolStr,
        spec: Expression,
        line: u32,
    },
    /// Property write on a UI artifact handle.
    ArtifactSet {
        artifact: SmolStr,
        property: SmolStr,
        value: Expression,
        line: u32,
    },
}

impl Statement {
    pub fn line(&self) -> u32 {
        match self {
            Statement::Var(v) => v.line,
            Statement::Block(b) => b.line,
            Statement::Assign { line, .. }
            | Statement::IndexAssign { line, .. }
            | Statement::Print { line, .. }
            | Statement::Call { line, .. }
            | Statement::If { line, .. }
            | Statement::While { line, .. }
            | Statement::DoWhile { line, .. }
            | Statement::For { line, .. }
            | Statement::ForEach { line, .. }
            | Statement::Break { line }
            | Statement::Continue { line }
            | Statement::Return { line, .. }
            | Statement::Try { line, .. }
            | Statement::Raise { line, .. }
            | Statement::Connect { line, .. }
            | Statement::OpenCursor { line, .. }
            | Statement::CloseCursor { line, .. }
            | Statement::CloseConnection { line, .. }
            | Statement::Artifact { line, .. }
            | Statement::ArtifactSet { line, .. } => *line,
        }
    }

    /// Frame classification used when this statement is pushed on the
    /// call stack.
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::If { .. } => StatementKind::Condition,
            Statement::While { .. }
            | Statement::DoWhile { .. }
            | Statement::For { .. }
            | Statement::ForEach { .. } => StatementKind::Loop,
            Statement::Block(_) => StatementKind::Block,
            Statement::OpenCursor { .. } | Statement::Connect { .. } => StatementKind::Sql,
            _ => StatementKind::Statement,
        }
    }
}
