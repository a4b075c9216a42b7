//! Built-in functions for the EBS interpreter.
//!
//! Builtins are resolved by exact lowercase name before user blocks are
//! considered. The interpreter checks and coerces arguments against the
//! declared parameter types before calling, except for `any`/`json`
//! parameters which pass through untouched.

use ebs_ast::DataType;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::db::HostResult;
use crate::value::stringify;
use crate::Value;

/// Declared parameter of a builtin.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub data_type: DataType,
}

/// Dispatch contract the interpreter calls through. Hosts may supply
/// their own implementation to extend or replace the default registry.
pub trait BuiltinHost: Send + Sync {
    fn is_builtin(&self, name: &str) -> bool;

    fn param_spec(&self, name: &str) -> Option<&[ParamSpec]>;

    /// Call with arguments already coerced to the declared types.
    fn call(&self, name: &str, args: Vec<Value>) -> HostResult<Value>;
}

struct Builtin {
    params: &'static [ParamSpec],
    func: fn(Vec<Value>) -> HostResult<Value>,
}

/// Default registry of dotted-lowercase builtins.
pub struct BuiltinRegistry {
    functions: FxHashMap<&'static str, Builtin>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const ONE_STRING: &[ParamSpec] = &[ParamSpec {
    name: "text",
    data_type: DataType::String,
}];

const ONE_DOUBLE: &[ParamSpec] = &[ParamSpec {
    name: "value",
    data_type: DataType::Double,
}];

const TWO_DOUBLE: &[ParamSpec] = &[
    ParamSpec {
        name: "base",
        data_type: DataType::Double,
    },
    ParamSpec {
        name: "exponent",
        data_type: DataType::Double,
    },
];

const ONE_ANY: &[ParamSpec] = &[ParamSpec {
    name: "value",
    data_type: DataType::Any,
}];

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = BuiltinRegistry {
            functions: FxHashMap::default(),
        };
        registry.register("str.upper", ONE_STRING, builtin_str_upper);
        registry.register("str.lower", ONE_STRING, builtin_str_lower);
        registry.register("str.trim", ONE_STRING, builtin_str_trim);
        registry.register("str.len", ONE_STRING, builtin_str_len);
        registry.register("math.abs", ONE_DOUBLE, builtin_math_abs);
        registry.register("math.sqrt", ONE_DOUBLE, builtin_math_sqrt);
        registry.register("math.pow", TWO_DOUBLE, builtin_math_pow);
        registry.register("sys.typeof", ONE_ANY, builtin_sys_typeof);
        registry.register("sys.text", ONE_ANY, builtin_sys_text);
        registry
    }

    fn register(
        &mut self,
        name: &'static str,
        params: &'static [ParamSpec],
        func: fn(Vec<Value>) -> HostResult<Value>,
    ) {
        self.functions.insert(name, Builtin { params, func });
    }
}

impl BuiltinHost for BuiltinRegistry {
    fn is_builtin(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn param_spec(&self, name: &str) -> Option<&[ParamSpec]> {
        self.functions.get(name).map(|b| b.params)
    }

    fn call(&self, name: &str, args: Vec<Value>) -> HostResult<Value> {
        let builtin = self
            .functions
            .get(name)
            .ok_or_else(|| format!("Unknown builtin '{}'.", name))?;
        (builtin.func)(args)
    }
}

fn arg_str(args: &[Value]) -> HostResult<SmolStr> {
    match args.first() {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(format!(
            "Expected a string argument, got {}.",
            other.map_or("nothing", |v| v.type_name())
        )),
    }
}

fn arg_f64(args: &[Value], index: usize) -> HostResult<f64> {
    args.get(index)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| "Expected a numeric argument.".to_string())
}

fn builtin_str_upper(args: Vec<Value>) -> HostResult<Value> {
    Ok(Value::Str(arg_str(&args)?.to_uppercase().into()))
}

fn builtin_str_lower(args: Vec<Value>) -> HostResult<Value> {
    Ok(Value::Str(arg_str(&args)?.to_lowercase().into()))
}

fn builtin_str_trim(args: Vec<Value>) -> HostResult<Value> {
    Ok(Value::Str(arg_str(&args)?.trim().into()))
}

fn builtin_str_len(args: Vec<Value>) -> HostResult<Value> {
    Ok(Value::Int(arg_str(&args)?.chars().count() as i32))
}

fn builtin_math_abs(args: Vec<Value>) -> HostResult<Value> {
    Ok(Value::Double(arg_f64(&args, 0)?.abs()))
}

fn builtin_math_sqrt(args: Vec<Value>) -> HostResult<Value> {
    let n = arg_f64(&args, 0)?;
    if n < 0.0 {
        return Err(format!("Square root of negative value {}.", n));
    }
    Ok(Value::Double(n.sqrt()))
}

fn builtin_math_pow(args: Vec<Value>) -> HostResult<Value> {
    Ok(Value::Double(arg_f64(&args, 0)?.powf(arg_f64(&args, 1)?)))
}

fn builtin_sys_typeof(args: Vec<Value>) -> HostResult<Value> {
    match args.first() {
        Some(v) => Ok(Value::Str(v.type_name().into())),
        None => Err("Expected one argument.".to_string()),
    }
}

fn builtin_sys_text(args: Vec<Value>) -> HostResult<Value> {
    match args.first() {
        Some(v) => Ok(Value::Str(stringify(v).into())),
        None => Err("Expected one argument.".to_string()),
    }
}
