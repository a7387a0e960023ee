//! Sandboxed expression language for match, aggregate and trigger rules.
//!
//! An expression is compiled once against an [`EnvSpec`] capability record
//! (identifier and function names are checked up front, so a typo fails when
//! the rule is saved, not when an event arrives) and evaluated many times
//! against an [`Env`].

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod value;

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

use ast::{BinOp, Expr, UnaryOp};
pub use value::Value;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("syntax error at offset {pos}: {msg}")]
    Syntax { pos: usize, msg: String },
    #[error("unknown identifier `{0}`")]
    UnknownIdent(String),
    #[error("unknown function `{0}`")]
    UnknownFunc(String),
    #[error("function `{name}` takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("invalid regex `{pattern}`: {message}")]
    Regex { pattern: String, message: String },
}

impl ExprError {
    pub(crate) fn syntax(pos: usize, msg: impl Into<String>) -> Self {
        ExprError::Syntax {
            pos,
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("expression result is {0}, expected bool")]
    NotBool(&'static str),
    #[error("invalid regex `{pattern}`: {message}")]
    Regex { pattern: String, message: String },
    #[error("{0}")]
    Helper(String),
}

/// Declares the identifiers and functions an environment offers.
///
/// Functions carry an inclusive arity range so optional arguments stay
/// checkable at compile time.
#[derive(Debug, Default, Clone)]
pub struct EnvSpec {
    vars: Vec<&'static str>,
    funcs: HashMap<&'static str, (usize, usize)>,
}

impl EnvSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: &'static str) -> Self {
        self.vars.push(name);
        self
    }

    pub fn with_func(mut self, name: &'static str, min_args: usize, max_args: usize) -> Self {
        self.funcs.insert(name, (min_args, max_args));
        self
    }

    fn has_var(&self, name: &str) -> bool {
        self.vars.iter().any(|v| *v == name)
    }

    fn func_arity(&self, name: &str) -> Option<(usize, usize)> {
        self.funcs.get(name).copied()
    }
}

/// Runtime counterpart of [`EnvSpec`]: resolves variables and calls helpers.
/// Implementations use interior mutability for memoization; evaluation is
/// single-threaded.
pub trait Env {
    fn var(&self, name: &str) -> Result<Value, EvalError>;
    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError>;
}

/// A compiled, environment-checked expression.
pub struct Program {
    source: String,
    root: Expr,
    /// Regexes for literal `matches` patterns, compiled at compile time.
    regexes: HashMap<String, Regex>,
}

impl Program {
    pub fn compile(source: &str, spec: &EnvSpec) -> Result<Program, ExprError> {
        let tokens = lexer::tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::syntax(0, "empty expression"));
        }
        let root = parser::Parser::new(tokens).parse()?;

        let mut regexes = HashMap::new();
        check(&root, spec, &mut regexes)?;

        Ok(Program {
            source: source.to_string(),
            root,
            regexes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn run(&self, env: &dyn Env) -> Result<Value, EvalError> {
        eval(&self.root, env, &self.regexes)
    }

    /// Evaluate and require a boolean result (match and trigger rules).
    pub fn run_bool(&self, env: &dyn Env) -> Result<bool, EvalError> {
        match self.run(env)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NotBool(other.type_name())),
        }
    }

    /// Evaluate and stringify the result (aggregate rules).
    pub fn run_string(&self, env: &dyn Env) -> Result<String, EvalError> {
        Ok(self.run(env)?.to_display_string())
    }
}

/// Compile-time walk: identifier/function validation and eager regex
/// compilation for literal `matches` patterns.
fn check(
    expr: &Expr,
    spec: &EnvSpec,
    regexes: &mut HashMap<String, Regex>,
) -> Result<(), ExprError> {
    match expr {
        Expr::Lit(_) => Ok(()),
        Expr::Ident(name) => {
            if spec.has_var(name) {
                Ok(())
            } else {
                Err(ExprError::UnknownIdent(name.clone()))
            }
        }
        Expr::Index(base, index) => {
            check(base, spec, regexes)?;
            check(index, spec, regexes)
        }
        Expr::Call(name, args) => {
            let (min, max) = spec
                .func_arity(name)
                .ok_or_else(|| ExprError::UnknownFunc(name.clone()))?;
            if args.len() < min || args.len() > max {
                return Err(ExprError::Arity {
                    name: name.clone(),
                    expected: if min == max {
                        min.to_string()
                    } else {
                        format!("{min}..{max}")
                    },
                    got: args.len(),
                });
            }
            for arg in args {
                check(arg, spec, regexes)?;
            }
            Ok(())
        }
        Expr::ArrayLit(items) => {
            for item in items {
                check(item, spec, regexes)?;
            }
            Ok(())
        }
        Expr::Unary(_, inner) => check(inner, spec, regexes),
        Expr::Binary(op, left, right) => {
            check(left, spec, regexes)?;
            check(right, spec, regexes)?;
            if *op == BinOp::Matches {
                if let Expr::Lit(Value::Str(pattern)) = right.as_ref() {
                    let re = Regex::new(pattern).map_err(|e| ExprError::Regex {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })?;
                    regexes.insert(pattern.clone(), re);
                }
            }
            Ok(())
        }
    }
}

fn eval(expr: &Expr, env: &dyn Env, regexes: &HashMap<String, Regex>) -> Result<Value, EvalError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Ident(name) => env.var(name),
        Expr::Index(base, index) => {
            let base = eval(base, env, regexes)?;
            let index = eval(index, env, regexes)?;
            index_value(&base, &index)
        }
        Expr::Call(name, args) => {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval(arg, env, regexes)?);
            }
            env.call(name, &evaluated)
        }
        Expr::ArrayLit(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, env, regexes)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, env, regexes)?;
            match op {
                UnaryOp::Not => match v {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(EvalError::TypeMismatch(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
                UnaryOp::Neg => match v {
                    Value::Int(n) => Ok(Value::Int(-n)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(EvalError::TypeMismatch(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, env, regexes),
    }
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    env: &dyn Env,
    regexes: &HashMap<String, Regex>,
) -> Result<Value, EvalError> {
    // Short-circuit boolean operators.
    match op {
        BinOp::And => {
            return match eval(left, env, regexes)? {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => require_bool(eval(right, env, regexes)?),
                other => Err(EvalError::TypeMismatch(format!(
                    "`and` needs booleans, got {}",
                    other.type_name()
                ))),
            };
        }
        BinOp::Or => {
            return match eval(left, env, regexes)? {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => require_bool(eval(right, env, regexes)?),
                other => Err(EvalError::TypeMismatch(format!(
                    "`or` needs booleans, got {}",
                    other.type_name()
                ))),
            };
        }
        _ => {}
    }

    let lhs = eval(left, env, regexes)?;
    let rhs = eval(right, env, regexes)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(lhs.loose_eq(&rhs))),
        BinOp::NotEq => Ok(Value::Bool(!lhs.loose_eq(&rhs))),
        BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le => {
            let ord = lhs.partial_cmp_loose(&rhs).ok_or_else(|| {
                EvalError::TypeMismatch(format!(
                    "cannot order {} against {}",
                    lhs.type_name(),
                    rhs.type_name()
                ))
            })?;
            let result = match op {
                BinOp::Gt => ord == std::cmp::Ordering::Greater,
                BinOp::Ge => ord != std::cmp::Ordering::Less,
                BinOp::Lt => ord == std::cmp::Ordering::Less,
                BinOp::Le => ord != std::cmp::Ordering::Greater,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::In | BinOp::NotIn => {
            let found = match &rhs {
                Value::Array(items) => items.iter().any(|item| item.loose_eq(&lhs)),
                Value::Map(map) => match &lhs {
                    Value::Str(key) => map.contains_key(key),
                    other => {
                        return Err(EvalError::TypeMismatch(format!(
                            "map membership needs a string key, got {}",
                            other.type_name()
                        )))
                    }
                },
                other => {
                    return Err(EvalError::TypeMismatch(format!(
                        "`in` needs an array or map on the right, got {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Bool(if op == BinOp::In { found } else { !found }))
        }
        BinOp::Matches => {
            let text = require_str(&lhs, "matches")?;
            let pattern = require_str(&rhs, "matches")?;
            match regexes.get(pattern) {
                Some(re) => Ok(Value::Bool(re.is_match(text))),
                // Dynamic pattern: compiled per evaluation.
                None => {
                    let re = Regex::new(pattern).map_err(|e| EvalError::Regex {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })?;
                    Ok(Value::Bool(re.is_match(text)))
                }
            }
        }
        BinOp::Contains => Ok(Value::Bool(
            require_str(&lhs, "contains")?.contains(require_str(&rhs, "contains")?),
        )),
        BinOp::StartsWith => Ok(Value::Bool(
            require_str(&lhs, "startsWith")?.starts_with(require_str(&rhs, "startsWith")?),
        )),
        BinOp::EndsWith => Ok(Value::Bool(
            require_str(&lhs, "endsWith")?.ends_with(require_str(&rhs, "endsWith")?),
        )),
        BinOp::Add => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::Float(_), _) | (_, Value::Float(_)) | (Value::Int(_), _) | (_, Value::Int(_))
                if lhs.partial_cmp_loose(&rhs).is_some() =>
            {
                let a = match lhs {
                    Value::Int(n) => n as f64,
                    Value::Float(f) => f,
                    _ => unreachable!(),
                };
                let b = match rhs {
                    Value::Int(n) => n as f64,
                    Value::Float(f) => f,
                    _ => unreachable!(),
                };
                Ok(Value::Float(a + b))
            }
            _ => Err(EvalError::TypeMismatch(format!(
                "cannot add {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn require_bool(v: Value) -> Result<Value, EvalError> {
    match v {
        Value::Bool(_) => Ok(v),
        other => Err(EvalError::TypeMismatch(format!(
            "expected bool, got {}",
            other.type_name()
        ))),
    }
}

fn require_str<'a>(v: &'a Value, op: &str) -> Result<&'a str, EvalError> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(EvalError::TypeMismatch(format!(
            "`{op}` needs strings, got {}",
            other.type_name()
        ))),
    }
}

fn index_value(base: &Value, index: &Value) -> Result<Value, EvalError> {
    match (base, index) {
        // Missing keys read as nil so `Meta["x"] == "y"` is simply false.
        (Value::Map(map), Value::Str(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Nil)),
        (Value::Array(items), Value::Int(i)) => {
            if *i < 0 || *i as usize >= items.len() {
                Ok(Value::Nil)
            } else {
                Ok(items[*i as usize].clone())
            }
        }
        (b, i) => Err(EvalError::TypeMismatch(format!(
            "cannot index {} with {}",
            b.type_name(),
            i.type_name()
        ))),
    }
}
