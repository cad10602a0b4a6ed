//! Tagged condition expressions and their interpreter.
//!
//! Conditions are plain data: they can be loaded from rule files, checked
//! statically with [`Condition::validate`], and evaluated against a context
//! map without any general-purpose expression engine.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{OrchestratorError, Result};

/// Named runtime values a condition is evaluated against.
pub type ContextMap = Map<String, Value>;

/// Object values become a context map; anything else yields an empty one.
pub fn context_map(value: Value) -> ContextMap {
    match value {
        Value::Object(map) => map,
        _ => ContextMap::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("missing variable '{0}'")]
    MissingVariable(String),
    #[error("cannot compare {left} {op} {right}")]
    TypeMismatch {
        left: String,
        op: &'static str,
        right: String,
    },
    #[error("'{0}' is not a boolean flag")]
    NotAFlag(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    Literal { value: Value },
    Variable { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Compare {
        variable: String,
        op: CompareOp,
        value: Operand,
    },
    And {
        all: Vec<Condition>,
    },
    Or {
        any: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    /// True when the variable is `true` (or a non-zero number).
    Flag {
        variable: String,
    },
}

impl Condition {
    pub fn compare(variable: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            variable: variable.into(),
            op,
            value: Operand::Literal {
                value: value.into(),
            },
        }
    }

    /// Compare two context variables.
    pub fn compare_vars(
        variable: impl Into<String>,
        op: CompareOp,
        other: impl Into<String>,
    ) -> Self {
        Self::Compare {
            variable: variable.into(),
            op,
            value: Operand::Variable { name: other.into() },
        }
    }

    pub fn gt(variable: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(variable, CompareOp::Gt, value)
    }

    pub fn ge(variable: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(variable, CompareOp::Ge, value)
    }

    pub fn lt(variable: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(variable, CompareOp::Lt, value)
    }

    pub fn le(variable: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(variable, CompareOp::Le, value)
    }

    pub fn eq(variable: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(variable, CompareOp::Eq, value)
    }

    pub fn flag(variable: impl Into<String>) -> Self {
        Self::Flag {
            variable: variable.into(),
        }
    }

    pub fn and(all: Vec<Condition>) -> Self {
        Self::And { all }
    }

    pub fn or(any: Vec<Condition>) -> Self {
        Self::Or { any }
    }

    pub fn not(condition: Condition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    pub fn evaluate(&self, context: &ContextMap) -> std::result::Result<bool, EvalError> {
        match self {
            Self::Compare {
                variable,
                op,
                value,
            } => {
                let left = lookup(context, variable)?;
                let right = match value {
                    Operand::Literal { value } => value,
                    Operand::Variable { name } => lookup(context, name)?,
                };
                compare(left, *op, right)
            }
            Self::And { all } => {
                for c in all {
                    if !c.evaluate(context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or { any } => {
                for c in any {
                    if c.evaluate(context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { condition } => Ok(!condition.evaluate(context)?),
            Self::Flag { variable } => match lookup(context, variable)? {
                Value::Bool(b) => Ok(*b),
                Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
                _ => Err(EvalError::NotAFlag(variable.clone())),
            },
        }
    }

    /// Reject empty variable names and empty combinators.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Compare {
                variable, value, ..
            } => {
                check_name(variable)?;
                match value {
                    Operand::Variable { name } => check_name(name),
                    Operand::Literal { value } if value.is_array() || value.is_object() => {
                        Err(OrchestratorError::Validation(format!(
                            "condition on '{variable}' compares against a non-scalar literal"
                        )))
                    }
                    Operand::Literal { .. } => Ok(()),
                }
            }
            Self::And { all: items } | Self::Or { any: items } => {
                if items.is_empty() {
                    return Err(OrchestratorError::Validation(
                        "and/or conditions need at least one operand".into(),
                    ));
                }
                items.iter().try_for_each(Condition::validate)
            }
            Self::Not { condition } => condition.validate(),
            Self::Flag { variable } => check_name(variable),
        }
    }

    /// Every variable name the condition reads.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Compare {
                variable, value, ..
            } => {
                out.insert(variable);
                if let Operand::Variable { name } = value {
                    out.insert(name);
                }
            }
            Self::And { all: items } | Self::Or { any: items } => {
                items.iter().for_each(|c| c.collect_variables(out));
            }
            Self::Not { condition } => condition.collect_variables(out),
            Self::Flag { variable } => {
                out.insert(variable);
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare {
                variable,
                op,
                value,
            } => match value {
                Operand::Literal { value } => write!(f, "{variable} {} {value}", op.symbol()),
                Operand::Variable { name } => write!(f, "{variable} {} {name}", op.symbol()),
            },
            Self::And { all } => write_joined(f, all, " and "),
            Self::Or { any } => write_joined(f, any, " or "),
            Self::Not { condition } => write!(f, "not ({condition})"),
            Self::Flag { variable } => f.write_str(variable),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Condition], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, c) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{c}")?;
    }
    f.write_str(")")
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(OrchestratorError::Validation(
            "condition variable name must not be empty".into(),
        ))
    } else {
        Ok(())
    }
}

fn lookup<'a>(context: &'a ContextMap, name: &str) -> std::result::Result<&'a Value, EvalError> {
    context
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| EvalError::MissingVariable(name.to_string()))
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> std::result::Result<bool, EvalError> {
    let mismatch = || EvalError::TypeMismatch {
        left: type_name(left).to_string(),
        op: op.symbol(),
        right: type_name(right).to_string(),
    };

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().ok_or_else(mismatch)?, b.as_f64().ok_or_else(mismatch)?);
            a.partial_cmp(&b).ok_or_else(mismatch)?
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) if matches!(op, CompareOp::Eq | CompareOp::Ne) => a.cmp(b),
        _ => return Err(mismatch()),
    };
    Ok(op.holds(ordering))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
