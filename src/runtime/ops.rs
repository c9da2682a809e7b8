//! Value semantics of the arithmetic, comparison, logic and bit opcodes.
//!
//! Every operation is `dst = dst op src`. The result takes the type of the
//! destination: `1 + 2.5` is `3`, `2.5 + 1` is `3.5`.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::bytecode::Opcode;
use crate::lang::container::Key;
use crate::lang::value::{ContainerRef, Value};
use crate::runtime::runtime_error::{ExecutionError, division_by_zero, type_error};

/// Numbers normalized for computation. Reals that do not fit a `Decimal`
/// (infinities, NaN, magnitudes past 7.9e28) stay `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Exact(Decimal),
    Real(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Number> {
        let real = |exact: Option<Decimal>, x: f64| exact.map_or(Number::Real(x), Number::Exact);
        match value {
            Value::Int(n) => Some(Number::Exact(Decimal::from(*n))),
            Value::Char(c) => Some(Number::Exact(Decimal::from(*c as u32))),
            Value::Float(x) => Some(real(Decimal::from_f32(*x), *x as f64)),
            Value::Double(x) => Some(real(Decimal::from_f64(*x), *x)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Exact(d) => d.to_f64().unwrap_or(f64::NAN),
            Number::Real(x) => x,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Exact(d) => d.is_zero(),
            Number::Real(x) => x == 0.0,
        }
    }
}

/// `ADD`, `SUB`, `MUL`, `DIV`, `MOD`.
///
/// String destinations concatenate (`ADD`) or cut the first occurrence of
/// the source's string form (`SUB`). Container destinations append or
/// remove in place and are returned unchanged as a handle.
pub fn arithmetic(op: Opcode, dst: Value, src: &Value) -> Result<Value, ExecutionError> {
    match (&dst, op) {
        (Value::Str(s), Opcode::Add) => Ok(Value::Str(format!("{}{}", s, src))),
        (Value::Str(s), Opcode::Sub) => Ok(Value::Str(remove_first(s, &src.to_string()))),
        (Value::Container(container), Opcode::Add | Opcode::Sub) => {
            update_container(container, op, src)?;
            Ok(dst)
        }
        _ => numeric(op, &dst, src),
    }
}

fn remove_first(haystack: &str, needle: &str) -> String {
    match haystack.find(needle) {
        Some(at) if !needle.is_empty() => {
            let mut out = String::with_capacity(haystack.len() - needle.len());
            out.push_str(&haystack[..at]);
            out.push_str(&haystack[at + needle.len()..]);
            out
        }
        _ => haystack.to_string(),
    }
}

fn update_container(container: &ContainerRef, op: Opcode, src: &Value) -> Result<(), ExecutionError> {
    // Collect first: `c += c` reads and writes the same container.
    let items: Vec<Value> = match src {
        Value::Container(other) => other.borrow().values().cloned().collect(),
        single => vec![single.clone()],
    };

    let mut target = container.borrow_mut();
    for item in items {
        if op == Opcode::Add {
            if target.append(item).is_none() {
                return Err(ExecutionError::new("container has no free key to append under"));
            }
        } else {
            target.remove_value(&item);
        }
    }
    Ok(())
}

fn numeric(op: Opcode, dst: &Value, src: &Value) -> Result<Value, ExecutionError> {
    let mismatch = || type_error(op.mnemonic(), dst.type_name(), src.type_name());
    if !matches!(op, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod) {
        return Err(mismatch());
    }
    let left = Number::of(dst).ok_or_else(mismatch)?;
    let right = Number::of(src).ok_or_else(mismatch)?;

    let integral_dst = matches!(dst, Value::Int(_) | Value::Char(_));
    if matches!(op, Opcode::Div | Opcode::Mod) && integral_dst && right.is_zero() {
        return Err(division_by_zero());
    }

    let exact = match (left, right) {
        (Number::Exact(a), Number::Exact(b)) => exact_op(op, a, b),
        _ => None,
    };
    let result = match exact {
        Some(d) => Number::Exact(d),
        None if integral_dst => return Err(overflow()),
        // Float and double destinations fall back to IEEE arithmetic.
        None => Number::Real(real_op(op, left.as_f64(), right.as_f64())),
    };

    convert_like(dst, result)
}

fn exact_op(op: Opcode, a: Decimal, b: Decimal) -> Option<Decimal> {
    match op {
        Opcode::Add => a.checked_add(b),
        Opcode::Sub => a.checked_sub(b),
        Opcode::Mul => a.checked_mul(b),
        Opcode::Div => a.checked_div(b),
        _ => a.checked_rem(b),
    }
}

fn real_op(op: Opcode, a: f64, b: f64) -> f64 {
    match op {
        Opcode::Add => a + b,
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        _ => a % b,
    }
}

fn overflow() -> ExecutionError {
    ExecutionError::new("integer overflow")
}

/// Converts a computed number back to the destination's type.
fn convert_like(dst: &Value, result: Number) -> Result<Value, ExecutionError> {
    match dst {
        Value::Int(_) => match result {
            Number::Exact(d) => d.trunc().to_i64().map(Value::Int).ok_or_else(overflow),
            Number::Real(x) if x.is_finite() && x >= i64::MIN as f64 && x < i64::MAX as f64 => {
                Ok(Value::Int(x.trunc() as i64))
            }
            Number::Real(_) => Err(overflow()),
        },
        Value::Char(_) => {
            let code = match result {
                Number::Exact(d) => d.trunc().to_u32(),
                Number::Real(x) if x >= 0.0 && x <= u32::MAX as f64 => Some(x.trunc() as u32),
                Number::Real(_) => None,
            };
            code.and_then(char::from_u32)
                .map(Value::Char)
                .ok_or_else(|| ExecutionError::new("result is not a valid character"))
        }
        Value::Float(_) => Ok(Value::Float(result.as_f64() as f32)),
        _ => Ok(Value::Double(result.as_f64())),
    }
}

/// `CEQ`, `CNE`, `CG`, `CGE`, `CL`, `CLE`.
pub fn compare(op: Opcode, left: &Value, right: &Value) -> Result<bool, ExecutionError> {
    let equality_only = |equal: bool| match op {
        Opcode::Ceq => Ok(equal),
        Opcode::Cne => Ok(!equal),
        _ => Err(type_error(op.mnemonic(), left.type_name(), right.type_name())),
    };

    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => equality_only(left.is_null() && right.is_null()),
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Ok(ordering(op, left.to_string().cmp(&right.to_string())))
        }
        (Value::Bool(a), Value::Bool(b)) => equality_only(a == b),
        (Value::Container(a), Value::Container(b)) => equality_only(a == b),
        (Value::Foreign(a), Value::Foreign(b)) => equality_only(a == b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(order) => Ok(ordering(op, order)),
                None => Ok(op == Opcode::Cne),
            },
            _ => Err(type_error(op.mnemonic(), left.type_name(), right.type_name())),
        },
    }
}

fn ordering(op: Opcode, order: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Opcode::Ceq => order == Equal,
        Opcode::Cne => order != Equal,
        Opcode::Cg => order == Greater,
        Opcode::Cge => order != Less,
        Opcode::Cl => order == Less,
        _ => order != Greater,
    }
}

fn truth(op: Opcode, value: &Value) -> Result<bool, ExecutionError> {
    value.truthiness().ok_or_else(|| {
        ExecutionError::new(format!(
            "type error: {} needs a condition, got {}",
            op.mnemonic(),
            value.type_name()
        ))
    })
}

/// `AND`, `OR`: null is false, numbers are true when non-zero.
pub fn logic(op: Opcode, left: &Value, right: &Value) -> Result<bool, ExecutionError> {
    let a = truth(op, left)?;
    let b = truth(op, right)?;
    Ok(if op == Opcode::And { a && b } else { a || b })
}

pub fn not(value: &Value) -> Result<bool, ExecutionError> {
    truth(Opcode::Not, value).map(|b| !b)
}

pub fn negate(value: &Value) -> Result<Value, ExecutionError> {
    match value {
        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        Value::Float(x) => Ok(Value::Float(-x)),
        Value::Double(x) => Ok(Value::Double(-x)),
        other => Err(ExecutionError::new(format!("cannot negate {}", other.type_name()))),
    }
}

/// `SHL`, `SHR`, `ANDB`, `ORB`, `XOR`: integers only.
pub fn bitwise(op: Opcode, left: &Value, right: &Value) -> Result<Value, ExecutionError> {
    let (Value::Int(a), Value::Int(b)) = (left, right) else {
        return Err(type_error(op.mnemonic(), left.type_name(), right.type_name()));
    };

    let shift = || {
        u32::try_from(*b)
            .ok()
            .filter(|s| *s < 64)
            .ok_or_else(|| ExecutionError::new(format!("shift amount {} out of range", b)))
    };

    Ok(Value::Int(match op {
        Opcode::Shl => a << shift()?,
        Opcode::Shr => a >> shift()?,
        Opcode::Andb => a & b,
        Opcode::Orb => a | b,
        _ => a ^ b,
    }))
}

pub fn bit_not(value: &Value) -> Result<Value, ExecutionError> {
    match value {
        Value::Int(n) => Ok(Value::Int(!n)),
        other => Err(ExecutionError::new(format!(
            "type error: NOTB needs an int, got {}",
            other.type_name()
        ))),
    }
}

/// `PTR`: the iteration position after `current` in `collection`, or null
/// once exhausted. Container positions are keys, string positions indices.
pub fn advance(collection: &Value, current: &Value) -> Result<Value, ExecutionError> {
    match collection {
        Value::Null => Ok(Value::Null),
        Value::Container(container) => Ok(container
            .borrow()
            .next_key(current)
            .map_or(Value::Null, |key: Key| key.to_value())),
        Value::Str(s) => {
            let len = s.chars().count() as i64;
            let next = match current {
                Value::Int(i) if *i >= 0 && *i < len => i + 1,
                _ => 0,
            };
            Ok(if next < len { Value::Int(next) } else { Value::Null })
        }
        other => Err(ExecutionError::new(format!(
            "cannot iterate over a value of type {}",
            other.type_name()
        ))),
    }
}
