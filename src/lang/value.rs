use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use super::container::Container;
use super::types::TypeSymbol;

/// Runtime value in the Cinder language.
///
/// Scalars are copied on assignment; containers and foreign objects are
/// shared references, so `a = b` on a container aliases it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null singleton. Comparable for (in)equality only.
    Null,

    /// 64-bit signed integer.
    Int(i64),

    /// 32-bit float, produced by `1.5f` literals.
    Float(f32),

    /// 64-bit float, produced by `1.5` literals.
    Double(f64),

    Bool(bool),

    Char(char),

    /// UTF-8 string value.
    Str(String),

    /// Ordered key/value map; the language's only composite type.
    Container(ContainerRef),

    /// Opaque host object handed out by a routine.
    Foreign(ForeignObject),
}

impl Value {
    pub fn new_container() -> Self {
        Value::Container(ContainerRef::new(Container::new()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Static type of this value; foreign objects have none.
    pub fn type_symbol(&self) -> Option<TypeSymbol> {
        Some(match self {
            Value::Null => TypeSymbol::Null,
            Value::Int(_) => TypeSymbol::Int,
            Value::Float(_) => TypeSymbol::Float,
            Value::Double(_) => TypeSymbol::Double,
            Value::Bool(_) => TypeSymbol::Boolean,
            Value::Char(_) => TypeSymbol::Char,
            Value::Str(_) => TypeSymbol::String,
            Value::Container(_) => TypeSymbol::Container,
            Value::Foreign(_) => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self.type_symbol() {
            Some(symbol) => symbol.name(),
            None => "foreign",
        }
    }

    /// Widens a scalar to `f64`. Strings are parsed; chars use their code point.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            Value::Char(c) => Some(*c as u32 as f64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Condition semantics: booleans as-is, null is false, anything numeric
    /// is true when non-zero. `None` when the value has no truth value.
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Null => Some(false),
            Value::Container(_) | Value::Foreign(_) => None,
            other => other.as_f64().map(|x| x != 0.0),
        }
    }

    /// Equality used for container removal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Str(_), _) | (_, Value::Str(_)) => self.to_string() == other.to_string(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Container(a), Value::Container(b)) => a == b,
            (Value::Foreign(a), Value::Foreign(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// JSON rendering used for container stringification.
    pub fn to_json(&self) -> serde_json::Value {
        let mut visiting = Vec::new();
        json_of(self, &mut visiting)
    }
}

fn json_of(value: &Value, visiting: &mut Vec<*const RefCell<Container>>) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Int(n) => Json::from(*n),
        Value::Float(x) => serde_json::Number::from_f64(*x as f64)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Double(x) => serde_json::Number::from_f64(*x)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Bool(b) => Json::Bool(*b),
        Value::Char(c) => Json::String(c.to_string()),
        Value::Str(s) => Json::String(s.clone()),
        Value::Foreign(object) => Json::String(format!("<{}>", object.type_name())),
        Value::Container(container) => {
            let ptr = container.as_ptr();
            if visiting.contains(&ptr) {
                return Json::Null;
            }
            visiting.push(ptr);

            let inner = container.borrow();
            let json = match inner.as_array() {
                Some(items) => Json::Array(items.into_iter().map(|v| json_of(v, visiting)).collect()),
                None => {
                    let mut map = serde_json::Map::new();
                    for (key, item) in inner.iter() {
                        map.insert(key.to_string(), json_of(item, visiting));
                    }
                    Json::Object(map)
                }
            };

            visiting.pop();
            json
        }
    }
}

/// Renders a double so that integral values keep a fractional part (`1.0`).
pub fn format_double(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

impl std::fmt::Display for Value {
    /// Script-visible string form (what `"" + value` produces).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", format_double(*x as f64)),
            Value::Double(x) => write!(f, "{}", format_double(*x)),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(s) => write!(f, "{}", s),
            Value::Container(_) => write!(f, "{}", self.to_json()),
            Value::Foreign(object) => write!(f, "<{}>", object.type_name()),
        }
    }
}

/// Shared handle to a container. Equality is identity.
#[derive(Clone)]
pub struct ContainerRef(Rc<RefCell<Container>>);

impl ContainerRef {
    pub fn new(container: Container) -> Self {
        ContainerRef(Rc::new(RefCell::new(container)))
    }

    pub fn borrow(&self) -> Ref<'_, Container> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Container> {
        self.0.borrow_mut()
    }

    pub fn as_ptr(&self) -> *const RefCell<Container> {
        Rc::as_ptr(&self.0)
    }
}

impl PartialEq for ContainerRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.try_borrow() {
            Ok(container) => write!(f, "Container({} entries)", container.len()),
            Err(_) => write!(f, "Container(<borrowed>)"),
        }
    }
}

/// Host object reachable from scripts only through the object bridge.
#[derive(Clone)]
pub struct ForeignObject {
    type_name: String,
    inner: Rc<dyn Any>,
}

impl ForeignObject {
    pub fn new<T: Any>(type_name: impl Into<String>, value: T) -> Self {
        ForeignObject {
            type_name: type_name.into(),
            inner: Rc::new(value),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl PartialEq for ForeignObject {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ForeignObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ForeignObject({})", self.type_name)
    }
}
