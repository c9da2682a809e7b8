//! Policy-gated access to host objects.
//!
//! The interpreter only reaches this module when a member, index or method
//! operation targets a [`Value::Foreign`]; the language's own values never
//! pass through it.

use crate::lang::value::{ForeignObject, Value};
use crate::runtime::host::HostError;

/// One kind of foreign access, as presented to an [`AccessPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum Access<'a> {
    GetMember(&'a str),
    SetMember(&'a str),
    GetIndex,
    SetIndex,
    Invoke(&'a str),
}

impl std::fmt::Display for Access<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::GetMember(name) => write!(f, "read member '{}'", name),
            Access::SetMember(name) => write!(f, "write member '{}'", name),
            Access::GetIndex => write!(f, "read index"),
            Access::SetIndex => write!(f, "write index"),
            Access::Invoke(name) => write!(f, "invoke '{}'", name),
        }
    }
}

pub trait AccessPolicy {
    fn permits(&self, object: &ForeignObject, access: &Access<'_>) -> bool;
}

pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn permits(&self, _object: &ForeignObject, _access: &Access<'_>) -> bool {
        true
    }
}

pub struct DenyAll;

impl AccessPolicy for DenyAll {
    fn permits(&self, _object: &ForeignObject, _access: &Access<'_>) -> bool {
        false
    }
}

/// Host implementation of the reflective operations.
pub trait ForeignHandler {
    fn get_member(&self, object: &ForeignObject, name: &str) -> Result<Value, HostError>;

    fn set_member(&self, object: &ForeignObject, name: &str, value: Value) -> Result<(), HostError>;

    fn get_index(&self, object: &ForeignObject, index: &Value) -> Result<Value, HostError> {
        let _ = index;
        Err(unsupported("index read", object))
    }

    fn set_index(&self, object: &ForeignObject, index: &Value, value: Value) -> Result<(), HostError> {
        let _ = (index, value);
        Err(unsupported("index write", object))
    }

    fn invoke(&self, object: &ForeignObject, method: &str, args: &[Value]) -> Result<Value, HostError>;
}

fn unsupported(operation: &str, object: &ForeignObject) -> HostError {
    HostError::Unsupported {
        operation: operation.to_string(),
        type_name: object.type_name().to_string(),
    }
}

/// A handler guarded by a policy. Every call is checked before dispatch.
pub struct ObjectBridge {
    handler: Box<dyn ForeignHandler>,
    policy: Box<dyn AccessPolicy>,
}

impl ObjectBridge {
    pub fn new(handler: impl ForeignHandler + 'static, policy: impl AccessPolicy + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            policy: Box::new(policy),
        }
    }

    fn check(&self, object: &ForeignObject, access: Access<'_>) -> Result<(), HostError> {
        if self.policy.permits(object, &access) {
            Ok(())
        } else {
            Err(HostError::Denied {
                access: format!("{} on {}", access, object.type_name()),
            })
        }
    }

    pub fn get_member(&self, object: &ForeignObject, name: &str) -> Result<Value, HostError> {
        self.check(object, Access::GetMember(name))?;
        self.handler.get_member(object, name)
    }

    pub fn set_member(&self, object: &ForeignObject, name: &str, value: Value) -> Result<(), HostError> {
        self.check(object, Access::SetMember(name))?;
        self.handler.set_member(object, name, value)
    }

    pub fn get_index(&self, object: &ForeignObject, index: &Value) -> Result<Value, HostError> {
        self.check(object, Access::GetIndex)?;
        self.handler.get_index(object, index)
    }

    pub fn set_index(&self, object: &ForeignObject, index: &Value, value: Value) -> Result<(), HostError> {
        self.check(object, Access::SetIndex)?;
        self.handler.set_index(object, index, value)
    }

    pub fn invoke(&self, object: &ForeignObject, method: &str, args: &[Value]) -> Result<Value, HostError> {
        self.check(object, Access::Invoke(method))?;
        self.handler.invoke(object, method, args)
    }
}
