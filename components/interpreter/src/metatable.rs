//! Metamethod lookup
//!
//! The dispatcher consults metamethods for two events: calling a
//! non-function (`__call`) and closing a to-be-closed slot (`__close`).
//! How metatables are stored belongs to the object model; the core only
//! needs the [`MetamethodLookup`] seam.

use std::fmt;

use crate::value::Value;

/// Events the execution core looks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaEvent {
    /// Calling a value that is not a function
    Call,
    /// Closing a to-be-closed slot
    Close,
}

impl MetaEvent {
    /// Conventional metamethod name
    pub fn name(self) -> &'static str {
        match self {
            MetaEvent::Call => "__call",
            MetaEvent::Close => "__close",
        }
    }

    /// Parse a conventional metamethod name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "__call" => Some(MetaEvent::Call),
            "__close" => Some(MetaEvent::Close),
            _ => None,
        }
    }
}

impl fmt::Display for MetaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves the metamethod a value has for an event
pub trait MetamethodLookup {
    /// Metamethod of `value` for `event`; `None` when absent or nil
    fn lookup(&self, value: &Value, event: MetaEvent) -> Option<Value>;
}

/// Reads metamethods from userdata metatables; other values have none
#[derive(Debug, Default, Clone, Copy)]
pub struct UserDataMetamethods;

impl MetamethodLookup for UserDataMetamethods {
    fn lookup(&self, value: &Value, event: MetaEvent) -> Option<Value> {
        match value {
            Value::UserData(ud) => ud.metamethod(event).filter(|m| !m.is_nil()),
            _ => None,
        }
    }
}
