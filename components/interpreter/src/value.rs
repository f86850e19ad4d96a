//! Runtime values
//!
//! Values live in the slots of an execution context's stack. Functions are
//! either native Rust closures or interpreted closures over a [`Proto`].

use std::any::Any;
use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use bytecode_system::{Constant, Proto};

use crate::context::ExecutionContext;
use crate::coroutine::ThreadRef;
use crate::error::CallResult;
use crate::metatable::MetaEvent;

/// Signature of a native function body.
///
/// Arguments occupy the frame's slots `0..get_top()`; the function pushes
/// its results and returns how many of the topmost values are results.
pub type NativeFn = dyn Fn(&mut ExecutionContext) -> CallResult<usize>;

/// A host function callable from the runtime
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    /// Wrap a Rust closure
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext) -> CallResult<usize> + 'static,
    {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    /// Name used in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, ctx: &mut ExecutionContext) -> CallResult<usize> {
        (self.func)(ctx)
    }
}

/// An interpreted function: a prototype ready to run
#[derive(Debug)]
pub struct Closure {
    /// The function prototype
    pub proto: Rc<Proto>,
}

impl Closure {
    /// Create a closure over a prototype
    pub fn new(proto: Rc<Proto>) -> Self {
        Self { proto }
    }
}

/// Anything callable without metamethods
#[derive(Clone)]
pub enum Function {
    /// Host function
    Native(NativeFunction),
    /// Interpreted closure
    Closure(Rc<Closure>),
}

/// Opaque host data with its own metamethods
pub struct UserData {
    data: RefCell<Box<dyn Any>>,
    metatable: RefCell<HashMap<MetaEvent, Value>>,
}

impl UserData {
    /// Wrap host data with an empty metatable
    pub fn new<T: Any>(data: T) -> Self {
        Self {
            data: RefCell::new(Box::new(data)),
            metatable: RefCell::new(HashMap::new()),
        }
    }

    /// Builder-style metamethod registration
    pub fn with_metamethod(self, event: MetaEvent, handler: Value) -> Self {
        self.set_metamethod(event, handler);
        self
    }

    /// Install or replace a metamethod
    pub fn set_metamethod(&self, event: MetaEvent, handler: Value) {
        self.metatable.borrow_mut().insert(event, handler);
    }

    /// Metamethod registered for `event`, if any
    pub fn metamethod(&self, event: MetaEvent) -> Option<Value> {
        self.metatable.borrow().get(&event).cloned()
    }

    /// Borrow the payload as `T`
    pub fn borrow<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.data.borrow(), |data| data.downcast_ref::<T>()).ok()
    }
}

/// A runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// Floating-point number
    Number(f64),
    /// Immutable string
    String(Rc<str>),
    /// Callable function
    Function(Function),
    /// Host data
    UserData(Rc<UserData>),
    /// Execution context (coroutine)
    Thread(ThreadRef),
}

impl Value {
    /// Native function value
    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext) -> CallResult<usize> + 'static,
    {
        Value::Function(Function::Native(NativeFunction::new(name, func)))
    }

    /// Interpreted closure value
    pub fn closure(proto: impl Into<Rc<Proto>>) -> Self {
        Value::Function(Function::Closure(Rc::new(Closure::new(proto.into()))))
    }

    /// Userdata value
    pub fn userdata(data: UserData) -> Self {
        Value::UserData(Rc::new(data))
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::UserData(_) => "userdata",
            Value::Thread(_) => "thread",
        }
    }

    /// Only nil and false are falsy
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Check for nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Integer view (floats with an exact integer value convert)
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Integer(n) => Some(n),
            Value::Number(n) if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 => {
                Some(n as i64)
            }
            _ => None,
        }
    }

    /// Numeric view
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Value::Integer(n) => Some(n as f64),
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// String view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Thread view
    pub fn as_thread(&self) -> Option<&ThreadRef> {
        match self {
            Value::Thread(t) => Some(t),
            _ => None,
        }
    }

    /// Userdata view
    pub fn as_userdata(&self) -> Option<&Rc<UserData>> {
        match self {
            Value::UserData(u) => Some(u),
            _ => None,
        }
    }

    /// Primitive equality without metamethods; `1 == 1.0`
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(_), Value::Number(_)) | (Value::Number(_), Value::Integer(_)) => {
                self.as_number() == other.as_number()
            }
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(Function::Native(a)), Value::Function(Function::Native(b))) => {
                Rc::ptr_eq(&a.func, &b.func)
            }
            (Value::Function(Function::Closure(a)), Value::Function(Function::Closure(b))) => {
                Rc::ptr_eq(a, b)
            }
            (Value::UserData(a), Value::UserData(b)) => Rc::ptr_eq(a, b),
            (Value::Thread(a), Value::Thread(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{:.1}", n),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Function(Function::Native(n)) => {
                write!(f, "function: builtin {} {:p}", n.name, Rc::as_ptr(&n.func))
            }
            Value::Function(Function::Closure(c)) => {
                write!(f, "function: {} {:p}", c.proto.name, Rc::as_ptr(c))
            }
            Value::UserData(u) => write!(f, "userdata: {:p}", Rc::as_ptr(u)),
            Value::Thread(t) => write!(f, "thread: {:p}", t.as_ptr()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<ThreadRef> for Value {
    fn from(t: ThreadRef) -> Self {
        Value::Thread(t)
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(n) => Value::Integer(*n),
            Constant::Number(n) => Value::Number(*n),
            Constant::String(s) => Value::from(s.as_str()),
        }
    }
}
