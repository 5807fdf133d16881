// Copyright 2018-2026 the Deno authors. MIT license.

//! Script values exchanged between modules, contexts and pipes.
//!
//! Objects and functions have reference identity: cloning a [`Value`] that
//! holds one yields another handle to the same underlying object, and
//! equality compares identity rather than structure.

use std::any::Any;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::AnyError;

#[derive(Clone, Default)]
pub enum Value {
  #[default]
  Undefined,
  Null,
  Bool(bool),
  Number(f64),
  String(String),
  Array(Vec<Value>),
  Object(Object),
  Function(Function),
  Host(HostObject),
}

impl Value {
  pub fn is_undefined(&self) -> bool {
    matches!(self, Value::Undefined)
  }

  pub fn is_nullish(&self) -> bool {
    matches!(self, Value::Undefined | Value::Null)
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&[Value]> {
    match self {
      Value::Array(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_object(&self) -> Option<&Object> {
    match self {
      Value::Object(object) => Some(object),
      _ => None,
    }
  }

  pub fn as_function(&self) -> Option<&Function> {
    match self {
      Value::Function(function) => Some(function),
      _ => None,
    }
  }

  pub fn as_host(&self) -> Option<&HostObject> {
    match self {
      Value::Host(host) => Some(host),
      _ => None,
    }
  }

  /// Property lookup. Anything that is not an object yields `undefined`.
  pub fn get(&self, key: &str) -> Value {
    match self {
      Value::Object(object) => object.get(key),
      _ => Value::Undefined,
    }
  }

  pub fn type_of(&self) -> &'static str {
    match self {
      Value::Undefined => "undefined",
      Value::Null | Value::Array(_) | Value::Object(_) => "object",
      Value::Bool(_) => "boolean",
      Value::Number(_) => "number",
      Value::String(_) => "string",
      Value::Function(_) => "function",
      Value::Host(_) => "object",
    }
  }

  /// Serializes the value the way `JSON.stringify` does with a replacer that
  /// drops everything JSON cannot represent. Returns `None` when the value as
  /// a whole is not representable. Inside arrays such entries become `null`,
  /// inside objects the property is omitted. A reference back to an object
  /// that is already being serialized is dropped the same way.
  pub fn to_json(&self) -> Option<serde_json::Value> {
    let mut stack = HashSet::new();
    self.to_json_inner(&mut stack)
  }

  fn to_json_inner(
    &self,
    stack: &mut HashSet<*const ()>,
  ) -> Option<serde_json::Value> {
    match self {
      Value::Undefined | Value::Function(_) | Value::Host(_) => None,
      Value::Null => Some(serde_json::Value::Null),
      Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
      Value::Number(n) => Some(number_to_json(*n)),
      Value::String(s) => Some(serde_json::Value::String(s.clone())),
      Value::Array(items) => Some(serde_json::Value::Array(
        items
          .iter()
          .map(|item| {
            item
              .to_json_inner(stack)
              .unwrap_or(serde_json::Value::Null)
          })
          .collect(),
      )),
      Value::Object(object) => {
        let ptr = object.as_ptr();
        if !stack.insert(ptr) {
          return None;
        }
        let mut map = serde_json::Map::new();
        for (key, value) in object.entries() {
          if let Some(value) = value.to_json_inner(stack) {
            map.insert(key, value);
          }
        }
        stack.remove(&ptr);
        Some(serde_json::Value::Object(map))
      }
    }
  }

  pub fn from_json(value: &serde_json::Value) -> Value {
    match value {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(*b),
      serde_json::Value::Number(n) => {
        Value::Number(n.as_f64().unwrap_or(f64::NAN))
      }
      serde_json::Value::String(s) => Value::String(s.clone()),
      serde_json::Value::Array(items) => {
        Value::Array(items.iter().map(Value::from_json).collect())
      }
      serde_json::Value::Object(map) => Value::Object(Object::from_entries(
        map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))),
      )),
    }
  }
}

fn number_to_json(n: f64) -> serde_json::Value {
  if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
    return serde_json::Value::from(n as i64);
  }
  serde_json::Number::from_f64(n)
    .map(serde_json::Value::Number)
    .unwrap_or(serde_json::Value::Null)
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Undefined, Value::Undefined) => true,
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Number(a), Value::Number(b)) => a == b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::Array(a), Value::Array(b)) => a == b,
      (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
      (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
      (Value::Host(a), Value::Host(b)) => a.ptr_eq(b),
      _ => false,
    }
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Value::Undefined => write!(f, "undefined"),
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Number(n) => write!(f, "{n}"),
      Value::String(s) => write!(f, "{s:?}"),
      Value::Array(items) => f.debug_list().entries(items).finish(),
      Value::Object(object) => object.fmt(f),
      Value::Function(function) => function.fmt(f),
      Value::Host(host) => host.fmt(f),
    }
  }
}

/// Console style rendering: strings are printed raw, everything else in its
/// JSON form where one exists.
impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Value::String(s) => f.write_str(s),
      Value::Function(_) => f.write_str("function"),
      Value::Host(_) => f.write_str("[object Host]"),
      other => match other.to_json() {
        Some(json) => write!(f, "{json}"),
        None => f.write_str("undefined"),
      },
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Number(n)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Number(n.into())
  }
}

impl From<u32> for Value {
  fn from(n: u32) -> Self {
    Value::Number(n.into())
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<Vec<Value>> for Value {
  fn from(items: Vec<Value>) -> Self {
    Value::Array(items)
  }
}

impl From<Object> for Value {
  fn from(object: Object) -> Self {
    Value::Object(object)
  }
}

impl From<Function> for Value {
  fn from(function: Function) -> Self {
    Value::Function(function)
  }
}

impl From<HostObject> for Value {
  fn from(host: HostObject) -> Self {
    Value::Host(host)
  }
}

impl From<serde_json::Value> for Value {
  fn from(json: serde_json::Value) -> Self {
    Value::from_json(&json)
  }
}

#[derive(Default)]
struct ObjectInner {
  properties: RefCell<IndexMap<String, Value>>,
  frozen: Cell<bool>,
}

/// A mutable, ordered property bag with reference identity.
#[derive(Clone, Default)]
pub struct Object(Rc<ObjectInner>);

impl Object {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_entries<K: Into<String>>(
    entries: impl IntoIterator<Item = (K, Value)>,
  ) -> Self {
    let object = Self::new();
    object
      .0
      .properties
      .borrow_mut()
      .extend(entries.into_iter().map(|(k, v)| (k.into(), v)));
    object
  }

  pub fn get(&self, key: &str) -> Value {
    self
      .0
      .properties
      .borrow()
      .get(key)
      .cloned()
      .unwrap_or_default()
  }

  pub fn has(&self, key: &str) -> bool {
    self.0.properties.borrow().contains_key(key)
  }

  /// Returns `false` without modifying anything when the object is frozen.
  pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
    if self.is_frozen() {
      return false;
    }
    self
      .0
      .properties
      .borrow_mut()
      .insert(key.into(), value.into());
    true
  }

  pub fn delete(&self, key: &str) -> bool {
    if self.is_frozen() {
      return false;
    }
    self.0.properties.borrow_mut().shift_remove(key).is_some()
  }

  pub fn keys(&self) -> Vec<String> {
    self.0.properties.borrow().keys().cloned().collect()
  }

  pub fn entries(&self) -> Vec<(String, Value)> {
    self
      .0
      .properties
      .borrow()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.0.properties.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn freeze(&self) {
    self.0.frozen.set(true);
  }

  pub fn is_frozen(&self) -> bool {
    self.0.frozen.get()
  }

  pub fn ptr_eq(&self, other: &Object) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  fn as_ptr(&self) -> *const () {
    Rc::as_ptr(&self.0) as *const ()
  }

  /// A frozen deep copy of JSON-representable data. Used for option
  /// snapshots handed to less privileged code.
  pub fn snapshot(json: &serde_json::Value) -> Value {
    fn freeze_all(value: &Value) {
      match value {
        Value::Object(object) => {
          for (_, v) in object.entries() {
            freeze_all(&v);
          }
          object.freeze();
        }
        Value::Array(items) => items.iter().for_each(freeze_all),
        _ => {}
      }
    }
    let value = Value::from_json(json);
    freeze_all(&value);
    value
  }
}

impl fmt::Debug for Object {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    // Keys only, objects may be cyclic.
    write!(f, "Object {:?}", self.keys())
  }
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value, AnyError>;

/// A callable value. Errors returned by the function play the role of thrown
/// exceptions.
#[derive(Clone)]
pub struct Function(Rc<NativeFn>);

impl Function {
  pub fn new(
    f: impl Fn(&[Value]) -> Result<Value, AnyError> + 'static,
  ) -> Self {
    Self(Rc::new(f))
  }

  pub fn call(&self, args: &[Value]) -> Result<Value, AnyError> {
    (self.0)(args)
  }

  pub fn ptr_eq(&self, other: &Function) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for Function {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str("[Function]")
  }
}

/// An opaque host object. It can be handed around inside privileged code but
/// never crosses a pipe.
#[derive(Clone)]
pub struct HostObject(Rc<dyn Any>);

impl HostObject {
  pub fn new<T: 'static>(value: T) -> Self {
    Self(Rc::new(value))
  }

  pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
    self.0.downcast_ref()
  }

  pub fn ptr_eq(&self, other: &HostObject) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for HostObject {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str("[HostObject]")
  }
}
