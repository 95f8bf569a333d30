//! Dispatch tables
//!
//! Each actor type describes its callable surface once, as a map from
//! target identifier (`increment()`, `add(by:)`) to a handler that decodes
//! positional arguments, runs the method against `&mut Self` and encodes
//! the result. Observable properties register a reader that produces the
//! snapshot sent when a stream is opened.
//!
//! ```ignore
//! MethodTable::new()
//!     .method("add(by:)", |counter: &mut Counter, args| {
//!         Box::pin(async move {
//!             let by: i64 = args.decode(0)?;
//!             counter.count.set(*counter.count + by);
//!             Reply::value(counter.count.get())
//!         })
//!     })
//!     .property("count", |counter: &Counter| *counter.count)
//! ```

use codec::{encode_value, Arguments, CodecError, ErrorDescriptor};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Successful outcome of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(Vec<u8>),
    Void,
}

impl Reply {
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Result<Reply, MethodError> {
        encode_value(value)
            .map(Reply::Value)
            .map_err(|e| MethodError::Encoding(e.to_string()))
    }

    /// `Ok(Reply::Void)`, typed for use as the tail of an async block
    pub fn void() -> Result<Reply, MethodError> {
        Ok(Reply::Void)
    }
}

/// Why a method did not produce a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodError {
    /// An argument was missing or malformed
    Decoding(String),
    /// The result could not be encoded
    Encoding(String),
    /// Business failure; `payload` is returned to the caller untouched
    Application { error_type: String, payload: Vec<u8> },
    /// The handler panicked
    Internal(String),
}

impl MethodError {
    /// Application failure carrying an encoded error value
    pub fn application<E: Serialize + ?Sized>(error_type: impl Into<String>, error: &E) -> Self {
        let error_type = error_type.into();
        match encode_value(error) {
            Ok(payload) => MethodError::Application { error_type, payload },
            Err(e) => MethodError::Encoding(format!("{}: {}", error_type, e)),
        }
    }

    pub fn into_descriptor(self) -> ErrorDescriptor {
        match self {
            MethodError::Decoding(message) => ErrorDescriptor::Decoding { message },
            MethodError::Encoding(message) => ErrorDescriptor::Encoding { message },
            MethodError::Application { error_type, payload } => {
                ErrorDescriptor::Application { error_type, payload }
            }
            MethodError::Internal(message) => ErrorDescriptor::Internal { message },
        }
    }
}

impl From<CodecError> for MethodError {
    fn from(err: CodecError) -> Self {
        if err.is_decoding() {
            MethodError::Decoding(err.to_string())
        } else {
            MethodError::Encoding(err.to_string())
        }
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodError::Decoding(message) => write!(f, "decoding: {}", message),
            MethodError::Encoding(message) => write!(f, "encoding: {}", message),
            MethodError::Application { error_type, .. } => write!(f, "application: {}", error_type),
            MethodError::Internal(message) => write!(f, "internal: {}", message),
        }
    }
}

pub type MethodFuture<'a> = BoxFuture<'a, Result<Reply, MethodError>>;

pub(crate) type Handler<A> = Arc<dyn for<'a> Fn(&'a mut A, Arguments) -> MethodFuture<'a> + Send + Sync>;

pub(crate) type PropertyReader<A> = Arc<dyn Fn(&A) -> Result<Value, MethodError> + Send + Sync>;

/// Target identifier → handler, plus observable property readers
pub struct MethodTable<A> {
    methods: HashMap<String, Handler<A>>,
    properties: HashMap<String, PropertyReader<A>>,
}

impl<A: Send + 'static> MethodTable<A> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Register an async method. The future may hold `&mut A` across
    /// awaits; the mailbox runs nothing else on the actor until it ends.
    pub fn method<F>(mut self, target: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut A, Arguments) -> MethodFuture<'a> + Send + Sync + 'static,
    {
        self.methods.insert(target.into(), Arc::new(handler));
        self
    }

    /// Register a method that completes without awaiting
    pub fn sync_method<F>(self, target: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut A, &Arguments) -> Result<Reply, MethodError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.method(target, move |actor: &mut A, args: Arguments| {
            let result = handler(actor, &args);
            Box::pin(async move { result })
        })
    }

    /// Register an observable property, read for subscription snapshots
    pub fn property<T, F>(mut self, name: impl Into<String>, reader: F) -> Self
    where
        T: Serialize,
        F: Fn(&A) -> T + Send + Sync + 'static,
    {
        let reader: PropertyReader<A> = Arc::new(move |actor: &A| {
            serde_json::to_value(reader(actor)).map_err(|e| MethodError::Encoding(e.to_string()))
        });
        self.properties.insert(name.into(), reader);
        self
    }

    pub(crate) fn handler(&self, target: &str) -> Option<Handler<A>> {
        self.methods.get(target).cloned()
    }

    pub(crate) fn reader(&self, name: &str) -> Option<PropertyReader<A>> {
        self.properties.get(name).cloned()
    }

    pub fn has_method(&self, target: &str) -> bool {
        self.methods.contains_key(target)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Method targets, sorted
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        targets.sort_unstable();
        targets
    }
}

impl<A: Send + 'static> Default for MethodTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for MethodTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods.len())
            .field("properties", &self.properties.len())
            .finish()
    }
}
