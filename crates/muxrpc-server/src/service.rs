//! Service registration.
//!
//! A service is a named receiver plus a table of callable methods. Methods
//! are registered through typed adapters, which pin down the signature rule
//! at compile time: a method takes the receiver, one argument value, and a
//! mutable reply slot, and returns nothing but a possible error.
//!
//! For each incoming call the adapter materializes a fresh argument value
//! from the request body and a fresh default reply value (maps and vectors
//! start out empty), invokes the method, and serializes the reply back.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Invoke = Box<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

/// One registered method: the boxed adapter around the user's function and
/// a call counter.
pub struct Method {
    name: String,
    invoke: Invoke,
    num_calls: AtomicU64,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("num_calls", &self.num_calls)
            .finish()
    }
}

impl Method {
    /// Runs the method against one raw argument value. The counter is
    /// incremented before dispatch, so a method observed mid-flight has
    /// already been counted.
    pub(crate) fn call(&self, args: Value) -> std::result::Result<Value, String> {
        self.num_calls.fetch_add(1, Ordering::Relaxed);
        (self.invoke)(args)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times this method has been dispatched.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }
}

/// A named set of methods sharing one receiver, ready to be registered on a
/// [`Server`](crate::Server).
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl Service {
    /// Starts building a service around `receiver`. The name must be an
    /// exported identifier (leading ASCII uppercase); registration on a
    /// server enforces this.
    pub fn build<R>(name: impl Into<String>, receiver: R) -> ServiceBuilder<R>
    where
        R: Send + Sync + 'static,
    {
        ServiceBuilder {
            name: name.into(),
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    /// Method names in sorted order, for stable listings.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builder accumulating typed method adapters for one receiver.
pub struct ServiceBuilder<R> {
    name: String,
    receiver: Arc<R>,
    methods: HashMap<String, Arc<Method>>,
}

impl<R: Send + Sync + 'static> ServiceBuilder<R> {
    /// Registers a method under `name`.
    ///
    /// The argument type is materialized fresh from the request body for
    /// every call; the reply type starts from its `Default` value, so
    /// container replies are empty rather than null when the method runs.
    /// A method returning `Err` has its message carried back on the
    /// response header with an empty body.
    ///
    /// Names that are not exported identifiers are skipped with a warning,
    /// and a name registered twice keeps the first registration.
    pub fn method<A, B, E, F>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        B: Serialize + Default + Send + 'static,
        E: Display,
        F: Fn(&R, A, &mut B) -> std::result::Result<(), E> + Send + Sync + 'static,
    {
        if !is_exported(name) {
            tracing::warn!(
                "rpc service {}: method name {:?} is not exported, skipping",
                self.name,
                name
            );
            return self;
        }
        if self.methods.contains_key(name) {
            tracing::warn!(
                "rpc service {}: method {:?} already registered, keeping the first",
                self.name,
                name
            );
            return self;
        }

        let receiver = Arc::clone(&self.receiver);
        let invoke: Invoke = Box::new(move |raw: Value| {
            let args: A =
                serde_json::from_value(raw).map_err(|e| format!("cannot decode arguments: {e}"))?;
            let mut reply = B::default();
            f(&receiver, args, &mut reply).map_err(|e| e.to_string())?;
            serde_json::to_value(&reply).map_err(|e| format!("cannot encode reply: {e}"))
        });

        self.methods.insert(
            name.to_string(),
            Arc::new(Method {
                name: format!("{}.{}", self.name, name),
                invoke,
                num_calls: AtomicU64::new(0),
            }),
        );
        self
    }

    pub fn finish(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

/// Exported identifiers start with an ASCII uppercase letter.
pub(crate) fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Deserialize)]
    struct Args {
        a: i32,
        b: i32,
    }

    #[derive(Serialize, Default)]
    struct Reply {
        sum: i32,
    }

    struct Arith;

    impl Arith {
        fn add(&self, args: Args, reply: &mut Reply) -> Result<(), String> {
            reply.sum = args.a + args.b;
            Ok(())
        }

        fn fail(&self, _args: Args, _reply: &mut Reply) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    fn arith() -> Service {
        Service::build("Arith", Arith)
            .method("Add", Arith::add)
            .method("Fail", Arith::fail)
            .finish()
    }

    #[test]
    fn test_method_invocation() {
        let service = arith();
        let method = service.method("Add").unwrap();

        let reply = method.call(json!({"a": 3, "b": 4})).unwrap();
        assert_eq!(reply, json!({"sum": 7}));
    }

    #[test]
    fn test_call_counter_increments() {
        let service = arith();
        let method = service.method("Add").unwrap();
        assert_eq!(method.num_calls(), 0);

        for _ in 0..3 {
            method.call(json!({"a": 1, "b": 1})).unwrap();
        }
        assert_eq!(method.num_calls(), 3);
    }

    #[test]
    fn test_method_error_is_carried_as_text() {
        let service = arith();
        let err = service
            .method("Fail")
            .unwrap()
            .call(json!({"a": 0, "b": 0}))
            .unwrap_err();
        assert_eq!(err, "boom");
    }

    #[test]
    fn test_argument_decode_failure_is_reported() {
        let service = arith();
        let err = service
            .method("Add")
            .unwrap()
            .call(json!("not an object"))
            .unwrap_err();
        assert!(err.contains("cannot decode arguments"));
    }

    #[test]
    fn test_unexported_method_name_is_skipped() {
        let service = Service::build("Arith", Arith)
            .method("add", Arith::add)
            .finish();
        assert!(service.method("add").is_none());
    }

    #[test]
    fn test_duplicate_method_keeps_first() {
        let service = Service::build("Arith", Arith)
            .method("Add", Arith::add)
            .method("Add", Arith::fail)
            .finish();

        let reply = service
            .method("Add")
            .unwrap()
            .call(json!({"a": 2, "b": 5}))
            .unwrap();
        assert_eq!(reply, json!({"sum": 7}));
    }

    #[test]
    fn test_container_reply_starts_empty_not_null() {
        struct Dict;
        impl Dict {
            fn list(
                &self,
                _args: Args,
                reply: &mut HashMap<String, i32>,
            ) -> Result<(), String> {
                reply.insert("x".to_string(), 1);
                Ok(())
            }
        }

        let service = Service::build("Dict", Dict)
            .method("List", Dict::list)
            .finish();
        let reply = service
            .method("List")
            .unwrap()
            .call(json!({"a": 0, "b": 0}))
            .unwrap();
        assert_eq!(reply, json!({"x": 1}));
    }

    #[test]
    fn test_method_names_are_sorted() {
        let service = arith();
        assert_eq!(service.method_names(), vec!["Add", "Fail"]);
    }
}
