//! Handler registry and call payload types.
//!
//! Remote-callable functions are registered up front under a
//! `(file, method)` route. Inbound frames are dispatched by looking the
//! route up; an unknown route is a [`HandlerError::NoRoute`], never a panic.
//!
//! ```rust,ignore
//! let handlers = Handlers::new()
//!     .route_typed("main", "add", |(a, b): (i64, i64)| async move { Ok::<_, HandlerError>(a + b) })
//!     .route("files", "put", |req: Request| async move {
//!         let name: String = req.arg(0)?;
//!         let size = req.binary.as_ref().map_or(0, Vec::len);
//!         Reply::json(&format!("{name}:{size}"))
//!     });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{HandlerError, RpcError};
use crate::identity::PeerIdentity;

/// Build [`Args`] from JSON-serializable expressions.
///
/// ```rust,ignore
/// node.rpc("area1").call("main", "add", args![1, 2]);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($arg:expr),+ $(,)?) => {
        $crate::Args::from(vec![$($crate::__private::json!($arg)),+])
    };
}

/// Arguments of an outgoing call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// JSON argument array.
    pub values: Vec<Value>,
    /// Raw bytes sent after the JSON body.
    pub binary: Option<Vec<u8>>,
}

impl Args {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one serializable argument.
    pub fn push<T: Serialize>(mut self, value: &T) -> Result<Self, RpcError> {
        self.values.push(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Attach trailing binary data.
    pub fn with_binary(mut self, binary: Vec<u8>) -> Self {
        self.binary = Some(binary);
        self
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self {
            values,
            binary: None,
        }
    }
}

/// Result of a remote call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// JSON result value.
    pub value: Value,
    /// Raw bytes sent after the JSON body.
    pub binary: Option<Vec<u8>>,
}

impl Reply {
    /// Reply carrying a JSON value.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            binary: None,
        }
    }

    /// Reply carrying any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        serde_json::to_value(value)
            .map(Self::new)
            .map_err(|e| HandlerError::Failed(e.to_string()))
    }

    /// Attach trailing binary data.
    pub fn with_binary(mut self, binary: Vec<u8>) -> Self {
        self.binary = Some(binary);
        self
    }

    /// Deserialize the JSON value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        serde_json::from_value(self.value.clone()).map_err(|e| RpcError::Decode {
            message: e.to_string(),
        })
    }
}

/// An inbound call as seen by a handler.
#[derive(Debug, Clone)]
pub struct Request {
    /// Identity of the calling peer (the local identity for self-calls).
    pub caller: Rc<PeerIdentity>,
    /// JSON argument array.
    pub args: Vec<Value>,
    /// Trailing binary data, if any was sent.
    pub binary: Option<Vec<u8>>,
}

impl Request {
    /// Deserialize argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self.args.get(index).cloned().ok_or_else(|| {
            HandlerError::BadArguments(format!("missing argument {index}"))
        })?;
        serde_json::from_value(value)
            .map_err(|e| HandlerError::BadArguments(format!("argument {index}: {e}")))
    }
}

/// Future returned by a boxed handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, HandlerError>>>>;

type BoxedHandler = Rc<dyn Fn(Request) -> HandlerFuture>;

/// Route table of remote-callable functions.
#[derive(Clone, Default)]
pub struct Handlers {
    routes: HashMap<(String, String), BoxedHandler>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<_> = self
            .routes
            .keys()
            .map(|(file, method)| format!("{file}.{method}"))
            .collect();
        routes.sort();
        f.debug_struct("Handlers").field("routes", &routes).finish()
    }
}

impl Handlers {
    /// Empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler working on the raw [`Request`].
    pub fn route<F, Fut>(mut self, file: &str, method: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + 'static,
        Fut: Future<Output = Result<Reply, HandlerError>> + 'static,
    {
        let boxed: BoxedHandler =
            Rc::new(move |request: Request| -> HandlerFuture { Box::pin(handler(request)) });
        self.routes
            .insert((file.to_string(), method.to_string()), boxed);
        self
    }

    /// Register a handler taking its arguments as a deserialized tuple and
    /// returning any serializable value.
    pub fn route_typed<A, R, F, Fut>(self, file: &str, method: &str, handler: F) -> Self
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + 'static,
    {
        let handler = Rc::new(handler);
        self.route(file, method, move |request: Request| {
            let handler = handler.clone();
            async move {
                let args: A = serde_json::from_value(Value::Array(request.args))
                    .map_err(|e| HandlerError::BadArguments(e.to_string()))?;
                let result = handler(args).await?;
                Reply::json(&result)
            }
        })
    }

    /// Whether `file.method` is registered.
    pub fn contains(&self, file: &str, method: &str) -> bool {
        self.routes
            .contains_key(&(file.to_string(), method.to_string()))
    }

    pub(crate) fn invoke(&self, file: &str, method: &str, request: Request) -> HandlerFuture {
        match self.routes.get(&(file.to_string(), method.to_string())) {
            Some(handler) => handler(request),
            None => {
                let err = HandlerError::NoRoute {
                    route: file.to_string(),
                    method: method.to_string(),
                };
                Box::pin(async move { Err(err) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(args: Vec<Value>) -> Request {
        Request {
            caller: Rc::new(PeerIdentity::new("caller", "test")),
            args,
            binary: None,
        }
    }

    #[tokio::test]
    async fn test_typed_route() {
        let handlers = Handlers::new().route_typed("main", "add", |(a, b): (i64, i64)| async move {
            Ok::<_, HandlerError>(a + b)
        });

        let reply = handlers
            .invoke("main", "add", request(vec![json!(1), json!(2)]))
            .await
            .expect("reply");
        assert_eq!(reply.value, json!(3));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let handlers = Handlers::new().route_typed("main", "add", |(a, b): (i64, i64)| async move {
            Ok::<_, HandlerError>(a + b)
        });

        let err = handlers
            .invoke("main", "add", request(vec![json!("one")]))
            .await
            .expect_err("bad args");
        assert!(matches!(err, HandlerError::BadArguments(_)));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let handlers = Handlers::new();
        let err = handlers
            .invoke("main", "missing", request(vec![]))
            .await
            .expect_err("no route");
        assert_eq!(
            err,
            HandlerError::NoRoute {
                route: "main".into(),
                method: "missing".into()
            }
        );
    }

    #[tokio::test]
    async fn test_raw_route_sees_binary_and_caller() {
        let handlers = Handlers::new().route("files", "put", |req: Request| async move {
            let name: String = req.arg(0)?;
            let size = req.binary.as_ref().map_or(0, Vec::len);
            Ok(Reply::new(json!([name, size, req.caller.id])).with_binary(vec![1]))
        });
        assert!(handlers.contains("files", "put"));

        let mut req = request(vec![json!("a.bin")]);
        req.binary = Some(vec![0; 16]);
        let reply = handlers.invoke("files", "put", req).await.expect("reply");
        assert_eq!(reply.value, json!(["a.bin", 16, "caller"]));
        assert_eq!(reply.binary, Some(vec![1]));
    }

    #[test]
    fn test_args_macro() {
        let args = crate::args![1, "two", [3]];
        assert_eq!(args.values, vec![json!(1), json!("two"), json!([3])]);
        assert!(crate::args![].values.is_empty());
    }

    #[test]
    fn test_reply_decode() {
        let reply = Reply::new(json!([1, 2]));
        let decoded: Vec<u8> = reply.decode().expect("decode");
        assert_eq!(decoded, vec![1, 2]);
        assert!(matches!(
            reply.decode::<String>(),
            Err(RpcError::Decode { .. })
        ));
    }
}
