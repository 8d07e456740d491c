//! Service and method descriptors.
//!
//! A service is described by its [`ServiceDescriptor`]: a name plus a set of
//! [`MethodDescriptor`]s. Each method carries a handler closure registered at
//! construction time that owns the whole payload round trip: parse the
//! request message, invoke the implementation, serialize the response
//! message. The dispatcher only ever sees opaque bytes.

use std::collections::HashMap;
use std::sync::Arc;

use lodestar_common::codec::WireCodec;
use lodestar_common::protocol::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A method handler: request payload bytes in, response payload bytes out.
pub type MethodHandler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// One callable method of a service.
pub struct MethodDescriptor {
    name: String,
    handler: MethodHandler,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the handler against a request payload.
    pub fn invoke(&self, payload: &[u8]) -> Result<Vec<u8>> {
        (self.handler)(payload)
    }
}

/// A named service and its methods. This is what gets registered with the
/// dispatcher and what the registry publishes the name of.
pub struct ServiceDescriptor {
    service_name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

/// Builder assembling a [`ServiceDescriptor`] method by method.
///
/// # Example
///
/// ```
/// use lodestar_common::WireCodec;
/// use lodestar_server::ServiceBuilder;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct AddRequest { a: i32, b: i32 }
/// #[derive(Serialize, Deserialize)]
/// struct AddResponse { result: i32 }
///
/// let service = ServiceBuilder::new("Calculator")
///     .typed_method("Add", WireCodec::Binary, |req: AddRequest| {
///         Ok(AddResponse { result: req.a + req.b })
///     })
///     .build();
/// assert_eq!(service.method_names(), vec!["Add"]);
/// ```
pub struct ServiceBuilder {
    service_name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        ServiceBuilder {
            service_name: service_name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a raw method working directly on payload bytes.
    /// Registering a name twice replaces the earlier handler.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        let name = name.into();
        self.methods.insert(
            name.clone(),
            MethodDescriptor {
                name,
                handler: Box::new(handler),
            },
        );
        self
    }

    /// Registers a typed method. The wrapper parses the request message with
    /// `codec`, invokes `handler`, and serializes its response, mapping
    /// parse failures to `ParseFailed` and serialize failures to
    /// `SerializeFailed` so the dispatcher reports the failing step.
    pub fn typed_method<Req, Resp, F>(
        self,
        name: impl Into<String>,
        codec: WireCodec,
        handler: F,
    ) -> Self
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req) -> Result<Resp> + Send + Sync + 'static,
    {
        let name = name.into();
        let method_name = name.clone();
        self.method(name, move |payload: &[u8]| {
            let request: Req = codec.decode_payload(payload).map_err(|e| {
                RpcError::ParseFailed(format!("method '{}' request: {}", method_name, e))
            })?;
            let response = handler(request)?;
            codec.encode_payload(&response).map_err(|e| {
                RpcError::SerializeFailed(format!("method '{}' response: {}", method_name, e))
            })
        })
    }

    pub fn build(self) -> ServiceDescriptor {
        ServiceDescriptor {
            service_name: self.service_name,
            methods: self.methods,
        }
    }

    /// Convenience for the common registration shape.
    pub fn build_shared(self) -> Arc<ServiceDescriptor> {
        Arc::new(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Pair {
        a: i32,
        b: i32,
    }

    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Sum {
        result: i32,
    }

    #[test]
    fn test_builder_collects_methods() {
        let service = ServiceBuilder::new("Calc")
            .method("Raw", |payload| Ok(payload.to_vec()))
            .typed_method("Add", WireCodec::Binary, |req: Pair| {
                Ok(Sum { result: req.a + req.b })
            })
            .build();

        assert_eq!(service.service_name(), "Calc");
        assert_eq!(service.method_count(), 2);
        assert_eq!(service.method_names(), vec!["Add", "Raw"]);
        assert!(service.find_method("Add").is_some());
        assert!(service.find_method("Mul").is_none());
    }

    #[test]
    fn test_raw_method_invocation() {
        let service = ServiceBuilder::new("Echo")
            .method("Ping", |payload| Ok(payload.to_vec()))
            .build();
        let method = service.find_method("Ping").unwrap();
        assert_eq!(method.invoke(b"hello").unwrap(), b"hello");
        assert_eq!(method.name(), "Ping");
    }

    #[test]
    fn test_typed_method_round_trip() {
        let codec = WireCodec::Binary;
        let service = ServiceBuilder::new("Calc")
            .typed_method("Add", codec, |req: Pair| Ok(Sum { result: req.a + req.b }))
            .build();

        let payload = codec.encode_payload(&Pair { a: 10, b: 20 }).unwrap();
        let out = service.find_method("Add").unwrap().invoke(&payload).unwrap();
        let sum: Sum = codec.decode_payload(&out).unwrap();
        assert_eq!(sum, Sum { result: 30 });
    }

    #[test]
    fn test_typed_method_maps_parse_failure() {
        let service = ServiceBuilder::new("Calc")
            .typed_method("Add", WireCodec::Json, |req: Pair| {
                Ok(Sum { result: req.a + req.b })
            })
            .build();

        let err = service
            .find_method("Add")
            .unwrap()
            .invoke(b"not json")
            .unwrap_err();
        assert!(matches!(err, RpcError::ParseFailed(_)));
        assert!(err.to_string().contains("Add"));
    }

    #[test]
    fn test_handler_errors_pass_through() {
        let service = ServiceBuilder::new("Calc")
            .typed_method("Div", WireCodec::Binary, |req: Pair| {
                if req.b == 0 {
                    Err(RpcError::Handler("division by zero".into()))
                } else {
                    Ok(Sum { result: req.a / req.b })
                }
            })
            .build();

        let payload = WireCodec::Binary.encode_payload(&Pair { a: 1, b: 0 }).unwrap();
        let err = service.find_method("Div").unwrap().invoke(&payload).unwrap_err();
        assert!(matches!(err, RpcError::Handler(_)));
    }

    #[test]
    fn test_duplicate_method_name_replaces() {
        let service = ServiceBuilder::new("Echo")
            .method("Ping", |_| Ok(b"first".to_vec()))
            .method("Ping", |_| Ok(b"second".to_vec()))
            .build();
        assert_eq!(service.method_count(), 1);
        assert_eq!(
            service.find_method("Ping").unwrap().invoke(b"").unwrap(),
            b"second"
        );
    }
}
