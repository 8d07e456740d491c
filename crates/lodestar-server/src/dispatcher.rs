//! Request dispatch: service lookup by name, method invocation, and the
//! conversion of every failure into a failure response.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use lodestar_common::protocol::{ErrorCode, Result, RpcError, RpcRequest, RpcResponse};
use tracing::{debug, warn};

use crate::service::ServiceDescriptor;

/// Holds the registered services and routes requests to them.
///
/// Lookups take a read lock so distinct calls proceed concurrently; the
/// dispatcher makes no assumption about a handler's own thread-safety beyond
/// the `Send + Sync` bound the handler type carries.
pub struct ServiceDispatcher {
    services: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        ServiceDispatcher {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a service under its descriptor name. Duplicate names are
    /// rejected until the earlier registration is removed.
    pub fn register(&self, service: Arc<ServiceDescriptor>) -> Result<()> {
        let name = service.service_name().to_string();
        if name.is_empty() {
            return Err(RpcError::Protocol("service has an empty name".into()));
        }
        let mut services = self.services.write().unwrap();
        if services.contains_key(&name) {
            return Err(RpcError::Protocol(format!(
                "service '{}' is already registered",
                name
            )));
        }
        debug!(service = %name, methods = service.method_count(), "registered service");
        services.insert(name, service);
        Ok(())
    }

    pub fn unregister(&self, service_name: &str) -> Result<()> {
        let mut services = self.services.write().unwrap();
        services
            .remove(service_name)
            .map(|_| ())
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn service_count(&self) -> usize {
        self.services.read().unwrap().len()
    }

    /// Dispatches one request. Never fails outward: every error (bad names,
    /// unknown service or method, payload failures, handler errors, even a
    /// panicking handler) becomes a failure response naming the failing
    /// step, and the connection stays open.
    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        if !request.is_valid() {
            return RpcResponse::failure(
                request.request_id,
                ErrorCode::Protocol,
                "request envelope has empty service or method name",
            );
        }

        let service = {
            let services = self.services.read().unwrap();
            services.get(&request.service).cloned()
        };
        let service = match service {
            Some(service) => service,
            None => {
                return RpcResponse::failure(
                    request.request_id,
                    ErrorCode::ServiceNotFound,
                    format!("service '{}' not found", request.service),
                );
            }
        };

        let method = match service.find_method(&request.method) {
            Some(method) => method,
            None => {
                return RpcResponse::failure(
                    request.request_id,
                    ErrorCode::MethodNotFound,
                    format!(
                        "method '{}' not found on service '{}'",
                        request.method, request.service
                    ),
                );
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| method.invoke(&request.payload)));
        match outcome {
            Ok(Ok(payload)) => RpcResponse::success(request.request_id, payload),
            Ok(Err(e)) => {
                debug!(
                    service = %request.service,
                    method = %request.method,
                    error = %e,
                    "dispatch produced a failure response"
                );
                RpcResponse::failure(request.request_id, e.code(), e.to_string())
            }
            Err(_) => {
                warn!(
                    service = %request.service,
                    method = %request.method,
                    "handler panicked"
                );
                RpcResponse::failure(
                    request.request_id,
                    ErrorCode::Handler,
                    format!(
                        "handler for '{}.{}' panicked",
                        request.service, request.method
                    ),
                )
            }
        }
    }
}

impl Default for ServiceDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;

    fn echo_service(name: &str) -> Arc<ServiceDescriptor> {
        ServiceBuilder::new(name)
            .method("Ping", |payload| Ok(payload.to_vec()))
            .build_shared()
    }

    #[test]
    fn test_register_and_dispatch() {
        let dispatcher = ServiceDispatcher::new();
        dispatcher.register(echo_service("Echo")).unwrap();

        let request = RpcRequest::new("Echo", "Ping", b"hi".to_vec());
        let response = dispatcher.dispatch(&request);
        assert!(response.success);
        assert_eq!(response.request_id, request.request_id);
        assert_eq!(response.payload, b"hi");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let dispatcher = ServiceDispatcher::new();
        dispatcher.register(echo_service("Echo")).unwrap();
        assert!(dispatcher.register(echo_service("Echo")).is_err());

        dispatcher.unregister("Echo").unwrap();
        dispatcher.register(echo_service("Echo")).unwrap();
    }

    #[test]
    fn test_unregister_unknown_service() {
        let dispatcher = ServiceDispatcher::new();
        assert!(matches!(
            dispatcher.unregister("Ghost").unwrap_err(),
            RpcError::ServiceNotFound(_)
        ));
    }

    #[test]
    fn test_unknown_service_response() {
        let dispatcher = ServiceDispatcher::new();
        let request = RpcRequest::new("Ghost", "Ping", vec![]);
        let response = dispatcher.dispatch(&request);
        assert!(!response.success);
        assert_eq!(response.error_code, ErrorCode::ServiceNotFound as i32);
        assert!(response.error.contains("Ghost"));
    }

    #[test]
    fn test_unknown_method_response_names_the_method() {
        let dispatcher = ServiceDispatcher::new();
        dispatcher.register(echo_service("Echo")).unwrap();
        let request = RpcRequest::new("Echo", "Mul", vec![]);
        let response = dispatcher.dispatch(&request);
        assert!(!response.success);
        assert_eq!(response.error_code, ErrorCode::MethodNotFound as i32);
        assert!(response.error.contains("Mul"));
    }

    #[test]
    fn test_invalid_request_response() {
        let dispatcher = ServiceDispatcher::new();
        let request = RpcRequest::new("", "", vec![]);
        let response = dispatcher.dispatch(&request);
        assert!(!response.success);
        assert_eq!(response.error_code, ErrorCode::Protocol as i32);
    }

    #[test]
    fn test_handler_error_becomes_failure_response() {
        let dispatcher = ServiceDispatcher::new();
        let service = ServiceBuilder::new("Flaky")
            .method("Fail", |_| Err(RpcError::Handler("it broke".into())))
            .build_shared();
        dispatcher.register(service).unwrap();

        let response = dispatcher.dispatch(&RpcRequest::new("Flaky", "Fail", vec![]));
        assert!(!response.success);
        assert_eq!(response.error_code, ErrorCode::Handler as i32);
        assert!(response.error.contains("it broke"));
    }

    #[test]
    fn test_panicking_handler_becomes_failure_response() {
        let dispatcher = ServiceDispatcher::new();
        let service = ServiceBuilder::new("Flaky")
            .method("Boom", |_| panic!("kaboom"))
            .build_shared();
        dispatcher.register(service).unwrap();

        let response = dispatcher.dispatch(&RpcRequest::new("Flaky", "Boom", vec![]));
        assert!(!response.success);
        assert_eq!(response.error_code, ErrorCode::Handler as i32);

        // The dispatcher survives and keeps serving.
        dispatcher.register(echo_service("Echo")).unwrap();
        assert!(dispatcher.dispatch(&RpcRequest::new("Echo", "Ping", vec![])).success);
    }

    #[test]
    fn test_service_names_listing() {
        let dispatcher = ServiceDispatcher::new();
        dispatcher.register(echo_service("B")).unwrap();
        dispatcher.register(echo_service("A")).unwrap();
        assert_eq!(dispatcher.service_names(), vec!["A", "B"]);
        assert_eq!(dispatcher.service_count(), 2);
    }

    #[test]
    fn test_concurrent_dispatch() {
        use std::thread;

        let dispatcher = Arc::new(ServiceDispatcher::new());
        dispatcher.register(echo_service("Echo")).unwrap();

        let mut handles = vec![];
        for _ in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(thread::spawn(move || {
                for i in 0..500u32 {
                    let payload = i.to_be_bytes().to_vec();
                    let response =
                        dispatcher.dispatch(&RpcRequest::new("Echo", "Ping", payload.clone()));
                    assert!(response.success);
                    assert_eq!(response.payload, payload);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
