//! The ephemeral-node registry backend.
//!
//! [`NodeStore`] is a small in-process coordination kernel: a tree of named
//! nodes where a node is either persistent or *ephemeral*, owned by a
//! session and deleted the moment that session closes or expires. Parents can
//! be watched for membership changes. Handles that connect to the same
//! registry address share one store, which is what lets servers and clients
//! in one process (and one test) see each other.
//!
//! [`EphemeralRegistry`] implements the [`Registry`] contract on top:
//!
//! ```text
//! /rpc
//! /rpc/services
//! /rpc/services/<service>              persistent, created lazily
//! /rpc/services/<service>/<id>-<seq>   ephemeral, value = wire-form instance
//! ```
//!
//! Liveness is carried by the session: `heartbeat` touches the session (and
//! rewrites the node's `last_heartbeat`), and a sweeper expires sessions that
//! stay silent past their timeout, auto-deregistering crashed servers.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use lodestar_common::protocol::{Result, RpcError};
use tracing::{debug, info, warn};

use crate::instance::ServiceInstance;
use crate::registry::{service_path, InstanceCallback, Registry, ROOT_PATH, SERVICES_PATH};

/// How often the store scans for expired sessions.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

type SessionId = u64;
type WatchId = u64;

/// Invoked (with the watched parent path) whenever that parent's children
/// change. Runs on the mutating thread and must only hand the event off;
/// in particular it must not call back into the store.
type WatchFn = Box<dyn Fn(&str) + Send>;

struct Node {
    value: Vec<u8>,
    /// `Some(session)` marks an ephemeral node.
    owner: Option<SessionId>,
}

struct Session {
    last_seen: Instant,
    timeout: Duration,
}

#[derive(Default)]
struct StoreInner {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, Session>,
    watches: HashMap<String, Vec<(WatchId, WatchFn)>>,
    next_session_id: SessionId,
    next_watch_id: WatchId,
    next_sequence: u64,
}

/// The in-process ephemeral-node store backing [`EphemeralRegistry`].
pub struct NodeStore {
    inner: Mutex<StoreInner>,
}

static STORES: OnceLock<Mutex<HashMap<String, Arc<NodeStore>>>> = OnceLock::new();

impl NodeStore {
    /// Returns the shared store for a registry address, creating it (and its
    /// sweeper thread) on first use. The store lives for the process.
    pub fn for_address(address: &str) -> Arc<NodeStore> {
        let mut stores = STORES
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap();
        stores
            .entry(address.to_string())
            .or_insert_with(|| {
                let store = Arc::new(NodeStore {
                    inner: Mutex::new(StoreInner::default()),
                });
                let sweeper = Arc::clone(&store);
                thread::Builder::new()
                    .name("registry-sweeper".into())
                    .spawn(move || loop {
                        thread::sleep(SWEEP_INTERVAL);
                        sweeper.expire_sessions();
                    })
                    .expect("failed to spawn registry sweeper");
                store
            })
            .clone()
    }

    fn create_session(&self, timeout: Duration) -> SessionId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_session_id += 1;
        let id = inner.next_session_id;
        inner.sessions.insert(
            id,
            Session {
                last_seen: Instant::now(),
                timeout,
            },
        );
        id
    }

    fn close_session(&self, session: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.remove(&session).is_some() {
            Self::drop_session_nodes(&mut inner, session);
        }
    }

    fn touch_session(&self, session: SessionId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(&session) {
            Some(state) => {
                state.last_seen = Instant::now();
                Ok(())
            }
            None => Err(RpcError::RegistryUnavailable(
                "session expired or closed".into(),
            )),
        }
    }

    fn session_alive(&self, session: SessionId) -> bool {
        self.inner.lock().unwrap().sessions.contains_key(&session)
    }

    fn expire_sessions(&self) {
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<SessionId> = inner
            .sessions
            .iter()
            .filter(|(_, s)| s.last_seen.elapsed() > s.timeout)
            .map(|(id, _)| *id)
            .collect();
        for session in expired {
            warn!(session, "registry session expired, dropping its nodes");
            inner.sessions.remove(&session);
            Self::drop_session_nodes(&mut inner, session);
        }
    }

    /// Deletes every ephemeral node owned by `session` and notifies the
    /// affected parents. Caller holds the lock.
    fn drop_session_nodes(inner: &mut StoreInner, session: SessionId) {
        let doomed: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        let mut parents: Vec<String> = doomed
            .iter()
            .filter_map(|p| p.rsplit_once('/').map(|(parent, _)| parent.to_string()))
            .collect();
        parents.sort();
        parents.dedup();
        for path in &doomed {
            inner.nodes.remove(path);
        }
        for parent in &parents {
            Self::notify(inner, parent);
        }
    }

    /// Creates a persistent node if absent.
    fn ensure_persistent(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(path) {
            inner.nodes.insert(
                path.to_string(),
                Node {
                    value: Vec::new(),
                    owner: None,
                },
            );
        }
    }

    /// Creates an ephemeral node at `prefix` + a process-wide sequence
    /// number, returning the actual path.
    fn create_ephemeral_sequential(
        &self,
        prefix: &str,
        value: Vec<u8>,
        session: SessionId,
    ) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(&session) {
            return Err(RpcError::RegistryUnavailable(
                "session expired or closed".into(),
            ));
        }
        inner.next_sequence += 1;
        let path = format!("{}{:010}", prefix, inner.next_sequence);
        inner.nodes.insert(
            path.clone(),
            Node {
                value,
                owner: Some(session),
            },
        );
        if let Some((parent, _)) = path.rsplit_once('/') {
            let parent = parent.to_string();
            Self::notify(&mut inner, &parent);
        }
        Ok(path)
    }

    fn set_data(&self, path: &str, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.nodes.get_mut(path) {
            Some(node) => {
                node.value = value;
                Ok(())
            }
            None => Err(RpcError::RegistryUnavailable(format!(
                "node {} does not exist",
                path
            ))),
        }
    }

    fn get_data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .get(path)
            .map(|n| n.value.clone())
    }

    fn delete(&self, path: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let existed = inner.nodes.remove(path).is_some();
        if existed {
            if let Some((parent, _)) = path.rsplit_once('/') {
                let parent = parent.to_string();
                Self::notify(&mut inner, &parent);
            }
        }
        existed
    }

    /// Direct children of `parent`, in path order, with their values.
    fn children(&self, parent: &str) -> Vec<(String, Vec<u8>)> {
        let prefix = format!("{}/", parent);
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, node)| (path.clone(), node.value.clone()))
            .collect()
    }

    /// Direct child names of `parent`.
    fn child_names(&self, parent: &str) -> Vec<String> {
        let prefix = format!("{}/", parent);
        self.children(parent)
            .into_iter()
            .map(|(path, _)| path[prefix.len()..].to_string())
            .collect()
    }

    fn add_watch(&self, parent: &str, watch: WatchFn) -> WatchId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_watch_id += 1;
        let id = inner.next_watch_id;
        inner
            .watches
            .entry(parent.to_string())
            .or_default()
            .push((id, watch));
        id
    }

    fn remove_watch(&self, parent: &str, id: WatchId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(watches) = inner.watches.get_mut(parent) {
            watches.retain(|(watch_id, _)| *watch_id != id);
        }
    }

    fn notify(inner: &mut StoreInner, parent: &str) {
        if let Some(watches) = inner.watches.get(parent) {
            for (_, watch) in watches {
                watch(parent);
            }
        }
    }
}

enum WatchEvent {
    Changed(String),
    Shutdown,
}

/// Registry backed by the ephemeral-node store.
///
/// Each handle owns one session: the instances it registers disappear when
/// the handle disconnects, drops, or stops heartbeating past the session
/// timeout. Subscription callbacks are delivered on the handle's watcher
/// thread, serialized per service.
pub struct EphemeralRegistry {
    store: Arc<NodeStore>,
    session: SessionId,
    connected: Arc<(Mutex<bool>, Condvar)>,
    callbacks: Arc<Mutex<HashMap<String, InstanceCallback>>>,
    watch_ids: Mutex<HashMap<String, WatchId>>,
    /// (service, instance id) to the node path created by this handle.
    owned: Mutex<HashMap<(String, String), String>>,
    events_tx: Sender<WatchEvent>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl EphemeralRegistry {
    /// Connects to the store at `address` and starts this handle's watcher
    /// thread. In-process stores connect immediately.
    pub fn connect(address: &str, session_timeout_ms: u64) -> Result<Arc<Self>> {
        let store = NodeStore::for_address(address);
        let session = store.create_session(Duration::from_millis(session_timeout_ms));

        let (events_tx, events_rx) = mpsc::channel::<WatchEvent>();
        let callbacks: Arc<Mutex<HashMap<String, InstanceCallback>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let registry = Arc::new(EphemeralRegistry {
            store: Arc::clone(&store),
            session,
            connected: Arc::new((Mutex::new(true), Condvar::new())),
            callbacks: Arc::clone(&callbacks),
            watch_ids: Mutex::new(HashMap::new()),
            owned: Mutex::new(HashMap::new()),
            events_tx,
            watcher: Mutex::new(None),
        });

        let watcher_store = store;
        let watcher = thread::Builder::new()
            .name("registry-watcher".into())
            .spawn(move || {
                while let Ok(event) = events_rx.recv() {
                    match event {
                        WatchEvent::Changed(service) => {
                            let snapshot = discover_from(&watcher_store, &service);
                            if let Some(callback) = callbacks.lock().unwrap().get(&service) {
                                callback(&service, &snapshot);
                            }
                        }
                        WatchEvent::Shutdown => break,
                    }
                }
            })
            .map_err(|e| RpcError::RegistryUnavailable(format!("spawn watcher: {}", e)))?;
        *registry.watcher.lock().unwrap() = Some(watcher);

        info!(address, session, "connected to registry");
        Ok(registry)
    }

    /// Ends this handle's session: its ephemeral nodes are deleted and
    /// watches of other handles fire. Further operations fail with
    /// `RegistryUnavailable`. Used on server shutdown, and by tests to
    /// simulate a crash.
    pub fn disconnect(&self) {
        self.store.close_session(self.session);
        let (flag, condvar) = &*self.connected;
        *flag.lock().unwrap() = false;
        condvar.notify_all();
    }

    fn ensure_connected(&self) -> Result<()> {
        let (flag, condvar) = &*self.connected;
        let mut connected = flag.lock().unwrap();
        if *connected && !self.store.session_alive(self.session) {
            // The sweeper expired us; surface it on the next operation.
            *connected = false;
            condvar.notify_all();
        }
        if *connected {
            Ok(())
        } else {
            Err(RpcError::RegistryUnavailable(
                "registry session is not connected".into(),
            ))
        }
    }

    fn instance_node_prefix(service: &str, instance_id: &str) -> String {
        format!("{}/{}-", service_path(service), instance_id)
    }
}

/// Reads and parses the current instances of `service`, deduplicating by
/// canonical id (the highest sequence wins, which tolerates re-registration
/// after a reconnect).
fn discover_from(store: &NodeStore, service: &str) -> Vec<ServiceInstance> {
    let children = store.children(&service_path(service));
    let mut instances: Vec<ServiceInstance> = Vec::with_capacity(children.len());
    for (path, value) in children {
        match ServiceInstance::from_wire(&value) {
            Ok(instance) => {
                // Children come in path order, so a later node with the same
                // id supersedes an earlier one.
                instances.retain(|existing| existing.id() != instance.id());
                instances.push(instance);
            }
            Err(e) => warn!(%path, error = %e, "skipping unparsable instance node"),
        }
    }
    instances
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Registry for EphemeralRegistry {
    fn register(&self, instance: &ServiceInstance) -> Result<()> {
        self.ensure_connected()?;
        instance.validate()?;
        self.store.touch_session(self.session)?;

        self.store.ensure_persistent(ROOT_PATH);
        self.store.ensure_persistent(SERVICES_PATH);
        self.store
            .ensure_persistent(&service_path(&instance.service_name));

        let key = (instance.service_name.clone(), instance.id());
        // Re-registration replaces this handle's previous node for the id.
        if let Some(old) = self.owned.lock().unwrap().remove(&key) {
            self.store.delete(&old);
        }

        let mut published = instance.clone();
        published.last_heartbeat = now_millis();
        let prefix = Self::instance_node_prefix(&instance.service_name, &instance.id());
        let path =
            self.store
                .create_ephemeral_sequential(&prefix, published.to_wire(), self.session)?;
        self.owned.lock().unwrap().insert(key, path.clone());

        info!(
            service = %instance.service_name,
            instance = %instance.id(),
            %path,
            "registered service instance"
        );
        Ok(())
    }

    fn unregister(&self, service: &str, instance_id: &str) -> Result<()> {
        self.ensure_connected()?;

        // The node carries a sequence suffix, so match on the canonical id
        // embedded in each child's value.
        let mut removed = false;
        for (path, value) in self.store.children(&service_path(service)) {
            if let Ok(instance) = ServiceInstance::from_wire(&value) {
                if instance.id() == instance_id {
                    removed |= self.store.delete(&path);
                }
            }
        }
        self.owned
            .lock()
            .unwrap()
            .remove(&(service.to_string(), instance_id.to_string()));

        if removed {
            info!(service, instance = instance_id, "unregistered service instance");
        } else {
            debug!(service, instance = instance_id, "unregister found no matching node");
        }
        Ok(())
    }

    fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>> {
        self.ensure_connected()?;
        Ok(discover_from(&self.store, service))
    }

    fn subscribe(&self, service: &str, callback: InstanceCallback) -> Result<()> {
        self.ensure_connected()?;
        self.store.ensure_persistent(ROOT_PATH);
        self.store.ensure_persistent(SERVICES_PATH);
        let path = service_path(service);
        self.store.ensure_persistent(&path);

        // Replace any previous subscription for this service.
        self.unsubscribe(service)?;
        self.callbacks
            .lock()
            .unwrap()
            .insert(service.to_string(), callback);

        let tx = self.events_tx.clone();
        let service_name = service.to_string();
        let watch_id = self.store.add_watch(
            &path,
            Box::new(move |_parent| {
                // Hand off to the watcher thread; never do work here.
                let _ = tx.send(WatchEvent::Changed(service_name.clone()));
            }),
        );
        self.watch_ids
            .lock()
            .unwrap()
            .insert(service.to_string(), watch_id);
        Ok(())
    }

    fn unsubscribe(&self, service: &str) -> Result<()> {
        self.callbacks.lock().unwrap().remove(service);
        if let Some(watch_id) = self.watch_ids.lock().unwrap().remove(service) {
            self.store.remove_watch(&service_path(service), watch_id);
        }
        Ok(())
    }

    fn heartbeat(&self, service: &str, instance_id: &str) -> Result<()> {
        self.ensure_connected()?;
        self.store.touch_session(self.session).map_err(|e| {
            let (flag, condvar) = &*self.connected;
            *flag.lock().unwrap() = false;
            condvar.notify_all();
            e
        })?;

        // Session liveness is what keeps the node alive; refreshing the
        // stored timestamp is bookkeeping for observers.
        let key = (service.to_string(), instance_id.to_string());
        let path = self.owned.lock().unwrap().get(&key).cloned();
        if let Some(path) = path {
            if let Some(value) = self.store.get_data(&path) {
                if let Ok(mut instance) = ServiceInstance::from_wire(&value) {
                    instance.last_heartbeat = now_millis();
                    self.store.set_data(&path, instance.to_wire())?;
                }
            }
        }
        Ok(())
    }

    fn list_services(&self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok(self.store.child_names(SERVICES_PATH))
    }

    fn wait_for_connection(&self, timeout_ms: u64) -> Result<()> {
        let (flag, condvar) = &*self.connected;
        let deadline = Duration::from_millis(timeout_ms);
        let (connected, timed_out) = condvar
            .wait_timeout_while(flag.lock().unwrap(), deadline, |connected| !*connected)
            .map(|(guard, res)| (*guard, res.timed_out()))
            .unwrap_or((false, true));
        if connected {
            Ok(())
        } else if timed_out {
            Err(RpcError::Timeout(timeout_ms))
        } else {
            Err(RpcError::RegistryUnavailable(
                "registry session is not connected".into(),
            ))
        }
    }
}

impl Drop for EphemeralRegistry {
    fn drop(&mut self) {
        self.disconnect();
        let _ = self.events_tx.send(WatchEvent::Shutdown);
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            let _ = watcher.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;

    /// Each test gets its own store address so tests stay isolated.
    fn unique_address(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!("test-{}-{}", tag, COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    fn instance(service: &str, port: u16) -> ServiceInstance {
        ServiceInstance::new(service, "127.0.0.1", port)
    }

    #[test]
    fn test_register_and_discover() {
        let addr = unique_address("reg");
        let registry = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        registry.register(&instance("Calc", 9000)).unwrap();

        let found = registry.discover("Calc").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "127.0.0.1:9000");
        assert!(found[0].last_heartbeat > 0, "registration stamps a heartbeat");
    }

    #[test]
    fn test_discover_unknown_service_is_empty() {
        let addr = unique_address("empty");
        let registry = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        assert!(registry.discover("Nobody").unwrap().is_empty());
    }

    #[test]
    fn test_register_rejects_invalid_instance() {
        let addr = unique_address("invalid");
        let registry = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        assert!(registry.register(&instance("", 9000)).is_err());
        assert!(registry.register(&instance("Calc", 0)).is_err());
    }

    #[test]
    fn test_unregister_removes_matching_node() {
        let addr = unique_address("unreg");
        let registry = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        registry.register(&instance("Calc", 9000)).unwrap();
        registry.register(&instance("Calc", 9001)).unwrap();

        registry.unregister("Calc", "127.0.0.1:9000").unwrap();
        let found = registry.discover("Calc").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "127.0.0.1:9001");
    }

    #[test]
    fn test_same_address_shares_namespace() {
        let addr = unique_address("shared");
        let server_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        let client_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();

        server_side.register(&instance("Calc", 9000)).unwrap();
        assert_eq!(client_side.discover("Calc").unwrap().len(), 1);

        let other = EphemeralRegistry::connect(&unique_address("isolated"), 30_000).unwrap();
        assert!(other.discover("Calc").unwrap().is_empty());
    }

    #[test]
    fn test_reregistration_replaces_node() {
        let addr = unique_address("rereg");
        let registry = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        registry.register(&instance("Calc", 9000)).unwrap();
        registry
            .register(&instance("Calc", 9000).with_weight(5))
            .unwrap();

        let found = registry.discover("Calc").unwrap();
        assert_eq!(found.len(), 1, "canonical id stays unique");
        assert_eq!(found[0].weight, 5);
    }

    #[test]
    fn test_list_services() {
        let addr = unique_address("list");
        let registry = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        registry.register(&instance("Calc", 9000)).unwrap();
        registry.register(&instance("Echo", 9001)).unwrap();

        let mut services = registry.list_services().unwrap();
        services.sort();
        assert_eq!(services, vec!["Calc", "Echo"]);
    }

    #[test]
    fn test_subscribe_sees_membership_changes() {
        let addr = unique_address("watch");
        let server_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        let client_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();

        let (tx, rx) = channel();
        client_side
            .subscribe(
                "Calc",
                Box::new(move |service, snapshot| {
                    let _ = tx.send((service.to_string(), snapshot.len()));
                }),
            )
            .unwrap();

        server_side.register(&instance("Calc", 9000)).unwrap();
        let (service, count) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(service, "Calc");
        assert_eq!(count, 1);

        server_side.unregister("Calc", "127.0.0.1:9000").unwrap();
        let (_, count) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unsubscribe_stops_callbacks() {
        let addr = unique_address("unsub");
        let server_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        let client_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();

        let (tx, rx) = channel();
        client_side
            .subscribe(
                "Calc",
                Box::new(move |_, snapshot| {
                    let _ = tx.send(snapshot.len());
                }),
            )
            .unwrap();
        client_side.unsubscribe("Calc").unwrap();

        server_side.register(&instance("Calc", 9000)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_disconnect_drops_ephemeral_nodes_and_fires_watch() {
        let addr = unique_address("crash");
        let server_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        let client_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();

        server_side.register(&instance("Calc", 9000)).unwrap();
        server_side.register(&instance("Calc", 9001)).unwrap();

        let (tx, rx) = channel();
        client_side
            .subscribe(
                "Calc",
                Box::new(move |_, snapshot| {
                    let _ = tx.send(snapshot.len());
                }),
            )
            .unwrap();

        // Simulated crash: the session ends without unregistering.
        server_side.disconnect();

        let count = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count, 0);
        assert!(client_side.discover("Calc").unwrap().is_empty());
        assert!(server_side.register(&instance("Calc", 9000)).is_err());
    }

    #[test]
    fn test_session_expires_without_heartbeats() {
        let addr = unique_address("expiry");
        let server_side = EphemeralRegistry::connect(&addr, 150).unwrap();
        let client_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();

        server_side.register(&instance("Calc", 9000)).unwrap();
        assert_eq!(client_side.discover("Calc").unwrap().len(), 1);

        // No heartbeats: the sweeper expires the session.
        thread::sleep(Duration::from_millis(600));
        assert!(client_side.discover("Calc").unwrap().is_empty());

        let err = server_side.heartbeat("Calc", "127.0.0.1:9000").unwrap_err();
        assert!(matches!(err, RpcError::RegistryUnavailable(_)));
    }

    #[test]
    fn test_heartbeat_keeps_session_alive_and_refreshes_timestamp() {
        let addr = unique_address("heartbeat");
        let server_side = EphemeralRegistry::connect(&addr, 400).unwrap();
        let client_side = EphemeralRegistry::connect(&addr, 30_000).unwrap();

        server_side.register(&instance("Calc", 9000)).unwrap();
        let before = client_side.discover("Calc").unwrap()[0].last_heartbeat;

        // Heartbeat through several sweeper intervals.
        for _ in 0..6 {
            thread::sleep(Duration::from_millis(150));
            server_side.heartbeat("Calc", "127.0.0.1:9000").unwrap();
        }

        let found = client_side.discover("Calc").unwrap();
        assert_eq!(found.len(), 1, "session outlives its timeout via heartbeats");
        assert!(found[0].last_heartbeat >= before);
    }

    #[test]
    fn test_wait_for_connection() {
        let addr = unique_address("wait");
        let registry = EphemeralRegistry::connect(&addr, 30_000).unwrap();
        registry.wait_for_connection(100).unwrap();

        registry.disconnect();
        assert!(registry.wait_for_connection(50).is_err());
    }
}
