//! Per-Channel Message Routing
//!
//! Maps a decoded message's runtime type to an ordered list of handlers and
//! invokes them synchronously on the read worker, in registration order.
//! Matching is by the exact concrete type only; there is no supertype or
//! wildcard routing. The router catches nothing; a handler panic surfaces
//! to the read loop, which treats it as a fatal channel error.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of one registered handler.
///
/// Registration identity in this crate is the id, not the closure: every
/// `add` call issues a fresh id, and removal by id is exact and idempotent.
/// Registering the same closure twice yields two independent registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub(crate) type ErasedHandler =
    Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> BoxFuture<'static, ()> + Send + Sync>;

struct RouteEntry {
    id: HandlerId,
    handler: ErasedHandler,
}

/// Dispatch table from message type to ordered handler list.
#[derive(Default)]
pub struct Router {
    routes: RwLock<HashMap<TypeId, Vec<RouteEntry>>>,
    next_id: AtomicU64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for messages of type `T`, appended after any
    /// existing handlers for that type.
    pub fn add<T, F, Fut>(&self, handler: F) -> HandlerId
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |message: Arc<dyn Any + Send + Sync>| {
            match message.downcast::<T>() {
                Ok(typed) => handler(typed).boxed(),
                // Dispatch is keyed by TypeId, so a mismatch cannot reach a
                // registered handler; ignore rather than panic on the worker.
                Err(_) => futures::future::ready(()).boxed(),
            }
        });
        self.add_erased(TypeId::of::<T>(), erased)
    }

    pub(crate) fn add_erased(&self, type_id: TypeId, handler: ErasedHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes
            .write()
            .entry(type_id)
            .or_default()
            .push(RouteEntry { id, handler });
        id
    }

    /// Remove exactly the registration named by `id`. No-op when absent.
    pub fn remove(&self, type_id: TypeId, id: HandlerId) {
        let mut routes = self.routes.write();
        if let Some(entries) = routes.get_mut(&type_id) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                routes.remove(&type_id);
            }
        }
    }

    /// Number of handlers registered for a type.
    pub fn handler_count(&self, type_id: TypeId) -> usize {
        self.routes.read().get(&type_id).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the exact runtime type, in
    /// registration order, awaiting each one on the calling task. The
    /// handler list is snapshotted first so handlers may subscribe or
    /// unsubscribe without deadlocking the table lock.
    pub(crate) async fn dispatch(&self, type_id: TypeId, message: Arc<dyn Any + Send + Sync>) {
        let handlers: Vec<ErasedHandler> = {
            let routes = self.routes.read();
            match routes.get(&type_id) {
                Some(entries) => entries.iter().map(|e| e.handler.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            handler(message.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Note(&'static str);

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> impl Fn(Arc<Note>) -> futures::future::Ready<()> + Send + Sync + 'static {
        let log = log.clone();
        move |_note| {
            log.lock().unwrap().push(label);
            futures::future::ready(())
        }
    }

    #[tokio::test]
    async fn dispatch_runs_handlers_in_registration_order() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        router.add::<Note, _, _>(recorder(&log, "first"));
        router.add::<Note, _, _>(recorder(&log, "second"));
        router.add::<Note, _, _>(recorder(&log, "third"));

        router
            .dispatch(TypeId::of::<Note>(), Arc::new(Note("m")))
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn dispatch_matches_the_exact_type_only() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.add::<Note, _, _>(recorder(&log, "note"));

        router
            .dispatch(TypeId::of::<String>(), Arc::new("other".to_string()))
            .await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_is_exact_and_idempotent() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let keep = router.add::<Note, _, _>(recorder(&log, "keep"));
        let removed = router.add::<Note, _, _>(recorder(&log, "removed"));

        router.remove(TypeId::of::<Note>(), removed);
        // Removing again must be a no-op.
        router.remove(TypeId::of::<Note>(), removed);
        assert_eq!(router.handler_count(TypeId::of::<Note>()), 1);

        router
            .dispatch(TypeId::of::<Note>(), Arc::new(Note("m")))
            .await;
        assert_eq!(*log.lock().unwrap(), vec!["keep"]);

        router.remove(TypeId::of::<Note>(), keep);
        assert_eq!(router.handler_count(TypeId::of::<Note>()), 0);
    }

    #[tokio::test]
    async fn handlers_may_unsubscribe_during_dispatch() {
        let router = Arc::new(Router::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let id_cell = Arc::new(Mutex::new(None::<HandlerId>));
        let router_in_handler = router.clone();
        let id_in_handler = id_cell.clone();
        let log_in_handler = log.clone();
        let id = router.add::<Note, _, _>(move |_note| {
            log_in_handler.lock().unwrap().push("ran");
            if let Some(id) = *id_in_handler.lock().unwrap() {
                router_in_handler.remove(TypeId::of::<Note>(), id);
            }
            futures::future::ready(())
        });
        *id_cell.lock().unwrap() = Some(id);

        router
            .dispatch(TypeId::of::<Note>(), Arc::new(Note("m")))
            .await;
        router
            .dispatch(TypeId::of::<Note>(), Arc::new(Note("m")))
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["ran"]);
    }
}
