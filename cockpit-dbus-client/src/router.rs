use cockpit_dbus_core::{MatchRule, SignalMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) type SignalHandler = Box<dyn Fn(&SignalMessage) + Send + Sync>;

pub(crate) struct Route {
    id: u64,
    pub(crate) rule: MatchRule,
    handler: SignalHandler,
    active: AtomicBool,
}

impl Route {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true for the call that actually deactivated the route.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

/// Delivers incoming signals to every matching, still active route.
#[derive(Default)]
pub(crate) struct SignalRouter {
    next_id: AtomicU64,
    routes: Mutex<Vec<Arc<Route>>>,
}

impl SignalRouter {
    pub fn add(&self, rule: MatchRule, handler: SignalHandler) -> Arc<Route> {
        let route = Arc::new(Route {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            rule,
            handler,
            active: AtomicBool::new(true),
        });
        self.routes.lock().push(route.clone());
        route
    }

    pub fn remove(&self, route: &Route) {
        self.routes.lock().retain(|r| r.id != route.id);
    }

    /// Invoke the handlers synchronously. Matching routes are collected under
    /// the lock and called after it is released, so a handler may subscribe
    /// or unsubscribe. A route removed by an earlier handler in the same
    /// dispatch is skipped.
    pub fn dispatch(&self, signal: &SignalMessage) -> usize {
        let matching: Vec<Arc<Route>> = self
            .routes
            .lock()
            .iter()
            .filter(|r| r.is_active() && r.rule.matches(signal))
            .cloned()
            .collect();

        let mut delivered = 0;
        for route in matching {
            if route.is_active() {
                (route.handler)(signal);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn clear(&self) {
        for route in self.routes.lock().drain(..) {
            route.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const FROBBER: &str = "com.redhat.Cockpit.DBusTests.Frobber";

    fn signal(path: &str) -> SignalMessage {
        SignalMessage {
            path: path.into(),
            interface: FROBBER.into(),
            member: "TestSignal".into(),
            args: vec![],
        }
    }

    fn counter() -> (Arc<AtomicUsize>, SignalHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (
            count,
            Box::new(move |_| {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_all_matching_routes_fire() {
        let router = SignalRouter::default();
        let (a, handler_a) = counter();
        let (b, handler_b) = counter();
        let (c, handler_c) = counter();
        router.add(MatchRule::new().interface(FROBBER), handler_a);
        router.add(MatchRule::new().path("/otree/frobber"), handler_b);
        router.add(MatchRule::new().path("/elsewhere"), handler_c);

        assert_eq!(router.dispatch(&signal("/otree/frobber")), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_removal_is_immediate() {
        let router = Arc::new(SignalRouter::default());
        let slot: Arc<Mutex<Option<Arc<Route>>>> = Arc::new(Mutex::new(None));

        // the first handler removes the second during the same dispatch
        let killer_slot = slot.clone();
        let killer_router = router.clone();
        router.add(
            MatchRule::new(),
            Box::new(move |_| {
                if let Some(victim) = killer_slot.lock().take() {
                    victim.deactivate();
                    killer_router.remove(&victim);
                }
            }),
        );
        let (count, handler) = counter();
        let victim = router.add(MatchRule::new(), handler);
        *slot.lock() = Some(victim.clone());

        assert_eq!(router.dispatch(&signal("/a")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!victim.is_active());
        assert!(!victim.deactivate());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_clear_deactivates_everything() {
        let router = SignalRouter::default();
        let (count, handler) = counter();
        let route = router.add(MatchRule::new(), handler);
        router.clear();
        assert!(!route.is_active());
        assert_eq!(router.dispatch(&signal("/a")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.len(), 0);
    }
}
