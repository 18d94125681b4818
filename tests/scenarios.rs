mod common;

use std::sync::Arc;

use common::{Harness, Outcome, ScriptedDriver};
use tex_stream::render::cache::ResolveOptions;
use tex_stream::{ProxyEventKind, ProxyState};


#[test]
fn resolved_proxy_is_queued_then_loaded() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("a.png");
    assert_eq!(proxy.state(), ProxyState::Queued);
    assert!(proxy.resource().is_none());

    h.tick();

    assert_eq!(proxy.state(), ProxyState::Loaded);
    let texture = proxy.resource().expect("resident after load");
    assert_eq!(texture.identity, "a.png");

    let kinds: Vec<_> = h.events_for("a.png").into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ProxyEventKind::Loaded]);
}

#[test]
fn resolving_twice_yields_the_same_proxy_and_one_enqueue() {
    let h = Harness::new(ScriptedDriver::manual());

    let first = h.registry.resolve("a.png");
    let second = h.registry.resolve("a.png");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.loader().pending_loads().len(), 1);

    h.tick();
    let third = h.registry.resolve("a.png");
    assert!(Arc::ptr_eq(&first, &third));
    assert!(h.loader().pending_loads().is_empty());
    assert_eq!(h.decoded(), vec!["a.png"]);
}

#[test]
fn persistent_proxy_survives_long_idle_periods() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve_with("b.png", ResolveOptions::persistent());
    h.tick();
    assert_eq!(proxy.state(), ProxyState::Loaded);
    assert!(h.loader().pending_unloads().is_empty());

    h.advance(10_000);
    h.tick();

    assert_eq!(proxy.state(), ProxyState::Loaded);
    assert!(proxy.resource().is_some());
    assert!(h.destroyed().is_empty());
}

#[test]
fn idle_proxy_is_evicted_after_the_threshold() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("c.png");
    h.tick();
    assert_eq!(proxy.state(), ProxyState::Loaded);

    // exactly at the threshold is not "exceeds"
    h.advance(5000);
    h.tick();
    assert_eq!(proxy.state(), ProxyState::Loaded);

    h.advance(1000);
    h.tick();

    assert_eq!(proxy.state(), ProxyState::NotLoaded);
    assert!(proxy.resource().is_none());
    assert_eq!(h.destroyed(), vec![0]);

    let unloaded = h.events_for("c.png")
        .into_iter()
        .filter(|e| e.kind == ProxyEventKind::Unloaded)
        .count();
    assert_eq!(unloaded, 1);

    h.advance(1000);
    h.tick();
    assert_eq!(h.destroyed(), vec![0]);
}

#[test]
fn touching_postpones_eviction() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("c.png");
    h.tick();

    for _ in 0..10 {
        h.advance(3000);
        proxy.touch();
        h.tick();
    }
    assert_eq!(proxy.state(), ProxyState::Loaded);

    h.advance(5001);
    h.tick();
    assert_eq!(proxy.state(), ProxyState::NotLoaded);
}

#[test]
fn io_failure_marks_retry_and_the_worker_moves_on() {
    let h = Harness::new(ScriptedDriver::manual().script("d.png", Outcome::IoFailure));

    let failing = h.registry.resolve("d.png");
    let next = h.registry.resolve("next.png");
    failing.set_priority(0);

    h.tick();
    assert_eq!(failing.state(), ProxyState::Retry);
    assert!(failing.resource().is_none());

    let kinds: Vec<_> = h.events_for("d.png").into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ProxyEventKind::Retry]);

    h.tick();
    assert_eq!(next.state(), ProxyState::Loaded);

    // not re-queued on its own
    h.tick();
    assert_eq!(failing.state(), ProxyState::Retry);
    assert_eq!(h.decoded(), vec!["d.png", "next.png"]);
}

#[test]
fn unexpected_failure_marks_error_and_others_still_load() {
    let h = Harness::new(ScriptedDriver::manual().script("e.png", Outcome::OtherFailure));

    let broken = h.registry.resolve("e.png");
    let fine = h.registry.resolve("f.png");
    broken.set_priority(0);

    h.tick();
    assert_eq!(broken.state(), ProxyState::Error);
    let kinds: Vec<_> = h.events_for("e.png").into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ProxyEventKind::Error]);

    h.tick();
    assert_eq!(fine.state(), ProxyState::Loaded);
}

#[test]
fn panicking_decoder_counts_as_an_error() {
    let h = Harness::new(ScriptedDriver::manual().script("boom.png", Outcome::Panic));

    let proxy = h.registry.resolve("boom.png");
    let after = h.registry.resolve("after.png");
    proxy.set_priority(0);

    h.tick();
    h.tick();

    assert_eq!(proxy.state(), ProxyState::Error);
    assert_eq!(after.state(), ProxyState::Loaded);
}

#[test]
fn failed_proxies_can_be_queued_again() {
    let h = Harness::new(ScriptedDriver::manual().script("flaky.png", Outcome::IoFailure));

    let proxy = h.registry.resolve("flaky.png");
    h.tick();
    assert_eq!(proxy.state(), ProxyState::Retry);

    h.loader().driver().outcomes.lock().insert("flaky.png".into(), Outcome::Succeed);
    assert!(proxy.queue());
    assert!(!proxy.queue());
    assert_eq!(proxy.state(), ProxyState::Queued);

    h.tick();
    assert_eq!(proxy.state(), ProxyState::Loaded);
}

#[test]
fn per_proxy_events_fire_once_per_transition() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("g.png");
    h.tick();
    h.advance(6000);
    h.tick();

    let events = proxy.events();
    assert_eq!(events.loaded.trigger_count(), 1);
    assert_eq!(events.unloaded.trigger_count(), 1);
    assert_eq!(events.retry.trigger_count(), 0);
    assert_eq!(events.error.trigger_count(), 0);
}

#[test]
fn deferred_resolve_waits_for_fetch() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve_with("h.png", ResolveOptions::deferred());
    assert_eq!(proxy.state(), ProxyState::NotLoaded);
    assert!(h.loader().pending_loads().is_empty());

    h.tick();
    assert_eq!(proxy.state(), ProxyState::NotLoaded);

    assert!(proxy.fetch().is_none());
    assert_eq!(proxy.state(), ProxyState::Queued);

    h.tick();
    assert_eq!(proxy.fetch().map(|t| t.serial), Some(0));
}

#[test]
fn evicted_proxy_reloads_on_fetch() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("i.png");
    h.tick();
    h.advance(6000);
    h.tick();
    assert_eq!(proxy.state(), ProxyState::NotLoaded);

    assert!(proxy.fetch().is_none());
    h.tick();
    assert_eq!(proxy.state(), ProxyState::Loaded);
    assert_eq!(h.decoded(), vec!["i.png", "i.png"]);
}

#[test]
fn cancel_takes_a_queued_proxy_off_the_load_queue() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("j.png");
    h.registry.cancel(&proxy);

    assert_eq!(proxy.state(), ProxyState::NotLoaded);
    assert!(h.loader().pending_loads().is_empty());

    h.tick();
    assert!(h.decoded().is_empty());
}

#[test]
fn cancel_schedules_a_loaded_proxy_for_release_once() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("k.png");
    h.tick();
    assert_eq!(h.loader().pending_unloads().len(), 1);

    proxy.cancel();
    proxy.cancel();
    assert_eq!(h.loader().pending_unloads().len(), 1);
    assert_eq!(proxy.state(), ProxyState::Loaded);
}

#[test]
fn cancel_leaves_persistent_proxies_alone() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve_with("l.png", ResolveOptions::persistent());
    h.tick();
    proxy.cancel();

    assert!(h.loader().pending_unloads().is_empty());
    h.advance(60_000);
    h.tick();
    assert_eq!(proxy.state(), ProxyState::Loaded);
}

#[test]
fn dropped_registry_entries_are_rebuilt() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve_with("m.png", ResolveOptions::deferred());
    proxy.set_priority(7);
    drop(proxy);

    assert!(h.registry.get("m.png").is_none());
    assert_eq!(h.registry.sweep(), 1);
    assert!(h.registry.is_empty());

    let fresh = h.registry.resolve_with("m.png", ResolveOptions::deferred());
    assert_eq!(fresh.priority(), h.loader().config().default_priority);
}

#[test]
fn queued_proxies_stay_registered_without_callers() {
    let h = Harness::new(ScriptedDriver::manual());

    drop(h.registry.resolve("n.png"));
    let again = h.registry.get("n.png").expect("held by the load queue");
    assert_eq!(again.state(), ProxyState::Queued);
}

#[test]
fn dropped_persistent_proxy_is_destroyed_on_the_worker() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve_with("o.png", ResolveOptions::persistent());
    h.tick();
    drop(proxy);

    assert_eq!(h.loader().orphan_count(), 1);
    assert!(h.destroyed().is_empty());

    h.tick();
    assert_eq!(h.loader().orphan_count(), 0);
    assert_eq!(h.destroyed(), vec![0]);
}

#[test]
fn failing_listener_does_not_stop_the_worker() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("p.png");
    proxy.events().loaded.listen(|_| Err(anyhow::anyhow!("listener refuses")));
    let other = h.registry.resolve("q.png");

    h.tick();
    h.tick();

    assert_eq!(proxy.state(), ProxyState::Loaded);
    assert_eq!(other.state(), ProxyState::Loaded);
    // the engine-wide stream still saw both
    assert_eq!(h.events.lock().len(), 2);
}

#[test]
fn dropping_the_engine_destroys_resident_resources() {
    let h = Harness::new(ScriptedDriver::manual());
    let journal = h.journal.clone();

    let proxy = h.registry.resolve("t.png");
    h.tick();
    assert_eq!(proxy.state(), ProxyState::Loaded);

    drop(proxy);
    drop(h);

    assert_eq!(journal.lock().decoded, vec!["t.png"]);
    assert_eq!(journal.lock().destroyed, vec![0]);
}

#[test]
fn proxies_outliving_the_engine_are_released_through_the_driver() {
    let h = Harness::new(ScriptedDriver::manual());
    let journal = h.journal.clone();

    let proxy = h.registry.resolve("u.png");
    h.tick();
    drop(h);

    assert_eq!(proxy.state(), ProxyState::NotLoaded);
    assert!(proxy.resource().is_none());
    assert_eq!(journal.lock().destroyed, vec![0]);

    drop(proxy);
    assert_eq!(journal.lock().destroyed.len(), 1);
}

#[test]
fn enqueue_load_leaves_loaded_proxies_alone() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("v.png");
    h.tick();

    h.loader().enqueue_load(&proxy);
    assert!(h.loader().pending_loads().is_empty());
    assert_eq!(h.loader().pending_unloads().len(), 1);

    h.advance(6000);
    h.tick();
    assert_eq!(proxy.state(), ProxyState::NotLoaded);
    assert_eq!(h.decoded(), vec!["v.png"]);
}

#[test]
fn resource_in_use_is_not_evicted_until_released() {
    let h = Harness::new(ScriptedDriver::manual());

    let proxy = h.registry.resolve("w.png");
    h.tick();
    h.advance(6000);

    {
        let texture = proxy.resource().expect("resident");
        h.tick();
        assert_eq!(texture.identity, "w.png");
        assert_eq!(proxy.state(), ProxyState::Loaded);
        assert_eq!(h.loader().pending_unloads().len(), 1);
    }

    h.tick();
    assert_eq!(proxy.state(), ProxyState::NotLoaded);
    assert!(h.loader().pending_unloads().is_empty());
    assert_eq!(proxy.events().unloaded.trigger_count(), 1);
}
