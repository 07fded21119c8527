//! Baton arbitration under real thread contention.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use bcs_core::MapAuthoriser;
use bcs_session::SessionRegistry;

fn registry_with_users(users: &[(&str, i32)]) -> SessionRegistry {
    let levels: HashMap<String, i32> = users
        .iter()
        .map(|(name, level)| (name.to_string(), *level))
        .collect();
    let registry = SessionRegistry::new(Arc::new(MapAuthoriser::new(levels)));
    for (name, _) in users {
        registry
            .add_facade(name, "ws001", name, name, "cm1234-5")
            .expect("register facade");
    }
    registry
}

#[test]
fn racing_equal_level_requests_grant_exactly_once() {
    let users: Vec<(String, i32)> = (0..8).map(|i| (format!("user{i}"), 2)).collect();
    let refs: Vec<(&str, i32)> = users.iter().map(|(n, l)| (n.as_str(), *l)).collect();
    let registry = Arc::new(registry_with_users(&refs));

    let barrier = Arc::new(Barrier::new(users.len()));
    let granted = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for (name, _) in &users {
        let registry = registry.clone();
        let barrier = barrier.clone();
        let granted = granted.clone();
        let name = name.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            if registry.request_baton(&name) {
                granted.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("request thread panicked");
    }

    assert_eq!(granted.load(Ordering::SeqCst), 1);
    assert!(registry.is_baton_held());
}

#[test]
fn highest_level_ends_up_holding_under_contention() {
    // Equal-level requests never displace a holder and a strictly higher
    // level always does, so whatever the interleaving, the level-3 user
    // must end up with the baton.
    let registry = Arc::new(registry_with_users(&[
        ("alice", 2),
        ("bob", 2),
        ("carol", 3),
        ("dave", 2),
    ]));

    let barrier = Arc::new(Barrier::new(4));
    let mut handles = Vec::new();
    for name in ["alice", "bob", "carol", "dave"] {
        let registry = registry.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            registry.request_baton(name);
        }));
    }
    for handle in handles {
        handle.join().expect("request thread panicked");
    }

    let holder = registry.baton_holder().expect("baton should be held");
    assert_eq!(holder.username, "carol");
    assert!(registry.am_i_baton_holder("carol"));
}

#[test]
fn hammered_request_return_cycle_never_double_grants() {
    let registry = Arc::new(registry_with_users(&[("alice", 2), ("bob", 2)]));
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for name in ["alice", "bob"] {
        let registry = registry.clone();
        let holders = holders.clone();
        let peak = peak.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                if registry.request_baton(name) {
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    holders.fetch_sub(1, Ordering::SeqCst);
                    registry.return_baton(name);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("cycle thread panicked");
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
