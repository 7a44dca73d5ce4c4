//! Tests for control connection limits.

use std::sync::Arc;

use coverage_agent::control::{ConnectionConfig, ConnectionPool};

#[test]
fn test_acquire_within_limit() {
    let pool = ConnectionPool::new(ConnectionConfig { max_connections: 2 });

    let guard1 = pool.try_acquire();
    assert!(guard1.is_some());
    let guard2 = pool.try_acquire();
    assert!(guard2.is_some());
    assert_eq!(pool.active_count(), 2);

    // Should fail - at limit
    assert!(pool.try_acquire().is_none());
    assert_eq!(pool.active_count(), 2);
}

#[test]
fn test_owned_guard_outlives_borrow() {
    let pool = Arc::new(ConnectionPool::new(ConnectionConfig { max_connections: 1 }));
    let guard = pool.try_acquire_owned().unwrap();

    let moved = std::thread::spawn(move || {
        let _guard = guard;
    });
    moved.join().unwrap();

    // Guard dropped on the other thread, slot is free again
    assert_eq!(pool.active_count(), 0);
    assert!(pool.try_acquire_owned().is_some());
}

#[test]
fn test_concurrent_acquire() {
    use std::thread;

    let pool = Arc::new(ConnectionPool::new(ConnectionConfig { max_connections: 100 }));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut guards = Vec::new();
                for _ in 0..20 {
                    if let Some(guard) = pool.try_acquire_owned() {
                        guards.push(guard);
                    }
                }
                guards
            })
        })
        .collect();

    let held: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assert_eq!(held.len(), 100);
    assert_eq!(pool.active_count(), 100);
}

#[test]
fn test_connection_config_defaults() {
    assert_eq!(ConnectionConfig::default().max_connections, 4);
}
