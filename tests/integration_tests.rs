//! End-to-end scenarios driving the manager, the caches and the eviction
//! thread together. Timing-sensitive tests run serially so background
//! sweeps from one test never interfere with another's clock.

mod common;

use anyhow::Result;
use common::FixedSizeEngine;
use libre2_cache::{CacheConfig, CacheManager, RESULT_ENTRY_SIZE};
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn sweep_config(pattern_ttl_ms: i64, deferred_ttl_ms: i64) -> CacheConfig {
    CacheConfig {
        pattern_cache_ttl_ms: pattern_ttl_ms,
        deferred_cache_ttl_ms: deferred_ttl_ms,
        eviction_check_interval_ms: 10,
        ..CacheConfig::default()
    }
}

#[test]
fn test_hit_sequence() -> Result<()> {
    let manager = CacheManager::new(CacheConfig {
        auto_start_eviction_thread: false,
        ..CacheConfig::default()
    })?;

    let first = manager.get_or_compile("abc", true)?;
    let report = manager.metrics_report();
    assert_eq!(report.pattern_cache.capacity.entry_count, 1);
    assert_eq!(report.pattern_cache.hits, 0);
    assert_eq!(report.pattern_cache.misses, 1);

    let second = manager.get_or_compile("abc", true)?;
    let third = manager.get_or_compile("abc", true)?;
    let report = manager.metrics_report();
    assert_eq!(report.pattern_cache.hits, 2);
    assert_eq!(report.pattern_cache.misses, 1);
    // references still held: nothing released to zero yet
    assert_eq!(report.pattern_cache.patterns_released_to_zero, 0);

    drop(first);
    drop(second);
    drop(third);
    Ok(())
}

#[test]
#[serial]
fn test_refcount_migration_under_ttl() -> Result<()> {
    let manager = CacheManager::new(sweep_config(50, 10_000))?;

    let held = manager.get_or_compile("x", true)?;
    thread::sleep(Duration::from_millis(200));

    let report = manager.metrics_report();
    assert_eq!(report.pattern_cache.capacity.entry_count, 0);
    assert_eq!(report.pattern_cache.evictions.ttl_moved_to_deferred, 1);
    assert_eq!(report.deferred_cache.capacity.entry_count, 1);

    // the held reference still matches after migration
    assert!(held.is_match(b"x"));

    held.release();
    thread::sleep(Duration::from_millis(50));

    let report = manager.metrics_report();
    assert_eq!(report.deferred_cache.capacity.entry_count, 0);
    assert_eq!(report.deferred_cache.evictions.immediate, 1);
    Ok(())
}

#[test]
#[serial]
fn test_forced_eviction_of_leaked_pattern() -> Result<()> {
    common::init_logging();
    let manager = CacheManager::new(sweep_config(50, 100))?;

    let leaked = manager.get_or_compile("y", true)?;
    thread::sleep(Duration::from_millis(500));

    let report = manager.metrics_report();
    assert_eq!(report.deferred_cache.evictions.forced, 1);
    assert!(report.deferred_cache.evictions.forced_bytes_freed > 0);
    assert_eq!(report.deferred_cache.capacity.entry_count, 0);

    // the cache gave up its share; the leaking holder still matches
    assert!(leaked.is_match(b"y"));
    drop(leaked);
    Ok(())
}

#[test]
#[serial]
fn test_lru_batching_against_byte_budget() -> Result<()> {
    let engine = Arc::new(FixedSizeEngine::new(100));
    let config = CacheConfig {
        // room for exactly 5 programs of 100 bytes
        pattern_cache_target_capacity_bytes: 500,
        eviction_check_interval_ms: 10,
        ..CacheConfig::default()
    };
    let manager = CacheManager::with_engine(config, Arc::clone(&engine) as _)?;

    for i in 0..7 {
        manager.get_or_compile(&format!("p{}", i), true)?.release();
    }
    thread::sleep(Duration::from_millis(100));

    let report = manager.metrics_report();
    assert!(report.pattern_cache.capacity.entry_count <= 5);
    assert!(report.pattern_cache.evictions.lru >= 2);
    assert!(report.pattern_cache.evictions.total_bytes_freed >= 200);
    assert!(report.pattern_cache.capacity.actual_bytes <= 500);
    Ok(())
}

#[test]
fn test_result_cache_size_independence() -> Result<()> {
    let manager = CacheManager::new(CacheConfig {
        auto_start_eviction_thread: false,
        ..CacheConfig::default()
    })?;
    let cache = manager.result_cache();

    let pattern_hash = 0x1234;
    let large_input = vec![b'x'; 10 * 1024];
    cache.put(pattern_hash, b"a", true);
    cache.put(pattern_hash, &large_input, false);

    let report = manager.metrics_report();
    assert_eq!(report.pattern_result_cache.capacity.entry_count, 2);
    assert_eq!(
        report.pattern_result_cache.capacity.actual_bytes,
        2 * RESULT_ENTRY_SIZE
    );
    assert_eq!(cache.get(pattern_hash, b"a"), Some(true));
    assert_eq!(cache.get(pattern_hash, &large_input), Some(false));
    Ok(())
}

#[test]
#[serial]
fn test_metrics_snapshot_stability() -> Result<()> {
    let manager = Arc::new(CacheManager::new(CacheConfig {
        pattern_cache_ttl_ms: 20,
        deferred_cache_ttl_ms: 1_000,
        eviction_check_interval_ms: 5,
        ..CacheConfig::default()
    })?);

    let mut workers = Vec::new();
    for t in 0..4 {
        let manager = Arc::clone(&manager);
        workers.push(thread::spawn(move || {
            for i in 0..200 {
                let reference = manager
                    .get_or_compile(&format!("worker{}", (t + i) % 3), true)
                    .unwrap();
                reference.release();
            }
        }));
    }
    let mut readers = Vec::new();
    for _ in 0..3 {
        let manager = Arc::clone(&manager);
        readers.push(thread::spawn(move || {
            for _ in 0..50 {
                let json = manager.get_metrics_json().unwrap();
                // every concurrently-produced document parses back into the
                // full report shape
                let report: libre2_cache::CacheReport = serde_json::from_str(&json).unwrap();
                assert!(report.pattern_cache.hit_rate >= 0.0);
                assert!(report.pattern_cache.hit_rate <= 100.0);
            }
        }));
    }
    for handle in workers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    // quiesce, then the eviction identities must hold exactly
    manager.stop_eviction();
    let report = manager.metrics_report();
    let pattern = &report.pattern_cache.evictions;
    assert_eq!(pattern.total_evictions, pattern.ttl + pattern.lru);
    let result = &report.pattern_result_cache.evictions;
    assert_eq!(result.total_evictions, result.ttl + result.lru);
    let deferred = &report.deferred_cache.evictions;
    assert_eq!(
        deferred.total_evictions,
        deferred.immediate + deferred.forced
    );
    Ok(())
}

#[test]
#[serial]
fn test_deferred_quiescence_after_release() -> Result<()> {
    let engine = Arc::new(FixedSizeEngine::new(64));
    let manager = CacheManager::with_engine(sweep_config(30, 5_000), Arc::clone(&engine) as _)?;

    let refs: Vec<_> = (0..5)
        .map(|i| manager.get_or_compile(&format!("q{}", i), true).unwrap())
        .collect();
    thread::sleep(Duration::from_millis(150));

    // all five migrated while held
    let report = manager.metrics_report();
    assert_eq!(report.deferred_cache.capacity.entry_count, 5);

    drop(refs);
    thread::sleep(Duration::from_millis(100));

    let report = manager.metrics_report();
    assert_eq!(report.deferred_cache.capacity.entry_count, 0);
    assert_eq!(report.deferred_cache.capacity.actual_bytes, 0);

    // nothing leaked once the caches and callers let go
    drop(manager);
    assert_eq!(engine.live_programs(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_clear_all_leaves_thread_running() -> Result<()> {
    let manager = CacheManager::new(sweep_config(50, 10_000))?;
    assert!(manager.is_eviction_running());

    manager.get_or_compile("abc", true)?.release();
    manager.result_cache().put(1, b"in", true);
    manager.clear_all();

    assert!(manager.is_eviction_running());
    let report = manager.metrics_report();
    assert_eq!(report.pattern_cache.capacity.entry_count, 0);
    assert_eq!(report.pattern_result_cache.capacity.entry_count, 0);
    Ok(())
}

#[test]
fn test_pass_through_mode_compiles_every_call() -> Result<()> {
    let engine = Arc::new(FixedSizeEngine::new(64));
    let config = CacheConfig {
        cache_enabled: false,
        auto_start_eviction_thread: false,
        ..CacheConfig::default()
    };
    let manager = CacheManager::with_engine(config, Arc::clone(&engine) as _)?;

    let a = manager.get_or_compile("same", true)?;
    let b = manager.get_or_compile("same", true)?;
    assert_eq!(engine.compilations(), 2);

    let report = manager.metrics_report();
    assert_eq!(report.pattern_cache.capacity.entry_count, 0);
    assert_eq!(report.pattern_cache.hits, 0);
    assert_eq!(report.pattern_cache.misses, 0);

    // the result cache follows the global switch
    manager.result_cache().put(1, b"x", true);
    assert_eq!(manager.result_cache().get(1, b"x"), None);

    drop(a);
    drop(b);
    drop(manager);
    assert_eq!(engine.live_programs(), 0);
    Ok(())
}

#[test]
fn test_compilation_failure_surfaces_engine_text() -> Result<()> {
    let manager = CacheManager::new(CacheConfig {
        auto_start_eviction_thread: false,
        ..CacheConfig::default()
    })?;

    let err = manager.get_or_compile("[unclosed", true).unwrap_err();
    assert!(err.to_string().contains("compilation failed"));
    let report = manager.metrics_report();
    assert_eq!(report.pattern_cache.compilation_errors, 1);
    assert_eq!(report.pattern_cache.capacity.entry_count, 0);
    Ok(())
}

#[test]
#[serial]
fn test_manager_drop_releases_everything() -> Result<()> {
    let engine = Arc::new(FixedSizeEngine::new(64));
    let manager = CacheManager::with_engine(sweep_config(10_000, 20_000), Arc::clone(&engine) as _)?;

    for i in 0..10 {
        manager.get_or_compile(&format!("d{}", i), true)?.release();
    }
    let held = manager.get_or_compile("held", true)?;
    drop(manager);

    // only the caller-held program survives the manager
    assert_eq!(engine.live_programs(), 1);
    assert!(held.is_match(b"held"));
    drop(held);
    assert_eq!(engine.live_programs(), 0);
    Ok(())
}
