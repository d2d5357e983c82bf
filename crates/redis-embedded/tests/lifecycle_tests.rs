//! End-to-end lifecycle tests for RedisServer.
//!
//! A real redis-server is not available in CI, so these tests extract small
//! shell scripts that behave like one: they print a few log lines, announce
//! readiness the way redis-server does, and then `exec sleep` so the signal
//! from `stop()` reaches the process holding the pipes.

#![cfg(unix)]

use redis_embedded::platform::is_process_alive;
use redis_embedded::{
    DirectorySource, LifecycleState, PlatformTarget, RedisServer, RedisServerBuilder,
    RedisServerError, ResourceKey, LATEST_REDIS_VERSION,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WELL_BEHAVED: &str = r#"#!/bin/sh
echo "[$$] starting up"
echo "[$$] loading data"
echo "$@" > args.txt
echo "[$$] * The server is now ready to accept connections on port $2"
exec sleep 600
"#;

const CRASHES_ON_BOOT: &str = r#"#!/bin/sh
echo "[$$] starting up"
echo "[$$] # Fatal error, can't open config file" >&2
exit 1
"#;

const NEVER_READY: &str = r#"#!/bin/sh
echo "[$$] starting up"
exec sleep 600
"#;

const IGNORES_SIGTERM: &str = r#"#!/bin/sh
trap '' TERM
echo "[$$] * The server is now ready to accept connections on port $2"
while true; do sleep 1; done
"#;

/// Create a resource root holding `script` as the current platform's redis-server.
fn fake_redis(script: &str) -> (TempDir, DirectorySource) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = DirectorySource::new(temp_dir.path());
    let key = ResourceKey::new(LATEST_REDIS_VERSION, PlatformTarget::current().unwrap());
    let path = source.path_for(&key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, script).unwrap();
    (temp_dir, source)
}

fn builder(script: &str) -> (TempDir, RedisServerBuilder) {
    let (temp_dir, source) = fake_redis(script);
    let builder = RedisServer::builder()
        .artifact_source(source)
        .startup_timeout(Duration::from_secs(10))
        .shutdown_timeout(Duration::from_secs(5));
    (temp_dir, builder)
}

fn recorded_args(server: &RedisServer) -> String {
    std::fs::read_to_string(server.scratch_dir().join("args.txt"))
        .unwrap()
        .trim()
        .to_string()
}

#[test]
fn test_start_and_stop_on_fixed_port() {
    let (_resources, builder) = builder(WELL_BEHAVED);
    let server = builder.port(19999).password("").build().unwrap();

    server.start().unwrap();

    assert!(server.is_active());
    assert_eq!(server.state(), LifecycleState::Running);
    assert_eq!(server.port(), 19999);
    assert_eq!(server.password(), None);
    let pid = server.pid().expect("running server has a pid");
    assert!(is_process_alive(pid));
    // Written relative to the working directory, which is the scratch dir
    assert_eq!(recorded_args(&server), "--port 19999");

    server.stop().unwrap();

    assert!(!server.is_active());
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert_eq!(server.pid(), None);
    assert!(!is_process_alive(pid));
}

#[test]
fn test_password_is_passed_as_requirepass() {
    let (_resources, builder) = builder(WELL_BEHAVED);
    let server = builder.password("s3cret").build().unwrap();

    server.start().unwrap();
    assert_eq!(
        recorded_args(&server),
        format!("--port {} --requirepass s3cret", server.port())
    );
    server.stop().unwrap();
}

#[test]
fn test_start_while_running_fails_and_keeps_process() {
    let (_resources, builder) = builder(WELL_BEHAVED);
    let server = builder.build().unwrap();
    server.start().unwrap();
    let pid = server.pid().unwrap();

    let err = server.start().unwrap_err();

    assert!(matches!(err, RedisServerError::AlreadyRunning));
    assert!(server.is_active());
    assert_eq!(server.pid(), Some(pid));
    assert!(is_process_alive(pid));
    server.stop().unwrap();
}

#[test]
fn test_stop_is_idempotent() {
    let (_resources, builder) = builder(WELL_BEHAVED);
    let server = builder.build().unwrap();

    server.stop().unwrap();
    server.start().unwrap();
    server.stop().unwrap();
    server.stop().unwrap();

    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[test]
fn test_restart_after_stop_is_rejected() {
    let (_resources, builder) = builder(WELL_BEHAVED);
    let server = builder.build().unwrap();
    server.start().unwrap();
    server.stop().unwrap();

    let err = server.start().unwrap_err();
    assert!(matches!(err, RedisServerError::AlreadyStopped));
    assert!(!server.is_active());
}

#[test]
fn test_exit_before_ready_is_not_ready() {
    let (_resources, builder) = builder(CRASHES_ON_BOOT);
    let server = builder.build().unwrap();

    let err = server.start().unwrap_err();

    assert!(
        matches!(err, RedisServerError::NotReady { lines_read: 1, ref last_line } if last_line.as_deref().is_some_and(|l| l.ends_with("starting up")))
    );
    assert_eq!(server.state(), LifecycleState::Idle);
    assert!(!server.is_active());
}

#[test]
fn test_silent_server_times_out_and_is_reaped() {
    let (_resources, builder) = builder(NEVER_READY);
    let server = builder
        .startup_timeout(Duration::from_millis(300))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = server.start().unwrap_err();

    assert!(matches!(err, RedisServerError::StartupTimeout(t) if t == Duration::from_millis(300)));
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.state(), LifecycleState::Idle);
    assert_eq!(server.pid(), None);
}

#[test]
fn test_stop_escalates_when_sigterm_is_ignored() {
    let (_resources, builder) = builder(IGNORES_SIGTERM);
    let server = builder
        .shutdown_timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    server.start().unwrap();
    let pid = server.pid().unwrap();

    server.stop().unwrap();

    assert!(!is_process_alive(pid));
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[test]
fn test_drop_stops_child_and_removes_scratch_dir() {
    let (_resources, builder) = builder(WELL_BEHAVED);
    let server = builder.build().unwrap();
    server.start().unwrap();
    let pid = server.pid().unwrap();
    let dir = server.scratch_dir().to_path_buf();

    drop(server);

    assert!(!is_process_alive(pid));
    assert!(!dir.exists());
}

#[test]
fn test_concurrent_start_launches_once() {
    let (_resources, builder) = builder(WELL_BEHAVED);
    let server = Arc::new(builder.build().unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let server = Arc::clone(&server);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                server.start()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(RedisServerError::AlreadyRunning))));
    server.stop().unwrap();
}

#[test]
fn test_parallel_servers_are_isolated() {
    let (_resources, builder_a) = builder(WELL_BEHAVED);
    let (_resources_b, builder_b) = builder(WELL_BEHAVED);
    let a = builder_a.build().unwrap();
    let b = builder_b.build().unwrap();

    a.start().unwrap();
    b.start().unwrap();

    assert_ne!(a.port(), b.port());
    assert_ne!(a.scratch_dir(), b.scratch_dir());
    assert_ne!(a.pid(), b.pid());

    a.stop().unwrap();
    assert!(b.is_active());
    b.stop().unwrap();
}
