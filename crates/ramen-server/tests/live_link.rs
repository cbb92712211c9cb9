//! End-to-end tests for the live-link server over loopback sockets.
//!
//! Each test runs a real server on an ephemeral port, with a cooperative host
//! pumped on its own thread standing in for the host application.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ramen_core::{
    HostHandle, HostJob, HostScheduler, LiveLinkClient, Response, ScriptEngine, ScriptFailure,
    cooperative,
};
use ramen_server::{LiveLinkServer, ServerConfig, ServerError, ServerHandle};

fn config() -> ServerConfig {
    ServerConfig::default()
        .with_port(0)
        .with_accept_poll_interval(Duration::from_millis(50))
}

/// A server backed by a cooperative host running on a helper thread.
struct Harness {
    server: ServerHandle,
    stop_host: Arc<AtomicBool>,
    host_thread: Option<thread::JoinHandle<()>>,
}

impl Harness {
    fn start<E>(engine: E) -> Self
    where
        E: ScriptEngine + Send + 'static,
    {
        Self::start_with(engine, config(), |handle| Arc::new(handle))
    }

    fn start_with<E>(
        engine: E,
        config: ServerConfig,
        wrap: impl FnOnce(HostHandle) -> Arc<dyn HostScheduler>,
    ) -> Self
    where
        E: ScriptEngine + Send + 'static,
    {
        let (handle, mut host) = cooperative(engine);
        let server = LiveLinkServer::start(config, wrap(handle)).unwrap();

        let stop_host = Arc::new(AtomicBool::new(false));
        let stop = stop_host.clone();
        let host_thread = thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if host.pump(Duration::from_millis(10)).is_none() {
                    break;
                }
            }
        });

        Self {
            server,
            stop_host,
            host_thread: Some(host_thread),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.stop();
        self.stop_host.store(true, Ordering::SeqCst);
        if let Some(thread) = self.host_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Parks every job instead of running it; tests decide when (or whether) to run them.
#[derive(Default)]
struct ParkingHost {
    jobs: Mutex<Vec<HostJob>>,
}

impl ParkingHost {
    fn parked(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    fn run_all(&self, engine: &mut dyn ScriptEngine) {
        let jobs: Vec<HostJob> = self.jobs.lock().unwrap().drain(..).collect();
        for job in jobs {
            job(engine);
        }
    }
}

impl HostScheduler for ParkingHost {
    fn schedule_once(&self, job: HostJob) {
        self.jobs.lock().unwrap().push(job);
    }
}

/// Drops every job unrun.
struct DroppingHost;

impl HostScheduler for DroppingHost {
    fn schedule_once(&self, _job: HostJob) {}
}

/// Counts scheduled jobs and how many were queued but not yet started at once.
struct TrackingHost {
    inner: HostHandle,
    scheduled: Arc<AtomicUsize>,
    outstanding: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TrackingHost {
    fn new(inner: HostHandle) -> Self {
        Self {
            inner,
            scheduled: Arc::new(AtomicUsize::new(0)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl HostScheduler for TrackingHost {
    fn schedule_once(&self, job: HostJob) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outstanding = self.outstanding.clone();
        self.inner.schedule_once(Box::new(move |engine: &mut dyn ScriptEngine| {
            outstanding.fetch_sub(1, Ordering::SeqCst);
            job(engine);
        }));
    }
}

fn python_like(script: &str) -> Result<(), ScriptFailure> {
    match script.trim().strip_prefix("raise ") {
        Some(error) => Err(ScriptFailure::new(format!(
            "Traceback (most recent call last):\n  File \"<string>\", line 1, in <module>\n{error}"
        ))),
        None => Ok(()),
    }
}

/// Send `payload` in one go, close the write side, read the whole reply.
fn exchange(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    exchange_chunked(addr, payload, payload.len().max(1))
}

fn exchange_chunked(addr: SocketAddr, payload: &[u8], chunk: usize) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(15)))
        .unwrap();
    for piece in payload.chunks(chunk) {
        stream.write_all(piece).unwrap();
    }
    stream.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).unwrap();
    reply
}

fn error_text(reply: &[u8]) -> String {
    let text = String::from_utf8(reply.to_vec()).unwrap();
    text.strip_prefix("ERROR\n")
        .unwrap_or_else(|| panic!("expected an error reply, got {text:?}"))
        .to_string()
}

#[test]
fn test_successful_script_replies_ok() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let harness = Harness::start(move |_: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), ScriptFailure>(())
    });

    let reply = exchange(harness.addr(), b"x = 1");
    assert_eq!(reply, b"OK");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_script_sees_exact_source() {
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = seen.clone();
    let harness = Harness::start(move |script: &str| {
        *sink.lock().unwrap() = script.to_string();
        Ok::<(), ScriptFailure>(())
    });

    let source = "import bpy\nprint('ラーメン')\n";
    assert_eq!(exchange(harness.addr(), source.as_bytes()), b"OK");
    assert_eq!(*seen.lock().unwrap(), source);
}

#[test]
fn test_failing_script_reports_diagnostic() {
    let harness = Harness::start(python_like);

    let reply = exchange(harness.addr(), b"raise Exception('boom')");
    let message = error_text(&reply);
    assert!(message.starts_with("Script execution failed:\n"));
    assert!(message.contains("Traceback"));
    assert!(message.contains("boom"));
}

#[test]
fn test_panicking_engine_reports_error_and_host_survives() {
    let harness = Harness::start(|script: &str| {
        if script == "explode" {
            panic!("engine exploded");
        }
        Ok::<(), ScriptFailure>(())
    });

    let message = error_text(&exchange(harness.addr(), b"explode"));
    assert!(message.contains("engine exploded"));

    assert_eq!(exchange(harness.addr(), b"fine"), b"OK");
}

#[test]
fn test_client_round_trip() {
    let harness = Harness::start(python_like);
    let client = LiveLinkClient::new(harness.addr().to_string());

    assert_eq!(client.send("x = 1").unwrap(), Response::Ok);

    let Response::Error(message) = client.send("raise ValueError('bad')").unwrap() else {
        panic!("expected an error response");
    };
    assert!(message.contains("ValueError('bad')"));
}

#[test]
fn test_payload_in_many_small_writes() {
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = seen.clone();
    let harness = Harness::start(move |script: &str| {
        sink.store(script.len(), Ordering::SeqCst);
        Ok::<(), ScriptFailure>(())
    });

    let payload = "a = 1\n".repeat(5_000);
    assert_eq!(exchange_chunked(harness.addr(), payload.as_bytes(), 7), b"OK");
    assert_eq!(seen.load(Ordering::SeqCst), payload.len());
}

#[test]
fn test_oversize_payload_rejected_without_scheduling() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let mut scheduled = None;
    let harness = Harness::start_with(
        move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ScriptFailure>(())
        },
        config(),
        |handle| {
            let tracking = TrackingHost::new(handle);
            scheduled = Some(tracking.scheduled.clone());
            Arc::new(tracking)
        },
    );
    let scheduled = scheduled.unwrap();

    let payload = vec![b'#'; 11 * 1024 * 1024];
    let message = error_text(&exchange_chunked(harness.addr(), &payload, 64 * 1024));
    assert!(message.contains("maximum size"));
    assert!(message.contains(&(10 * 1024 * 1024).to_string()));

    assert_eq!(scheduled.load(Ordering::SeqCst), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // The server is still serving afterwards.
    assert_eq!(exchange(harness.addr(), b"x = 1"), b"OK");
}

#[test]
fn test_payload_at_limit_is_accepted() {
    let harness = Harness::start_with(
        |_: &str| Ok::<(), ScriptFailure>(()),
        config().with_max_payload_bytes(8 * 1024),
        |handle| Arc::new(handle),
    );

    assert_eq!(exchange(harness.addr(), &[b'x'; 8 * 1024]), b"OK");
    let message = error_text(&exchange(harness.addr(), &[b'x'; 8 * 1024 + 1]));
    assert!(message.contains("8192"));
}

#[test]
fn test_empty_request_is_an_error() {
    let harness = Harness::start(|_: &str| Ok::<(), ScriptFailure>(()));

    let message = error_text(&exchange(harness.addr(), b""));
    assert!(message.contains("Empty payload"));
}

#[test]
fn test_invalid_utf8_closes_without_reply() {
    let mut scheduled = None;
    let harness = Harness::start_with(
        |_: &str| Ok::<(), ScriptFailure>(()),
        config(),
        |handle| {
            let tracking = TrackingHost::new(handle);
            scheduled = Some(tracking.scheduled.clone());
            Arc::new(tracking)
        },
    );

    let reply = exchange(harness.addr(), &[b'x', 0xff, 0xfe, b'y']);
    assert!(reply.is_empty());
    assert_eq!(scheduled.unwrap().load(Ordering::SeqCst), 0);

    assert_eq!(exchange(harness.addr(), b"x = 1"), b"OK");
}

#[test]
fn test_timeout_when_host_never_runs() {
    let host = Arc::new(ParkingHost::default());
    let server = LiveLinkServer::start(
        config().with_execution_timeout(Duration::from_millis(300)),
        host.clone(),
    )
    .unwrap();

    let started = Instant::now();
    let message = error_text(&exchange(server.local_addr(), b"x = 1"));
    assert!(message.contains("timed out"));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(host.parked(), 1);

    // The host finally gets to it: the engine must not run and nothing breaks.
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let mut engine = move |_: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), ScriptFailure>(())
    };
    host.run_all(&mut engine);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // Next connection is served normally (and times out the same way).
    let message = error_text(&exchange(server.local_addr(), b"y = 2"));
    assert!(message.contains("timed out"));
}

#[test]
fn test_abandoned_job_reported_without_waiting() {
    let server = LiveLinkServer::start(
        config().with_execution_timeout(Duration::from_secs(10)),
        Arc::new(DroppingHost),
    )
    .unwrap();

    let started = Instant::now();
    let message = error_text(&exchange(server.local_addr(), b"x = 1"));
    assert!(message.contains("abandoned"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_connections_are_served_one_at_a_time() {
    let mut peak = None;
    let harness = Harness::start_with(
        |_: &str| {
            thread::sleep(Duration::from_millis(100));
            Ok::<(), ScriptFailure>(())
        },
        config(),
        |handle| {
            let tracking = TrackingHost::new(handle);
            peak = Some(tracking.peak.clone());
            Arc::new(tracking)
        },
    );
    let addr = harness.addr();

    let clients: Vec<_> = (0..4)
        .map(|i| thread::spawn(move || exchange(addr, format!("n = {i}").as_bytes())))
        .collect();
    for client in clients {
        assert_eq!(client.join().unwrap(), b"OK");
    }

    assert_eq!(peak.unwrap().load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_refuses_new_connections() {
    let harness = Harness::start(|_: &str| Ok::<(), ScriptFailure>(()));
    let addr = harness.addr();
    assert_eq!(exchange(addr, b"x = 1"), b"OK");

    harness.server.stop();
    assert!(!harness.server.is_running());
    assert!(TcpStream::connect(addr).is_err());

    harness.server.stop();
}

#[test]
fn test_stop_does_not_wait_for_in_flight_execution() {
    let host = Arc::new(ParkingHost::default());
    let server = LiveLinkServer::start(
        config().with_execution_timeout(Duration::from_secs(1)),
        host.clone(),
    )
    .unwrap();
    let addr = server.local_addr();

    let client = thread::spawn(move || exchange(addr, b"x = 1"));
    let deadline = Instant::now() + Duration::from_secs(5);
    while host.parked() == 0 {
        assert!(Instant::now() < deadline, "script was never scheduled");
        thread::sleep(Duration::from_millis(5));
    }

    let started = Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(TcpStream::connect(addr).is_err());

    // The in-flight connection still gets its reply.
    let message = error_text(&client.join().unwrap());
    assert!(message.contains("timed out"));
}

#[test]
fn test_restart_on_same_port() {
    let first = Harness::start(|_: &str| Ok::<(), ScriptFailure>(()));
    let port = first.addr().port();
    assert_eq!(exchange(first.addr(), b"x = 1"), b"OK");
    first.server.stop();

    let second = Harness::start_with(
        |_: &str| Err::<(), ScriptFailure>(ScriptFailure::new("second server")),
        config().with_port(port),
        |handle| Arc::new(handle),
    );
    assert_eq!(second.addr().port(), port);

    let message = error_text(&exchange(second.addr(), b"x = 1"));
    assert!(message.contains("second server"));
}

#[test]
fn test_second_server_on_bound_port_fails() {
    let first = Harness::start(|_: &str| Ok::<(), ScriptFailure>(()));

    let result = LiveLinkServer::start(config().with_port(first.addr().port()), Arc::new(DroppingHost));
    match result {
        Err(ServerError::Bind { addr, .. }) => assert!(addr.ends_with(&first.addr().port().to_string())),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second bind on the same port succeeded"),
    }

    assert_eq!(exchange(first.addr(), b"x = 1"), b"OK");
}
