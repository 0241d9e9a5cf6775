//! End-to-end tests over a live socket.
//!
//! A single worker runs in-process on an ephemeral port (forking inside the
//! test harness would orphan the fleet), and a plain blocking client drives
//! the wire protocol. Everything shares one worker, so the whole flow lives
//! in one test: the shutdown flag is process-global.

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sluse::config::Config;
use sluse::signals;
use sluse::stats::SharedStats;
use sluse::worker::Worker;

fn request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect to worker");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set client timeout");
    stream.write_all(raw.as_bytes()).expect("send request");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .expect("read until server closes");
    response
}

fn body_of(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .expect("response has a head/body separator")
        .1
}

#[test]
fn serves_files_and_observability_endpoints_end_to_end() {
    let docroot = tempfile::tempdir().expect("create docroot");
    fs::write(docroot.path().join("index.html"), "hello").expect("write index.html");
    fs::create_dir(docroot.path().join("assets")).expect("create subdirectory");

    let config = Config::parse(&format!(
        "DOCUMENT_ROOT={}\n\
         NUM_WORKERS=1\n\
         THREADS_PER_WORKER=4\n\
         TIMEOUT_SECONDS=10\n\
         CACHE_SIZE_MB=8\n",
        docroot.path().display()
    ))
    .expect("valid test config");

    let listener = sluse::listener::bind(0).expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let stats = Arc::new(SharedStats::create().expect("map stats region"));

    let worker = Worker::new(0, listener, Arc::new(config), Arc::clone(&stats), Instant::now());
    let worker_thread = thread::spawn(move || worker.run().expect("worker run"));

    // GET / serves index.html from disk first, then from cache.
    let first = request(addr, "GET / HTTP/1.1\r\nHost: t\r\n\r\n");
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "got: {first}");
    assert!(first.contains("Content-Length: 5\r\n"));
    assert!(first.contains("Content-Type: text/html\r\n"));
    assert!(first.contains("Connection: close\r\n"));
    assert!(first.contains("X-Cache: MISS\r\n"));
    assert_eq!("hello", body_of(&first));

    let second = request(addr, "GET / HTTP/1.1\r\nHost: t\r\n\r\n");
    assert!(second.contains("X-Cache: HIT\r\n"), "got: {second}");
    assert_eq!("hello", body_of(&second));

    // Query strings are ignored for resolution.
    let with_query = request(addr, "GET /index.html?cache=no HTTP/1.1\r\n\r\n");
    assert!(with_query.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!("hello", body_of(&with_query));

    // Absent file.
    let missing = request(addr, "GET /no-such HTTP/1.1\r\n\r\n");
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(body_of(&missing).starts_with("<h1>404"));

    // Path traversal.
    let traversal = request(addr, "GET /../etc/passwd HTTP/1.1\r\n\r\n");
    assert!(traversal.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    // Directory target.
    let directory = request(addr, "GET /assets HTTP/1.1\r\n\r\n");
    assert!(directory.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    // HEAD carries the same headers as GET and no body.
    let head = request(addr, "HEAD /index.html HTTP/1.1\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));
    assert_eq!("", body_of(&head));

    // Unsupported method.
    let post = request(addr, "POST / HTTP/1.1\r\n\r\nbody");
    assert!(post.starts_with("HTTP/1.1 501 Not Implemented\r\n"));

    // Malformed request line.
    let malformed = request(addr, "nonsense\r\n\r\n");
    assert!(malformed.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    // Observability endpoints bypass the queue and serve JSON / Prometheus
    // text.
    let health = request(addr, "GET /health HTTP/1.1\r\n\r\n");
    assert!(health.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(health.contains("Content-Type: application/json\r\n"));
    assert!(body_of(&health).contains("\"status\":\"healthy\""));
    assert!(body_of(&health).contains("\"workers\":1"));

    let stats_page = request(addr, "GET /stats HTTP/1.1\r\n\r\n");
    assert!(stats_page.contains("Content-Type: application/json\r\n"));
    assert!(body_of(&stats_page).contains("\"total_requests\":"));
    assert!(body_of(&stats_page).contains("\"http_codes\":"));

    let metrics = request(addr, "GET /metrics HTTP/1.1\r\n\r\n");
    assert!(metrics.contains("Content-Type: text/plain; version=0.0.4\r\n"));
    assert!(body_of(&metrics).contains("http_requests_total "));
    assert!(body_of(&metrics).contains("http_requests_by_code{code=\"200\"} "));

    let head_health = request(addr, "HEAD /health HTTP/1.1\r\n\r\n");
    assert!(head_health.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!("", body_of(&head_health));

    // The gauge decrement lands after the client sees EOF; give it a beat.
    thread::sleep(Duration::from_millis(200));

    // The shared region saw every response from this worker.
    let summary = stats.summary();
    assert!(summary.total_requests >= 13);
    assert!(summary.bytes_sent >= 15); // three "hello" bodies at least
    assert!(summary.code_200 >= 6);
    assert!(summary.code_404 >= 1);
    assert_eq!(0, summary.active_connections);

    // Overload: pin every pool thread on a file too large to buffer, sent
    // to clients that never read, then fill the ring with requests that
    // never complete. Truly silent connections each cost the accept loop
    // its bounded classification peek, so the fillers send a partial
    // request line instead; saturation is the same.
    fs::write(
        docroot.path().join("big.bin"),
        vec![0u8; 64 * 1024 * 1024],
    )
    .expect("write big.bin");

    let mut busy_readers = Vec::new();
    for _ in 0..4 {
        let mut stream = TcpStream::connect(addr).expect("connect slow reader");
        stream
            .write_all(b"GET /big.bin HTTP/1.1\r\n\r\n")
            .expect("send request");
        // Never read: sendfile stalls once the socket buffers fill.
        busy_readers.push(stream);
    }
    thread::sleep(Duration::from_millis(500));

    let mut fillers = Vec::new();
    for _ in 0..120 {
        let mut stream = TcpStream::connect(addr).expect("connect filler");
        stream
            .write_all(b"GET /queued")
            .expect("send partial request");
        // Never completed: each occupies a ring slot (the surplus past
        // capacity is rejected on the spot).
        fillers.push(stream);
    }

    // Health when overloaded: the fast path answers without touching the
    // queue, in time bounded independently of queue depth.
    let health_start = Instant::now();
    let overloaded_health = request(addr, "GET /health HTTP/1.1\r\n\r\n");
    let health_latency = health_start.elapsed();
    assert!(
        overloaded_health.starts_with("HTTP/1.1 200 OK\r\n"),
        "got: {overloaded_health}"
    );
    assert!(overloaded_health.contains("Content-Type: application/json\r\n"));
    assert!(body_of(&overloaded_health).contains("\"status\":\"healthy\""));
    assert!(
        health_latency < Duration::from_secs(2),
        "health took {health_latency:?} under overload"
    );

    // Overload produces 503: a full ring turns the next ordinary request
    // into backpressure on the wire.
    let rejected = request(addr, "GET /index.html HTTP/1.1\r\n\r\n");
    assert!(
        rejected.starts_with("HTTP/1.1 503 Service Unavailable\r\n"),
        "got: {rejected}"
    );
    assert!(rejected.contains("Retry-After: 1\r\n"));
    assert!(body_of(&rejected).starts_with("<h1>503"));

    // Release the burst; the pinned sendfiles fail fast on reset, the
    // queued fillers drain as 400s, and the gauge returns to zero.
    drop(busy_readers);
    drop(fillers);
    let mut drained = false;
    for _ in 0..100 {
        thread::sleep(Duration::from_millis(100));
        if stats.summary().active_connections == 0 {
            drained = true;
            break;
        }
    }
    assert!(drained, "active connections did not return to zero after the burst");
    // The surplus fillers and the probe were all answered with 503.
    assert!(stats.summary().code_5xx >= 21);

    // Drain: raise the flag, then poke the accept loop awake.
    signals::request_shutdown();
    drop(TcpStream::connect(addr));
    worker_thread.join().expect("worker thread exited cleanly");
}
