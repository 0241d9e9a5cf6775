//! Worker runtime
//!
//! Each worker process owns one accept loop, one bounded queue, one thread
//! pool, and one file cache. The accept loop classifies each connection with
//! a non-destructive peek: observability requests are answered inline so
//! they stay responsive however deep the queue is; everything else is handed
//! off without blocking, and a full queue is answered with `503` on the
//! spot. Pool threads drain the queue in FIFO order until shutdown.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::cache::FileCache;
use crate::config::Config;
use crate::handler::{self, RequestContext};
use crate::queue::{ConnectionQueue, PushError};
use crate::signals;
use crate::stats::SharedStats;

/// Bound on the classification peek, so a client that connects and then
/// stalls cannot park the accept loop.
pub const PEEK_TIMEOUT: Duration = Duration::from_millis(500);

const PEEK_BYTES: usize = 16;

// One log line per this many queue-full rejections.
const REJECT_LOG_EVERY: u64 = 100;

const PRIORITY_PREFIXES: [&[u8]; 6] = [
    b"GET /health",
    b"HEAD /health",
    b"GET /metrics",
    b"HEAD /metrics",
    b"GET /stats",
    b"HEAD /stats",
];

/// A worker process: accept loop plus thread pool around one queue.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    listener: TcpListener,
    queue: Arc<ConnectionQueue<TcpStream>>,
    ctx: RequestContext,
}

impl Worker {
    /// Assembles a worker around an inherited listener. The cache is built
    /// here so each worker pays for its own memory.
    pub fn new(
        id: usize,
        listener: TcpListener,
        config: Arc<Config>,
        stats: Arc<SharedStats>,
        started: Instant,
    ) -> Self {
        let cache = match config.cache_size_mb {
            0 => None,
            _ => Some(Arc::new(FileCache::new(config.cache_bytes()))),
        };

        Worker {
            id,
            listener,
            queue: Arc::new(ConnectionQueue::new()),
            ctx: RequestContext {
                config,
                cache,
                stats,
                started,
            },
        }
    }

    /// Runs until a termination signal: spawns the pool, produces into the
    /// queue, then drains and joins on the way out.
    pub fn run(&self) -> io::Result<()> {
        let (threads, active) = self.spawn_pool()?;
        info!(
            worker = self.id,
            threads = threads.len(),
            "worker accepting connections"
        );

        self.accept_loop();

        self.queue.shut_down();
        debug!(
            worker = self.id,
            busy = active.load(Ordering::Relaxed),
            queued = self.queue.len(),
            "draining thread pool"
        );
        for handle in threads {
            if handle.join().is_err() {
                error!(worker = self.id, "pool thread panicked");
            }
        }

        if let Some(cache) = &self.ctx.cache {
            info!(worker = self.id, "final cache statistics: {}", cache.stats());
        }
        info!(worker = self.id, "worker exited");
        Ok(())
    }

    fn spawn_pool(&self) -> io::Result<(Vec<JoinHandle<()>>, Arc<AtomicUsize>)> {
        let active = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::with_capacity(self.ctx.config.threads_per_worker);

        for n in 0..self.ctx.config.threads_per_worker {
            let queue = Arc::clone(&self.queue);
            let ctx = self.ctx.clone();
            let active = Arc::clone(&active);
            let timeout = self.ctx.config.timeout;

            let handle = thread::Builder::new()
                .name(format!("worker{}-{n}", self.id))
                .spawn(move || consume(queue, ctx, active, timeout))?;
            threads.push(handle);
        }

        Ok((threads, active))
    }

    fn accept_loop(&self) {
        let mut rejected: u64 = 0;

        loop {
            if signals::shutdown_requested() {
                break;
            }

            let stream = match self.listener.accept() {
                Ok((stream, _peer)) => stream,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(worker = self.id, "accept failed: {err}");
                    continue;
                }
            };

            // Bound the peek and any inline response; pool threads replace
            // these with the configured per-request timeouts after dequeue.
            let _ = stream.set_read_timeout(Some(PEEK_TIMEOUT));
            let _ = stream.set_write_timeout(Some(PEEK_TIMEOUT));

            let mut first_bytes = [0u8; PEEK_BYTES];
            let is_priority = match stream.peek(&mut first_bytes) {
                Ok(n) => is_priority_request(&first_bytes[..n]),
                Err(_) => false,
            };
            if is_priority {
                handler::handle_request(stream, &self.ctx);
                continue;
            }

            match self.queue.try_push(stream) {
                Ok(()) => {}
                Err(PushError::Full(stream)) => {
                    rejected += 1;
                    if rejected % REJECT_LOG_EVERY == 1 {
                        warn!(
                            worker = self.id,
                            rejected, "queue full, rejecting with 503"
                        );
                    }
                    handler::reject_overloaded(stream, &self.ctx);
                }
                Err(PushError::ShutDown(_stream)) => break,
            }
        }

        debug!(worker = self.id, "accept loop exited");
    }
}

fn consume(
    queue: Arc<ConnectionQueue<TcpStream>>,
    ctx: RequestContext,
    active: Arc<AtomicUsize>,
    timeout: Duration,
) {
    while let Some(stream) = queue.pop() {
        active.fetch_add(1, Ordering::Relaxed);

        let _ = stream.set_read_timeout(Some(timeout));
        let _ = stream.set_write_timeout(Some(timeout));
        handler::handle_request(stream, &ctx);

        active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Whether the first bytes of a request name an observability endpoint.
fn is_priority_request(first_bytes: &[u8]) -> bool {
    PRIORITY_PREFIXES
        .iter()
        .any(|prefix| first_bytes.starts_with(prefix))
}

#[cfg(test)]
mod test {
    use super::is_priority_request;

    #[test]
    fn observability_request_lines_are_priority() {
        assert!(is_priority_request(&b"GET /health HTTP/1.1\r\n"[..16]));
        assert!(is_priority_request(b"HEAD /metrics HT"));
        assert!(is_priority_request(b"GET /stats HTTP/"));
    }

    #[test]
    fn file_requests_are_not_priority() {
        assert!(!is_priority_request(b"GET / HTTP/1.1\r\n"));
        assert!(!is_priority_request(b"GET /index.html "));
        assert!(!is_priority_request(b"POST /health HTT"));
    }

    #[test]
    fn short_reads_are_not_priority() {
        assert!(!is_priority_request(b""));
        assert!(!is_priority_request(b"GET /he"));
    }
}
