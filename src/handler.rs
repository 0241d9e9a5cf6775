//! Request handling
//!
//! One connection, one shot: read once into a fixed buffer, parse the
//! request line, answer. Observability endpoints are generated from the
//! shared statistics; everything else resolves against the document root
//! through the worker's cache, falling back to a kernel `sendfile` loop for
//! files too large to cache. Failures here never propagate beyond the
//! connection that caused them.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::sendfile::sendfile;
use parser::h1::request::RequestLine;
use parser::h1::response::Response;
use parser::status::Status;
use parser::Method;
use serde::Serialize;
use tracing::{debug, trace};

use crate::cache::{FileCache, MAX_ENTRY_BYTES};
use crate::config::Config;
use crate::mime;
use crate::stats::{SharedStats, StatsSummary, TimingDelta};

/// Size of the single-shot request read.
pub const READ_BUFFER_BYTES: usize = 8192;

// sendfile is looped in bounded chunks so a huge file cannot pin a thread in
// a single syscall.
const SENDFILE_CHUNK_BYTES: usize = 1024 * 1024;

/// Everything a thread needs to answer a request. Cloned freely: all heavy
/// state is behind `Arc`s.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Server configuration.
    pub config: Arc<Config>,
    /// The worker's file cache, absent when `CACHE_SIZE_MB=0`.
    pub cache: Option<Arc<FileCache>>,
    /// Cross-process statistics region.
    pub stats: Arc<SharedStats>,
    /// Server start time, for `/health` uptime.
    pub started: Instant,
}

/// Drives one connection to completion: gauge up, single read, respond,
/// close, gauge down. Timing is recorded for every request that produced a
/// response.
pub fn handle_request(mut stream: TcpStream, ctx: &RequestContext) {
    ctx.stats.increment_active();
    let start = Instant::now();

    let mut buf = [0u8; READ_BUFFER_BYTES];
    match stream.read(&mut buf) {
        Ok(n) if n > 0 => {
            respond(&mut stream, &buf[..n], ctx);
            drop(stream);
            ctx.stats
                .add_response_time(start.elapsed().as_millis() as u64);
        }
        Ok(_) => trace!("connection closed before sending a request"),
        Err(err) => debug!("request read failed: {err}"),
    }

    ctx.stats.decrement_active();
}

/// Answers a queue-full rejection: `503` with `Retry-After: 1`.
pub fn reject_overloaded(mut stream: TcpStream, ctx: &RequestContext) {
    finish(
        &mut stream,
        Response::error_page(Status::ServiceUnavailable),
        false,
        ctx,
    );
}

fn respond(stream: &mut TcpStream, request: &[u8], ctx: &RequestContext) {
    let line = match RequestLine::parse(request) {
        Ok(line) => line,
        Err(err) => {
            debug!("malformed request line: {err}");
            return finish(stream, Response::error_page(Status::BadRequest), false, ctx);
        }
    };

    if !matches!(line.method, Method::Get | Method::Head) {
        return finish(
            stream,
            Response::error_page(Status::NotImplemented),
            false,
            ctx,
        );
    }
    let head_only = line.method == Method::Head;

    match line.target {
        "/health" => return serve_health(stream, head_only, ctx),
        "/metrics" => return serve_metrics(stream, head_only, ctx),
        "/stats" => return serve_stats(stream, head_only, ctx),
        _ => {}
    }

    let Some(relative) = normalize_target(line.target) else {
        return finish(
            stream,
            Response::error_page(Status::Forbidden),
            head_only,
            ctx,
        );
    };

    let mut full = ctx.config.document_root.as_os_str().to_os_string();
    full.push(relative);
    deliver_file(stream, &PathBuf::from(full), head_only, ctx);
}

/// Rewrites `/` to `/index.html`, cuts the query string, and refuses any
/// path containing `..`.
fn normalize_target(target: &str) -> Option<&str> {
    let path = match target.find('?') {
        Some(pos) => &target[..pos],
        None => target,
    };
    let path = if path == "/" { "/index.html" } else { path };

    if path.contains("..") {
        return None;
    }
    Some(path)
}

fn deliver_file(stream: &mut TcpStream, path: &Path, head_only: bool, ctx: &RequestContext) {
    let key = path.to_string_lossy();

    if let Some(cache) = &ctx.cache {
        if let Some(data) = cache.get(&key) {
            return send_file_bytes(stream, path, &data, "HIT", head_only, ctx);
        }
    }

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            trace!("open {} failed: {err}", path.display());
            return finish(
                stream,
                Response::error_page(Status::NotFound),
                head_only,
                ctx,
            );
        }
    };

    let metadata = match file.metadata() {
        Ok(metadata) => metadata,
        Err(err) => {
            debug!("stat {} failed: {err}", path.display());
            return finish(
                stream,
                Response::error_page(Status::InternalServerError),
                head_only,
                ctx,
            );
        }
    };
    if metadata.is_dir() {
        return finish(
            stream,
            Response::error_page(Status::Forbidden),
            head_only,
            ctx,
        );
    }
    let size = metadata.len();

    if let Some(cache) = &ctx.cache {
        if size as usize <= MAX_ENTRY_BYTES {
            let mut data = Vec::with_capacity(size as usize);
            if let Err(err) = file.read_to_end(&mut data) {
                debug!("read {} failed: {err}", path.display());
                return finish(
                    stream,
                    Response::error_page(Status::InternalServerError),
                    head_only,
                    ctx,
                );
            }
            cache.put(&key, &data);
            return send_file_bytes(stream, path, &data, "MISS", head_only, ctx);
        }
    }

    stream_file(stream, &file, size, path, head_only, ctx);
}

fn send_file_bytes(
    stream: &mut TcpStream,
    path: &Path,
    data: &[u8],
    cache_state: &'static str,
    head_only: bool,
    ctx: &RequestContext,
) {
    let response = Response::new(Status::Ok, mime::from_path(path))
        .with_header("X-Cache", cache_state)
        .with_content_length(data.len() as u64);

    let result: io::Result<u64> = (|| {
        stream.write_all(response.head().as_bytes())?;
        if head_only {
            stream.flush()?;
            return Ok(0);
        }
        stream.write_all(data)?;
        stream.flush()?;
        Ok(data.len() as u64)
    })();

    let sent = match result {
        Ok(sent) => sent,
        Err(err) => {
            debug!("send of {} failed: {err}", path.display());
            0
        }
    };
    ctx.stats.record_response(sent, 200);
}

fn stream_file(
    stream: &mut TcpStream,
    file: &File,
    size: u64,
    path: &Path,
    head_only: bool,
    ctx: &RequestContext,
) {
    let response = Response::new(Status::Ok, mime::from_path(path))
        .with_header("X-Cache", "MISS")
        .with_content_length(size);

    if let Err(err) = stream
        .write_all(response.head().as_bytes())
        .and_then(|()| stream.flush())
    {
        debug!("send of {} headers failed: {err}", path.display());
        ctx.stats.record_response(0, 200);
        return;
    }
    if head_only {
        ctx.stats.record_response(0, 200);
        return;
    }

    match send_file_body(stream, file, size) {
        Ok(sent) => ctx.stats.record_response(sent, 200),
        Err(err) => {
            debug!("sendfile of {} failed: {err}", path.display());
            ctx.stats.record_response(0, 200);
        }
    }
}

/// Copies `len` bytes from `file` to `stream` in the kernel, continuing
/// across partial transfers and retrying on interruption. A `None` offset
/// uses and advances the file's own offset.
fn send_file_body(stream: &TcpStream, file: &File, len: u64) -> io::Result<u64> {
    let mut sent: u64 = 0;
    while sent < len {
        let chunk = (len - sent).min(SENDFILE_CHUNK_BYTES as u64) as usize;
        match sendfile(stream, file, None, chunk) {
            // The file shrank underneath us; the advertised length can no
            // longer be satisfied.
            Ok(0) => break,
            Ok(n) => sent += n as u64,
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(io::Error::from(errno)),
        }
    }

    Ok(sent)
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    uptime: u64,
    workers: usize,
}

fn serve_health(stream: &mut TcpStream, head_only: bool, ctx: &RequestContext) {
    let json = health_json(ctx);
    finish(
        stream,
        Response::new(Status::Ok, "application/json").with_body(json),
        head_only,
        ctx,
    );
}

fn health_json(ctx: &RequestContext) -> String {
    let body = HealthBody {
        status: "healthy",
        uptime: ctx.started.elapsed().as_secs(),
        workers: ctx.config.num_workers,
    };
    serde_json::to_string(&body).expect("health body serializes")
}

#[derive(Debug, Serialize)]
struct CodeCounters {
    #[serde(rename = "200")]
    ok: u64,
    #[serde(rename = "404")]
    not_found: u64,
    #[serde(rename = "500")]
    server_error: u64,
}

#[derive(Debug, Serialize)]
struct StatsBody {
    total_requests: u64,
    bytes_sent: u64,
    http_codes: CodeCounters,
    active_connections: u64,
    avg_response_time_ms: f64,
}

fn serve_stats(stream: &mut TcpStream, head_only: bool, ctx: &RequestContext) {
    let json = stats_json(&ctx.stats.summary());
    finish(
        stream,
        Response::new(Status::Ok, "application/json").with_body(json),
        head_only,
        ctx,
    );
}

fn stats_json(summary: &StatsSummary) -> String {
    let body = StatsBody {
        total_requests: summary.total_requests,
        bytes_sent: summary.bytes_sent,
        http_codes: CodeCounters {
            ok: summary.code_200,
            not_found: summary.code_404,
            server_error: summary.code_5xx,
        },
        active_connections: summary.active_connections,
        avg_response_time_ms: summary.avg_response_time_ms(),
    };
    serde_json::to_string(&body).expect("stats body serializes")
}

fn serve_metrics(stream: &mut TcpStream, head_only: bool, ctx: &RequestContext) {
    let (summary, delta) = ctx.stats.scrape();
    let body = metrics_text(&summary, &delta);
    finish(
        stream,
        Response::new(Status::Ok, "text/plain; version=0.0.4").with_body(body),
        head_only,
        ctx,
    );
}

fn metrics_text(summary: &StatsSummary, delta: &TimingDelta) -> String {
    let mut out = String::with_capacity(640);
    let _ = write!(
        out,
        "# HELP http_requests_total Total HTTP requests handled.\n\
         # TYPE http_requests_total counter\n\
         http_requests_total {}\n\
         # HELP http_bytes_sent_total Total response body bytes sent.\n\
         # TYPE http_bytes_sent_total counter\n\
         http_bytes_sent_total {}\n\
         # HELP http_requests_by_code HTTP requests by status code.\n\
         # TYPE http_requests_by_code counter\n\
         http_requests_by_code{{code=\"200\"}} {}\n\
         http_requests_by_code{{code=\"404\"}} {}\n\
         http_requests_by_code{{code=\"500\"}} {}\n\
         # HELP http_active_connections Connections currently being handled.\n\
         # TYPE http_active_connections gauge\n\
         http_active_connections {}\n\
         # HELP http_avg_response_time_ms Average response time since the last scrape.\n\
         # TYPE http_avg_response_time_ms gauge\n\
         http_avg_response_time_ms {:.3}\n",
        summary.total_requests,
        summary.bytes_sent,
        summary.code_200,
        summary.code_404,
        summary.code_5xx,
        summary.active_connections,
        delta.avg_ms(),
    );

    out
}

fn finish(stream: &mut TcpStream, response: Response, head_only: bool, ctx: &RequestContext) {
    let code = response.status().code();
    let sent = match response.send(stream, head_only) {
        Ok(sent) => sent,
        Err(err) => {
            debug!("response send failed: {err}");
            0
        }
    };
    ctx.stats.record_response(sent, code);
}
