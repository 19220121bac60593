use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Response, Server};

/// A stand-in for the backend's HTTP side. The status of each `/health`
/// answer is decided by `status_for(request_number, elapsed_since_start)`.
pub struct FakeBackend {
    pub port: u16,
    hits: Arc<AtomicU32>,
    started: Instant,
}

impl FakeBackend {
    pub fn start<F>(status_for: F) -> Self
    where
        F: Fn(u32, Duration) -> u16 + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("bind fake backend");
        let port = server
            .server_addr()
            .to_ip()
            .expect("fake backend listens on IP")
            .port();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let started = Instant::now();

        thread::spawn(move || {
            for request in server.incoming_requests() {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let code = status_for(n, started.elapsed());
                let _ = request.respond(
                    Response::from_string(r#"{"status":"healthy"}"#).with_status_code(code),
                );
            }
        });

        Self {
            port,
            hits,
            started,
        }
    }

    /// 503 for the first `failures` requests, 200 afterwards.
    pub fn healthy_after_failures(failures: u32) -> Self {
        Self::start(move |n, _| if n > failures { 200 } else { 503 })
    }

    pub fn healthy_after(delay: Duration) -> Self {
        Self::start(move |_, elapsed| if elapsed >= delay { 200 } else { 503 })
    }

    pub fn never_healthy() -> Self {
        Self::start(|_, _| 503)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}
