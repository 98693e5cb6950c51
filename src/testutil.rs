//! Minimal HTTP/1.1 server for tests. Stands in for search backends, careers
//! pages and job pages; each request is routed through a closure.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Form fields of a urlencoded POST body.
    pub form: HashMap<String, String>,
}

impl TestRequest {
    /// The search query, from either the query string or the form body.
    pub fn q(&self) -> &str {
        self.query
            .get("q")
            .or_else(|| self.form.get("q"))
            .map(String::as_str)
            .unwrap_or("")
    }
}

pub struct TestResponse {
    pub status: u16,
    pub body: String,
    pub location: Option<String>,
}

impl TestResponse {
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            location: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            location: None,
        }
    }

    pub fn not_found() -> Self {
        Self::status(404)
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: 302,
            body: String::new(),
            location: Some(location.into()),
        }
    }
}

/// Starts a server in a background thread. Returns the base URL
/// (e.g. "http://127.0.0.1:12345/"). The server runs until the process exits.
pub fn serve<F>(handler: F) -> String
where
    F: Fn(&TestRequest, &str) -> TestResponse + Send + Sync + 'static,
{
    serve_counted(handler).0
}

/// Like `serve`, also returning a counter of requests received.
pub fn serve_counted<F>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(&TestRequest, &str) -> TestResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let base = format!("http://127.0.0.1:{}/", port);
    let hits = Arc::new(AtomicUsize::new(0));

    let handler = Arc::new(handler);
    let server_base = base.clone();
    let server_hits = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let handler = Arc::clone(&handler);
            let base = server_base.clone();
            server_hits.fetch_add(1, Ordering::SeqCst);
            thread::spawn(move || handle(stream, handler.as_ref(), &base));
        }
    });
    (base, hits)
}

/// A URL on a port nothing listens on.
pub fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/", port)
}

/// An HTML document whose body is long enough to count as a real posting.
pub fn long_page(title: &str, body: &str) -> String {
    let filler = "We build reliable software and care about craft. ".repeat(30);
    format!(
        "<html><head><title>{}</title></head><body><h1>{}</h1><p>{}</p><p>{}</p></body></html>",
        title, title, body, filler
    )
}

/// Records WARN and above emitted on this thread until dropped.
pub struct WarningCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl WarningCapture {
    pub fn start() -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || CaptureWriter(Arc::clone(&sink)))
            .finish();
        Self {
            buffer,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn handle<F>(stream: TcpStream, handler: &F, base: &str)
where
    F: Fn(&TestRequest, &str) -> TestResponse,
{
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("GET").to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_pairs(query)),
        None => (target.clone(), HashMap::new()),
    };
    let request = TestRequest {
        method,
        path,
        query,
        form: parse_pairs(&String::from_utf8_lossy(&body)),
    };

    let response = handler(&request, base);
    let reason = match response.status {
        200 => "OK",
        302 => "Found",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let location = response
        .location
        .map(|l| format!("Location: {}\r\n", l))
        .unwrap_or_default();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
        response.status,
        reason,
        response.body.len(),
        location
    );
    let mut stream = stream;
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(response.body.as_bytes());
    let _ = stream.flush();
}

fn parse_pairs(raw: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
