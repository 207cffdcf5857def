//! In-process HTTP stub used by the integration tests.
//!
//! The client reaches the stub through its `proxy` setting, so any host
//! name (including SaaS hosts) can be exercised without DNS. Requests are
//! recorded; responses come from a handler closure.
#![allow(dead_code)]

use mft_cli::config::Environment;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "secret";
pub const ONPREM_HOST: &str = "files.example.com";
pub const SAAS_HOST: &str = "acme.crushftp.com";
pub const SESSION_COOKIE: &str = "CrushAuth=1700000000_AbCdEf; currentAuth=AbCd";

/// A request as the stub received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Recorded {
    /// Origin-form path, whether the request came direct or via proxy.
    pub fn path(&self) -> &str {
        match self.target.strip_prefix("http://") {
            Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
            None => &self.target,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is not JSON")
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn form(&self) -> HashMap<String, String> {
        let text = String::from_utf8_lossy(&self.body).replace('+', " ");
        text.split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode(k), decode(v))
            })
            .collect()
    }

    pub fn multipart(&self) -> Vec<FormPart> {
        let content_type = self.header("content-type").expect("no content type");
        let boundary = content_type
            .split("boundary=")
            .nth(1)
            .expect("no multipart boundary")
            .trim_matches('"');
        parse_multipart(&self.body, boundary)
    }

    pub fn part(&self, name: &str) -> Option<FormPart> {
        self.multipart().into_iter().find(|p| p.name == name)
    }

    pub fn text_field(&self, name: &str) -> Option<String> {
        self.part(name)
            .map(|p| String::from_utf8(p.data).expect("text field is not UTF-8"))
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn find(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > hay.len() {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn parse_multipart(body: &[u8], boundary: &str) -> Vec<FormPart> {
    let delim = format!("--{boundary}").into_bytes();
    let mut parts = Vec::new();
    let mut pos = find(body, &delim, 0).expect("opening boundary") + delim.len();
    while !body[pos..].starts_with(b"--") {
        pos += 2; // CRLF after the boundary line
        let next = find(body, &delim, pos).expect("closing boundary");
        let chunk = &body[pos..next - 2];
        let header_end = find(chunk, b"\r\n\r\n", 0).expect("part headers");
        let headers = String::from_utf8_lossy(&chunk[..header_end]).into_owned();
        let data = chunk[header_end + 4..].to_vec();

        let mut part = FormPart {
            name: String::new(),
            file_name: None,
            content_type: None,
            data,
        };
        for line in headers.split("\r\n") {
            let (key, value) = match line.split_once(':') {
                Some(kv) => kv,
                None => continue,
            };
            if key.eq_ignore_ascii_case("content-disposition") {
                for attr in value.split(';').map(str::trim) {
                    if let Some(v) = attr.strip_prefix("name=") {
                        part.name = v.trim_matches('"').to_string();
                    } else if let Some(v) = attr.strip_prefix("filename=") {
                        part.file_name = Some(v.trim_matches('"').to_string());
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                part.content_type = Some(value.trim().to_string());
            }
        }
        parts.push(part);
        pos = next + delim.len();
    }
    parts
}

/// Scripted response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Reply::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Reply {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Reply::status(status, value.to_string()).header("Content-Type", "application/json")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Successful legacy login setting the session cookies.
    pub fn login() -> Self {
        Reply::ok("<loginResult><response>success</response></loginResult>")
            .header("Set-Cookie", "CrushAuth=1700000000_AbCdEf; path=/; HttpOnly")
            .header("Set-Cookie", "currentAuth=AbCd; path=/")
    }
}

pub struct StubServer {
    url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind stub listener");
        let url = format!("http://{}", listener.local_addr().expect("stub address"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                serve(stream, &handler, &log);
            }
        });
        StubServer { url, requests }
    }

    /// Answer every request with a clone of `reply`.
    pub fn always(reply: Reply) -> Self {
        StubServer::start(move |_| reply.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn logins(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.form().get("command").map(String::as_str) == Some("login"))
            .count()
    }
}

fn serve<F>(stream: TcpStream, handler: &F, log: &Arc<Mutex<Vec<Recorded>>>)
where
    F: Fn(&Recorded) -> Reply,
{
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let request = match read_request(&mut reader) {
        Some(request) => request,
        None => return,
    };
    let reply = handler(&request);
    log.lock().unwrap().push(request);

    let mut stream = stream;
    let mut head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    for (k, v) in &reply.headers {
        head.push_str(&format!("{k}: {v}\r\n"));
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&reply.body);
    let _ = stream.flush();
}

fn read_line(reader: &mut impl BufRead) -> Option<String> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

fn read_request(reader: &mut impl BufRead) -> Option<Recorded> {
    let request_line = read_line(reader)?;
    let mut words = request_line.split_whitespace();
    let method = words.next()?.to_string();
    let target = words.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader)?;
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }

    let lookup = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    let mut body = Vec::new();
    if let Some(len) = lookup("content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.resize(len, 0);
        reader.read_exact(&mut body).ok()?;
    } else if lookup("transfer-encoding").map_or(false, |v| v.eq_ignore_ascii_case("chunked")) {
        loop {
            let size_line = read_line(reader)?;
            let size = usize::from_str_radix(size_line.split(';').next()?.trim(), 16).ok()?;
            if size == 0 {
                // trailers, then the blank line
                while !read_line(reader)?.is_empty() {}
                break;
            }
            let start = body.len();
            body.resize(start + size, 0);
            reader.read_exact(&mut body[start..]).ok()?;
            read_line(reader)?;
        }
    }

    Some(Recorded {
        method,
        target,
        headers,
        body,
    })
}

/// Environment routed through the stub via the proxy setting.
pub fn environment(host: &str, stub: &StubServer) -> Environment {
    let mut env = Environment::new("http", host, 80, USERNAME, PASSWORD);
    env.server.proxy = Some(stub.url().to_string());
    env
}

/// A proxy URL nobody listens on.
pub fn dead_proxy() -> String {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

/// Accepts connections at the TCP level but never answers. Requests sent
/// through it can only end in a timeout.
pub struct SilentServer {
    _listener: TcpListener,
    url: String,
}

impl SilentServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind silent listener");
        let url = format!("http://{}", listener.local_addr().expect("silent address"));
        SilentServer {
            _listener: listener,
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Serve one request with a 200 whose body arrives in `chunks`, pausing
/// `gap` before each one. Returns the proxy URL.
pub fn trickle_server(chunks: Vec<Vec<u8>>, gap: Duration) -> String {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind trickle listener");
    let url = format!("http://{}", listener.local_addr().expect("trickle address"));
    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else { return };
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        if read_request(&mut reader).is_none() {
            return;
        }
        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut stream = stream;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"
        );
        if stream.write_all(head.as_bytes()).is_err() {
            return;
        }
        for chunk in chunks {
            thread::sleep(gap);
            if stream.write_all(&chunk).and_then(|_| stream.flush()).is_err() {
                return;
            }
        }
    });
    url
}
