// tests/common/mod.rs

//! Shared test utilities: module archive builders and a minimal in-process
//! HTTP server for exercising the URL-backed repository.

#![allow(dead_code)]

use modrepo::DESCRIPTOR_ENTRY;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::thread;

static TRACING: Once = Once::new();

/// Install the test tracing subscriber once per test binary; honors
/// `RUST_LOG` for selective output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build a tar archive from (entry name, content) pairs.
pub fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().into_inner()
}

/// Gzip-compress bytes (the packed archive form).
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Descriptor JSON for a module, optionally platform-bound.
pub fn descriptor_json(name: &str, version: &str, binding: Option<(&str, &str)>) -> Vec<u8> {
    let mut value = serde_json::json!({
        "name": name,
        "version": version,
    });
    if let Some((platform, arch)) = binding {
        value["platform"] = serde_json::json!(platform);
        value["arch"] = serde_json::json!(arch);
    }
    serde_json::to_vec(&value).unwrap()
}

/// Write a `.mar` module archive into `dir` and return its path.
///
/// The file name follows the canonical `{name}-{version}[-{platform}-{arch}]`
/// stem so initialize/reload scans pick it up naturally.
pub fn write_module_archive(
    dir: &Path,
    name: &str,
    version: &str,
    binding: Option<(&str, &str)>,
) -> PathBuf {
    init_tracing();
    let descriptor = descriptor_json(name, version, binding);
    let archive = build_archive(&[(DESCRIPTOR_ENTRY, descriptor.as_slice())]);
    let stem = match binding {
        Some((p, a)) => format!("{name}-{version}-{p}-{a}"),
        None => format!("{name}-{version}"),
    };
    let path = dir.join(format!("{stem}.mar"));
    std::fs::write(&path, archive).unwrap();
    path
}

/// Archive with extra payload entries beyond the descriptor.
pub fn write_module_archive_with_entries(
    dir: &Path,
    name: &str,
    version: &str,
    extra: &[(&str, &[u8])],
) -> PathBuf {
    init_tracing();
    let descriptor = descriptor_json(name, version, None);
    let mut entries: Vec<(&str, &[u8])> = vec![(DESCRIPTOR_ENTRY, descriptor.as_slice())];
    entries.extend_from_slice(extra);
    let archive = build_archive(&entries);
    let path = dir.join(format!("{name}-{version}.mar"));
    std::fs::write(&path, archive).unwrap();
    path
}

/// Minimal single-threaded HTTP stub serving a mutable route table.
///
/// Unknown paths get a 404. Routes can be changed between requests to
/// simulate a remote repository whose manifest evolves.
pub struct StubServer {
    addr: String,
    routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl StubServer {
    pub fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let routes: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));

        let thread_routes = routes.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                // Read until the end of the request headers
                loop {
                    match stream.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            buf.extend_from_slice(&chunk[..n]);
                            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let path = request
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();

                let body = thread_routes.lock().unwrap().get(&path).cloned();
                let response = match body {
                    Some(body) => {
                        let mut response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        response.extend_from_slice(&body);
                        response
                    }
                    None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_vec(),
                };
                let _ = stream.write_all(&response);
            }
        });

        Self { addr, routes }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set(&self, path: &str, body: Vec<u8>) {
        self.routes.lock().unwrap().insert(path.to_string(), body);
    }

    pub fn remove(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }
}
