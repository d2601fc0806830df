//! Memcached text-protocol client.
//!
//! One short-lived TCP connection per operation, bounded by connect and
//! I/O timeouts. Only `get`, `set`, `delete`, and `version` are used.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use burrow_common::error::{BurrowError, Result};

use crate::{SERVICE_NAME, SettingsCache};

/// Default bound on connecting and on each read or write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest key the protocol accepts.
pub const MAX_KEY_LENGTH: usize = 250;

/// Rejects keys the text protocol cannot carry.
///
/// # Errors
///
/// Returns `BurrowError::MalformedInput` for an empty, overlong, or
/// whitespace/control-bearing key.
pub fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.len() > MAX_KEY_LENGTH
        || key.chars().any(|c| c.is_whitespace() || c.is_control());
    if bad {
        return Err(BurrowError::MalformedInput {
            input: key.to_string(),
            message: format!("cache keys must be 1-{MAX_KEY_LENGTH} bytes without spaces"),
        });
    }
    Ok(())
}

fn unavailable(message: impl Into<String>) -> BurrowError {
    BurrowError::ExternalServiceUnavailable {
        service: SERVICE_NAME,
        message: message.into(),
    }
}

/// Client for a memcached-compatible server.
#[derive(Debug, Clone)]
pub struct MemcachedClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl MemcachedClient {
    /// Creates a client for `addr` with the default timeout.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the connect and I/O timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address of the server.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the server's version string.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::ExternalServiceUnavailable` if the server is
    /// unreachable or answers something else.
    pub fn version(&self) -> Result<String> {
        let mut conn = self.connect()?;
        conn.send(b"version\r\n")?;
        let line = conn.read_line()?;
        line.strip_prefix("VERSION ")
            .map(str::to_string)
            .ok_or_else(|| unavailable(format!("unexpected reply to version: {line}")))
    }

    fn connect(&self) -> Result<Connection> {
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)
            .map_err(|e| unavailable(format!("{}: {e}", self.addr)))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(Connection {
            reader: BufReader::new(stream),
        })
    }
}

impl SettingsCache for MemcachedClient {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let mut conn = self.connect()?;
        conn.send(format!("get {key}\r\n").as_bytes())?;

        let header = conn.read_line()?;
        if header == "END" {
            return Ok(None);
        }
        let parts: Vec<&str> = header.split_whitespace().collect();
        let len = match parts.as_slice() {
            ["VALUE", _key, _flags, len, ..] => len
                .parse::<usize>()
                .map_err(|_| unavailable(format!("bad value length in: {header}")))?,
            _ => return Err(unavailable(format!("unexpected reply to get: {header}"))),
        };

        let mut data = vec![0_u8; len + 2];
        conn.reader
            .read_exact(&mut data)
            .map_err(|e| unavailable(e.to_string()))?;
        data.truncate(len);
        let trailer = conn.read_line()?;
        if trailer != "END" {
            return Err(unavailable(format!("missing END after value: {trailer}")));
        }
        tracing::trace!(key, bytes = len, "cache hit");
        String::from_utf8(data)
            .map(Some)
            .map_err(|_| unavailable(format!("value of {key} is not UTF-8")))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let mut conn = self.connect()?;
        let mut payload = format!("set {key} 0 0 {}\r\n", value.len()).into_bytes();
        payload.extend_from_slice(value.as_bytes());
        payload.extend_from_slice(b"\r\n");
        conn.send(&payload)?;
        match conn.read_line()?.as_str() {
            "STORED" => Ok(()),
            other => Err(unavailable(format!("set {key} rejected: {other}"))),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut conn = self.connect()?;
        conn.send(format!("delete {key}\r\n").as_bytes())?;
        match conn.read_line()?.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(unavailable(format!("delete {key} rejected: {other}"))),
        }
    }

    fn ping(&self) -> Result<()> {
        self.version().map(|_| ())
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
}

impl Connection {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.reader
            .get_mut()
            .write_all(bytes)
            .map_err(|e| unavailable(e.to_string()))
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| unavailable(e.to_string()))?;
        if n == 0 {
            return Err(unavailable("connection closed"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;

    /// Minimal memcached speaking just enough of the text protocol.
    pub(crate) fn spawn_fake_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Mutex::new(HashMap::<String, Vec<u8>>::new()));
        let _handle = thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve(stream, &store);
            }
        });
        addr
    }

    fn serve(stream: TcpStream, store: &Mutex<HashMap<String, Vec<u8>>>) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut out = stream;
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap_or(0) > 0 {
            let parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            line.clear();
            let reply = match parts.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
                ["version"] => b"VERSION 1.6.21\r\n".to_vec(),
                ["get", key] => match store.lock().unwrap().get(*key) {
                    Some(v) => {
                        let mut r = format!("VALUE {key} 0 {}\r\n", v.len()).into_bytes();
                        r.extend_from_slice(v);
                        r.extend_from_slice(b"\r\nEND\r\n");
                        r
                    }
                    None => b"END\r\n".to_vec(),
                },
                ["set", key, _, _, len] => {
                    let mut data = vec![0_u8; len.parse::<usize>().unwrap() + 2];
                    reader.read_exact(&mut data).unwrap();
                    data.truncate(data.len() - 2);
                    let _ = store.lock().unwrap().insert((*key).to_string(), data);
                    b"STORED\r\n".to_vec()
                }
                ["delete", key] => {
                    if store.lock().unwrap().remove(*key).is_some() {
                        b"DELETED\r\n".to_vec()
                    } else {
                        b"NOT_FOUND\r\n".to_vec()
                    }
                }
                _ => b"ERROR\r\n".to_vec(),
            };
            out.write_all(&reply).unwrap();
        }
    }

    #[test]
    fn client_speaks_text_protocol() {
        let client = MemcachedClient::new(spawn_fake_server());
        assert_eq!(client.version().unwrap(), "1.6.21");
        assert!(client.get("c1:python").unwrap().is_none());

        client.set("c1:python", "/opt/py/bin/python3").unwrap();
        assert_eq!(
            client.get("c1:python").unwrap().as_deref(),
            Some("/opt/py/bin/python3")
        );

        client.set("c1:remap", "{\"foo\":{\"a\":\"b\"}}\r\nline2").unwrap();
        assert_eq!(
            client.get("c1:remap").unwrap().as_deref(),
            Some("{\"foo\":{\"a\":\"b\"}}\r\nline2")
        );

        assert!(client.delete("c1:python").unwrap());
        assert!(!client.delete("c1:python").unwrap());
    }

    #[test]
    fn unreachable_server_is_external_service_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = MemcachedClient::new(addr).with_timeout(Duration::from_millis(200));
        let err = client.ping().unwrap_err();
        assert_eq!(err.kind(), "external_service_unavailable");
        assert!(err.is_degradable());
    }

    #[test]
    fn invalid_keys_never_reach_the_wire() {
        let client = MemcachedClient::new(SocketAddr::from(([127, 0, 0, 1], 1)));
        let err = client.get("has space").unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
        assert!(validate_key(&"k".repeat(251)).is_err());
    }
}
