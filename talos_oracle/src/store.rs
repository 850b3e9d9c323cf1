//! Knowledge store: the external key/value service holding learned recovery
//! facts.
//!
//! The oracle only ever asks existence questions of the store: does this
//! exact key exist, or does any key begin with this prefix. Keys encode
//! everything (exception type, call trail, handler region), so the store
//! itself stays a dumb set. Two backends are provided: an in-process set
//! for tests and embedders that preload facts, and a TCP client speaking
//! the RESP wire protocol to a running key/value server.
//!
//! Degraded replies are not errors. A missing key, an error reply, a nil
//! answer, and an empty key listing all read as "no fact recorded"; only
//! transport failures surface as [`StoreError`].

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Transport-level store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Socket-level failure.
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
    /// Reply did not parse as RESP.
    #[error("malformed store reply: {0}")]
    Protocol(String),
}

// =============================================================================
// Store Trait
// =============================================================================

/// Existence queries against the learned-fact namespace.
pub trait KnowledgeStore {
    /// Whether a fact is recorded under exactly `key`.
    fn contains_key_precise(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether any fact key begins with `prefix`.
    fn contains_key_prefix(&self, prefix: &str) -> Result<bool, StoreError>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Preloaded in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: FxHashSet<String>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Record a fact.
    pub fn insert(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }
}

impl KnowledgeStore for MemoryStore {
    fn contains_key_precise(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.keys.contains(key))
    }

    fn contains_key_prefix(&self, prefix: &str) -> Result<bool, StoreError> {
        Ok(self.keys.iter().any(|k| k.starts_with(prefix)))
    }
}

// =============================================================================
// TCP Store
// =============================================================================

/// RESP client against a running key/value server.
///
/// One connection per store, serialized behind a mutex. Exact lookups are a
/// single `EXISTS` round trip; prefix lookups use `KEYS <prefix>*` and only
/// inspect whether the listing is non-empty. Dropping the store closes the
/// connection; there is no other shutdown protocol.
pub struct TcpStore {
    conn: Mutex<BufReader<TcpStream>>,
}

impl TcpStore {
    /// Connect to `addr` (for example `"127.0.0.1:6379"`).
    pub fn connect(addr: &str) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr)?;
        Ok(TcpStore {
            conn: Mutex::new(BufReader::new(stream)),
        })
    }

    fn send(conn: &mut BufReader<TcpStream>, parts: &[&str]) -> Result<(), StoreError> {
        let mut request = format!("*{}\r\n", parts.len());
        for part in parts {
            request.push_str(&format!("${}\r\n{}\r\n", part.len(), part));
        }
        conn.get_mut().write_all(request.as_bytes())?;
        Ok(())
    }

    fn read_line(conn: &mut BufReader<TcpStream>) -> Result<String, StoreError> {
        let mut line = String::new();
        conn.read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }
}

impl KnowledgeStore for TcpStore {
    fn contains_key_precise(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        Self::send(&mut conn, &["EXISTS", key])?;
        let reply = Self::read_line(&mut conn)?;
        decode_integer_reply(&reply)
    }

    fn contains_key_prefix(&self, prefix: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let pattern = format!("{prefix}*");
        Self::send(&mut conn, &["KEYS", &pattern])?;

        let header = Self::read_line(&mut conn)?;
        let count = match header.as_bytes().first() {
            Some(b'*') => header[1..]
                .parse::<i64>()
                .map_err(|_| StoreError::Protocol(header.clone()))?,
            Some(b'-') | None => return Ok(false),
            _ => return Err(StoreError::Protocol(header)),
        };

        // Drain the listing so the connection stays usable.
        for _ in 0..count.max(0) {
            let len_line = Self::read_line(&mut conn)?;
            if len_line.starts_with('$') && len_line != "$-1" {
                Self::read_line(&mut conn)?;
            }
        }
        Ok(count > 0)
    }
}

/// Decode an integer reply. Error and nil replies read as "not found".
fn decode_integer_reply(reply: &str) -> Result<bool, StoreError> {
    match reply.as_bytes().first() {
        Some(b':') => {
            let n: i64 = reply[1..]
                .parse()
                .map_err(|_| StoreError::Protocol(reply.to_string()))?;
            Ok(n != 0)
        }
        Some(b'-') | Some(b'$') | Some(b'_') => Ok(false),
        None => Ok(false),
        _ => Err(StoreError::Protocol(reply.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_precise() {
        let mut store = MemoryStore::new();
        store.insert("talos-fuzzing:ArgumentFault:1@app.Main.run(0)");
        assert!(store
            .contains_key_precise("talos-fuzzing:ArgumentFault:1@app.Main.run(0)")
            .unwrap());
        assert!(!store
            .contains_key_precise("talos-fuzzing:ArgumentFault:other")
            .unwrap());
    }

    #[test]
    fn test_memory_store_prefix() {
        let mut store = MemoryStore::new();
        store.insert("talos-induced:app.Main.run(0):2:8:20");
        assert!(store.contains_key_prefix("talos-induced:app.Main.run(0)").unwrap());
        assert!(!store.contains_key_prefix("talos-induced:app.Other").unwrap());
    }

    #[test]
    fn test_decode_integer_reply() {
        assert!(decode_integer_reply(":1").unwrap());
        assert!(decode_integer_reply(":3").unwrap());
        assert!(!decode_integer_reply(":0").unwrap());
        assert!(!decode_integer_reply("-ERR busy").unwrap());
        assert!(!decode_integer_reply("$-1").unwrap());
        assert!(!decode_integer_reply("").unwrap());
        assert!(decode_integer_reply("+OK").is_err());
        assert!(decode_integer_reply(":abc").is_err());
    }
}
