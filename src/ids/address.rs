use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

/// Canonical address key: 20 fixed bytes, no heap.
pub type Addr20 = [u8; 20];

#[derive(Debug)]
pub struct BadAddress;

impl fmt::Display for BadAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad address")
    }
}

impl std::error::Error for BadAddress {}

/// Parse a "0x"-prefixed or plain 40-hex string into 20 bytes.
pub fn parse_addr20(s: &str) -> Result<Addr20, BadAddress> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if s.len() != 40 {
        return Err(BadAddress);
    }
    let mut out = [0u8; 20];
    hex::decode_to_slice(s, &mut out).map_err(|_| BadAddress)?;
    Ok(out)
}

/// Maps 20-byte addresses to dense `u64` IDs starting from 1.
///
/// Concurrent `id_of` calls on the same key always return the same ID: the
/// fast path is a shard read lock, the slow path re-checks under the write
/// lock before consuming a counter value. The reverse table is indexed by
/// `id - 1` and only grows.
pub struct AddressInterner {
    next: AtomicU64,
    shards: Vec<Shard>,
    rev: Mutex<Vec<Addr20>>,
}

struct Shard {
    map: RwLock<HashMap<Addr20, u64>>,
}

impl AddressInterner {
    pub fn new(shards: usize, initial_per_shard: usize) -> Self {
        let shards = if shards == 0 { 64 } else { shards };
        AddressInterner {
            next: AtomicU64::new(0),
            shards: (0..shards)
                .map(|_| Shard {
                    map: RwLock::new(HashMap::with_capacity(initial_per_shard)),
                })
                .collect(),
            rev: Mutex::new(Vec::new()),
        }
    }

    /// Stable ID for an address string. `None` if the address is malformed;
    /// the caller decides between dropping the transaction and using 0.
    pub fn id_of(&self, addr: &str) -> Option<u64> {
        let key = parse_addr20(addr).ok()?;
        Some(self.id_of_key(key))
    }

    /// Stable ID for an already-parsed key.
    pub fn id_of_key(&self, key: Addr20) -> u64 {
        let shard = &self.shards[self.pick(&key)];

        {
            let map = shard.map.read();
            if let Some(&id) = map.get(&key) {
                return id;
            }
        }

        let id = {
            let mut map = shard.map.write();
            if let Some(&id) = map.get(&key) {
                return id;
            }
            let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            map.insert(key, id);
            id
        };

        // Cold path: first sighting of this address. The reverse table is
        // indexed by id, so out-of-order arrival across shards is harmless.
        let mut rev = self.rev.lock();
        let idx = (id - 1) as usize;
        if rev.len() <= idx {
            rev.resize(idx + 1, Addr20::default());
        }
        rev[idx] = key;

        id
    }

    /// Reverse lookup for diagnostics. `None` if the ID was never assigned.
    pub fn key_of(&self, id: u64) -> Option<Addr20> {
        if id == 0 {
            return None;
        }
        let rev = self.rev.lock();
        rev.get((id - 1) as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.next.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pick(&self, key: &Addr20) -> usize {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        (h.finish() as usize) % self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const ADDR_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn test_parse_addr20() {
        assert!(parse_addr20(ADDR_A).is_ok());
        assert!(parse_addr20("0XAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").is_ok());
        assert!(parse_addr20("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_ok());
        assert!(parse_addr20("0xabc").is_err());
        assert!(parse_addr20("0xgggggggggggggggggggggggggggggggggggggggg").is_err());
    }

    #[test]
    fn test_ids_dense_from_one() {
        let ids = AddressInterner::new(4, 0);
        let a = ids.id_of(ADDR_A).unwrap();
        let b = ids
            .id_of("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
            .unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        // Same key, same ID, regardless of prefix or case.
        assert_eq!(
            ids.id_of("0XAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            Some(a)
        );
        assert_eq!(ids.id_of("not an address"), None);
    }

    #[test]
    fn test_reverse_lookup() {
        let ids = AddressInterner::new(4, 0);
        let id = ids.id_of(ADDR_A).unwrap();
        assert_eq!(ids.key_of(id), Some([0xaa; 20]));
        assert_eq!(ids.key_of(0), None);
        assert_eq!(ids.key_of(999), None);
    }

    #[test]
    fn test_concurrent_intern_single_winner() {
        let ids = Arc::new(AddressInterner::new(8, 0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                for i in 0..100u8 {
                    let mut key = [0u8; 20];
                    key[0] = i;
                    seen.push(ids.id_of_key(key));
                }
                seen
            }));
        }
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // Every thread must observe the same ID per key.
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(ids.len(), 100);
    }
}
