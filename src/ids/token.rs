use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

/// Maps token names to dense `u32` IDs starting from 1.
///
/// The empty (or all-whitespace) token is never interned and always maps
/// to 0; the drop policy for it lives in the block adapter.
pub struct TokenInterner {
    next: AtomicU32,
    shards: Vec<Shard>,
    rev: Mutex<Vec<String>>,
}

struct Shard {
    map: RwLock<HashMap<String, u32>>,
}

impl TokenInterner {
    pub fn new(shards: usize, initial_per_shard: usize) -> Self {
        let shards = if shards == 0 { 32 } else { shards };
        TokenInterner {
            next: AtomicU32::new(0),
            shards: (0..shards)
                .map(|_| Shard {
                    map: RwLock::new(HashMap::with_capacity(initial_per_shard)),
                })
                .collect(),
            rev: Mutex::new(Vec::new()),
        }
    }

    pub fn id_of(&self, token: &str) -> u32 {
        let token = token.trim();
        if token.is_empty() {
            return 0;
        }
        let shard = &self.shards[self.pick(token)];

        {
            let map = shard.map.read();
            if let Some(&id) = map.get(token) {
                return id;
            }
        }

        let id = {
            let mut map = shard.map.write();
            if let Some(&id) = map.get(token) {
                return id;
            }
            let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            map.insert(token.to_string(), id);
            id
        };

        let mut rev = self.rev.lock();
        let idx = (id - 1) as usize;
        if rev.len() <= idx {
            rev.resize(idx + 1, String::new());
        }
        rev[idx] = token.to_string();

        id
    }

    pub fn key_of(&self, id: u32) -> Option<String> {
        if id == 0 {
            return None;
        }
        let rev = self.rev.lock();
        rev.get((id - 1) as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.next.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pick(&self, token: &str) -> usize {
        let mut h = DefaultHasher::new();
        token.hash(&mut h);
        (h.finish() as usize) % self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_is_zero() {
        let ids = TokenInterner::new(4, 0);
        assert_eq!(ids.id_of(""), 0);
        assert_eq!(ids.id_of("   "), 0);
        assert_eq!(ids.len(), 0);
    }

    #[test]
    fn test_dense_ids_and_reverse() {
        let ids = TokenInterner::new(4, 0);
        let gold = ids.id_of("GLD");
        let silver = ids.id_of(" SLV "); // trimmed before interning
        assert_eq!(gold, 1);
        assert_eq!(silver, 2);
        assert_eq!(ids.id_of("GLD"), gold);
        assert_eq!(ids.key_of(silver).as_deref(), Some("SLV"));
        assert_eq!(ids.key_of(0), None);
    }
}
