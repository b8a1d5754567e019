use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Content hash of an interned byte string.
pub type StringHash = u64;

/// The empty string is always interned with hash 0.
pub const EMPTY_STRING: StringHash = 0;

/// Content-addressed cache of interned byte strings.
///
/// Names, source paths, raw variable bytes and expression programs all cross
/// thread boundaries as 64-bit hashes; the bytes themselves live here. The
/// cache only grows, an interned string is never evicted.
pub struct StringCache {
    map: Mutex<HashMap<StringHash, Arc<[u8]>>>,
}

impl StringCache {
    pub fn new() -> Self {
        let empty: Arc<[u8]> = Arc::from(&b""[..]);
        Self {
            map: Mutex::new(HashMap::from([(EMPTY_STRING, empty)])),
        }
    }

    /// Compute the content hash of `bytes` without interning them.
    pub fn hash_of(bytes: &[u8]) -> StringHash {
        if bytes.is_empty() {
            return EMPTY_STRING;
        }
        let mut hasher = DefaultHasher::new();
        hasher.write(bytes);
        let h = hasher.finish();
        // hash 0 is reserved for the empty string
        if h == EMPTY_STRING {
            1
        } else {
            h
        }
    }

    /// Intern `bytes` and return their hash. Duplicate inserts are idempotent.
    pub fn add(&self, bytes: &[u8]) -> StringHash {
        let hash = Self::hash_of(bytes);
        let mut map = self.map.lock().expect("string cache lock poisoned");
        if let Entry::Vacant(e) = map.entry(hash) {
            e.insert(Arc::from(bytes));
        }
        hash
    }

    pub fn add_str(&self, s: &str) -> StringHash {
        self.add(s.as_bytes())
    }

    /// Return the interned bytes for `hash`, if any.
    pub fn get(&self, hash: StringHash) -> Option<Arc<[u8]>> {
        self.map
            .lock()
            .expect("string cache lock poisoned")
            .get(&hash)
            .cloned()
    }

    /// Return the interned bytes for `hash` as lossy UTF-8.
    pub fn get_string(&self, hash: StringHash) -> Option<String> {
        self.get(hash)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn len(&self) -> usize {
        self.map.lock().expect("string cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StringCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringCache")
            .field("len", &self.len())
            .finish()
    }
}
