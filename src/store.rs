use log::{debug, trace};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix under which build-request key/value items live, so that item
/// changes participate in the same staleness machinery as file updates.
pub const ITEM_PREFIX: &str = "__item__/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Text(String),
    Binary(Vec<u8>),
}

impl FileData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileData::Text(s) => s.as_bytes(),
            FileData::Binary(b) => b,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FileData::Text(s) => Some(s),
            FileData::Binary(_) => None,
        }
    }
}

impl From<String> for FileData {
    fn from(s: String) -> Self {
        FileData::Text(s)
    }
}

impl From<&str> for FileData {
    fn from(s: &str) -> Self {
        FileData::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for FileData {
    fn from(b: Vec<u8>) -> Self {
        FileData::Binary(b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub data: FileData,
    pub ts: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    NotFound(String),
    NotText(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(path) => write!(f, "no such file in store: '{}'", path),
            Error::NotText(path) => write!(f, "file '{}' does not hold text data", path),
        }
    }
}

impl std::error::Error for Error {}

/// In-memory, timestamp-versioned file table shared by every pipeline
/// stage. Timestamps are a logical clock seeded from wall-clock
/// milliseconds and bumped by one whenever non-increasing, so they are
/// strictly monotonic over the store's lifetime. No content hashing:
/// the timestamp is the sole staleness signal.
#[derive(Debug, Default)]
pub struct FileStore {
    entries: BTreeMap<String, FileEntry>,
    clock: u64,
    version: u64,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ts(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.clock = if now > self.clock { now } else { self.clock + 1 };
        self.clock
    }

    /// Create or replace an entry. Writing content byte-for-byte identical
    /// to the stored entry (same text/binary variant included) is a no-op
    /// and leaves the timestamp untouched, so an unchanged tool product
    /// cannot spuriously invalidate downstream stages. A write is never
    /// partial: the whole entry is replaced or nothing is.
    pub fn put_file(&mut self, path: &str, data: impl Into<FileData>) -> &FileEntry {
        let data = data.into();

        let unchanged = self
            .entries
            .get(path)
            .map_or(false, |entry| entry.data == data);
        if unchanged {
            trace!("put {}: content unchanged, keeping timestamp", path);
        } else {
            let ts = self.next_ts();
            debug!("put {} ({} bytes, ts {})", path, data.as_bytes().len(), ts);
            self.entries.insert(
                path.to_owned(),
                FileEntry {
                    path: path.to_owned(),
                    data,
                    ts,
                },
            );
        }

        &self.entries[path]
    }

    pub fn put_item(&mut self, key: &str, value: &str) -> &FileEntry {
        self.put_file(&format!("{}{}", ITEM_PREFIX, key), value)
    }

    pub fn get_file(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn get_file_data(&self, path: &str) -> Option<&FileData> {
        self.entries.get(path).map(|entry| &entry.data)
    }

    pub fn get_file_as_string(&self, path: &str) -> Result<&str, Error> {
        let entry = self
            .entries
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;
        entry
            .data
            .as_str()
            .ok_or_else(|| Error::NotText(path.to_owned()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn timestamp_of(&self, path: &str) -> Option<u64> {
        self.entries.get(path).map(|entry| entry.ts)
    }

    pub fn current_version(&self) -> u64 {
        self.version
    }

    pub fn new_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Clear every entry and advance the store version. The logical clock
    /// is deliberately not rewound, so timestamps stay monotonic across
    /// resets.
    pub fn reset(&mut self) {
        debug!("store reset ({} entries dropped)", self.entries.len());
        self.entries.clear();
        self.new_version();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_on_identical_content() {
        let mut store = FileStore::new();
        let ts1 = store.put_file("a.c", "int x;").ts;
        let ts2 = store.put_file("a.c", "int x;").ts;
        assert_eq!(ts1, ts2);
    }

    #[test]
    fn put_restamps_on_changed_content() {
        let mut store = FileStore::new();
        let ts1 = store.put_file("a.c", "int x;").ts;
        let ts2 = store.put_file("a.c", "int y;").ts;
        assert!(ts2 > ts1);
    }

    #[test]
    fn variant_change_counts_as_changed() {
        let mut store = FileStore::new();
        let ts1 = store.put_file("a.bin", "abc").ts;
        let ts2 = store.put_file("a.bin", b"abc".to_vec()).ts;
        assert!(ts2 > ts1);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let mut store = FileStore::new();
        let mut last = 0;
        for i in 0..64 {
            let ts = store.put_file(&format!("f{}", i), "x").ts;
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn get_as_string_rejects_binary() {
        let mut store = FileStore::new();
        store.put_file("rom.bin", vec![0u8, 1, 2]);
        assert_eq!(
            store.get_file_as_string("rom.bin"),
            Err(Error::NotText("rom.bin".to_owned()))
        );
        assert_eq!(
            store.get_file_as_string("nope"),
            Err(Error::NotFound("nope".to_owned()))
        );
    }

    #[test]
    fn reset_clears_and_bumps_version() {
        let mut store = FileStore::new();
        store.put_file("a.c", "x");
        let v = store.current_version();
        store.reset();
        assert!(store.get_file("a.c").is_none());
        assert!(store.current_version() > v);
    }

    #[test]
    fn items_live_under_reserved_prefix() {
        let mut store = FileStore::new();
        store.put_item("grapefruit", "2");
        assert_eq!(
            store.get_file_as_string("__item__/grapefruit"),
            Ok("2")
        );
    }
}
