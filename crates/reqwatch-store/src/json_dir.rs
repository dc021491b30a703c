//! One-JSON-file-per-record backend.
//!
//! Records live at `<dir>/<encoded id>.json`. Writes go to a `.tmp` sibling
//! first and are renamed into place, so a crash mid-write leaves either the
//! old record or the new one, never a torn file.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{KeyedStore, StoreError};

const RECORD_EXT: &str = ".json";
const TMP_EXT: &str = ".json.tmp";

/// Durable keyed store over a directory of JSON files.
#[derive(Debug)]
pub struct JsonDirStore<V> {
    dir: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> V>,
}

impl<V> JsonDirStore<V> {
    /// Open or create the store directory. Leftover `.tmp` files from an
    /// interrupted write are removed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TMP_EXT) {
                let path = entry.path();
                warn!(path = %path.display(), "removing interrupted write");
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            }
        }

        debug!(dir = %dir.display(), "opened json store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            _record: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{RECORD_EXT}", encode_id(id)))
    }
}

impl<V> KeyedStore<V> for JsonDirStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn get(&self, id: &str) -> Result<Option<V>, StoreError> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Json { path, source })
    }

    fn put(&self, id: &str, value: &V) -> Result<(), StoreError> {
        let path = self.record_path(id);
        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let _guard = self.write_lock.lock();
        atomic_write(&path, &json)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(id);
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(RECORD_EXT) else {
                continue;
            };
            match decode_id(stem) {
                Some(id) => ids.push(id),
                None => warn!(file = %name, "skipping file with undecodable name"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(data).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// File-name-safe form of a requirement ID: ASCII alphanumerics, `-` and `_`
/// pass through, every other byte becomes `%XX`.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

fn decode_id(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        n: u32,
    }

    #[test]
    fn id_encoding_roundtrips() {
        for id in ["PROJ-12", "epic/7", "../etc", "Ünïcode id", "a%b", ".hidden"] {
            let encoded = encode_id(id);
            assert!(!encoded.contains('/'));
            assert!(!encoded.contains('.'));
            assert_eq!(decode_id(&encoded).as_deref(), Some(id));
        }
    }

    #[test]
    fn decode_rejects_truncated_escape() {
        assert_eq!(decode_id("abc%4"), None);
        assert_eq!(decode_id("abc%zz"), None);
    }

    #[test]
    fn put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = JsonDirStore::<Rec>::open(tmp.path().join("recs")).unwrap();
        assert_eq!(store.get("R1").unwrap(), None);
        store.put("R1", &Rec { n: 1 }).unwrap();
        store.put("R1", &Rec { n: 2 }).unwrap();
        assert_eq!(store.get("R1").unwrap(), Some(Rec { n: 2 }));
        assert!(!store.dir().join("R1.json.tmp").exists());
    }

    #[test]
    fn records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("recs");
        {
            let store = JsonDirStore::<Rec>::open(&dir).unwrap();
            store.put("epic/7", &Rec { n: 7 }).unwrap();
            store.put("PROJ-1", &Rec { n: 1 }).unwrap();
        }
        let store = JsonDirStore::<Rec>::open(&dir).unwrap();
        assert_eq!(store.ids().unwrap(), vec!["PROJ-1", "epic/7"]);
        assert_eq!(store.get("epic/7").unwrap(), Some(Rec { n: 7 }));
    }

    #[test]
    fn delete_reports_presence() {
        let tmp = TempDir::new().unwrap();
        let store = JsonDirStore::<Rec>::open(tmp.path()).unwrap();
        store.put("R1", &Rec { n: 1 }).unwrap();
        assert!(store.delete("R1").unwrap());
        assert!(!store.delete("R1").unwrap());
        assert!(store.ids().unwrap().is_empty());
    }

    #[test]
    fn open_removes_interrupted_writes() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("R1.json.tmp"), b"{\"n\":").unwrap();
        let store = JsonDirStore::<Rec>::open(tmp.path()).unwrap();
        assert!(!tmp.path().join("R1.json.tmp").exists());
        assert!(store.ids().unwrap().is_empty());
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("R1.json"), b"not json").unwrap();
        let store = JsonDirStore::<Rec>::open(tmp.path()).unwrap();
        assert!(matches!(store.get("R1"), Err(StoreError::Json { .. })));
    }
}
