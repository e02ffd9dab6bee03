//! On-disk snapshot records

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use storyshots_common::{StoryKey, DEFAULT_SNAPSHOT_EXTENSION};

/// Snapshot records, one file per story under `dir/<group>/<story><ext>`
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Directory containing snapshot records
    dir: PathBuf,

    /// File extension including the leading dot
    extension: String,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        let extension = if extension.is_empty() {
            DEFAULT_SNAPSHOT_EXTENSION.to_string()
        } else if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{}", extension)
        };
        Self {
            dir: dir.into(),
            extension,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Location of the record for `key`
    pub fn path_for(&self, key: &StoryKey) -> PathBuf {
        self.dir
            .join(encode(&key.group))
            .join(format!("{}{}", encode(&key.name), self.extension))
    }

    /// Read the record for `key`, `None` when nothing is recorded yet
    pub fn read(&self, key: &StoryKey) -> std::io::Result<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or overwrite the record for `key`
    pub fn write(&self, key: &StoryKey, content: &str) -> std::io::Result<PathBuf> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        debug!("wrote snapshot {}", path.display());
        Ok(path)
    }

    /// Every record file currently on disk
    pub fn list_records(&self) -> BTreeSet<PathBuf> {
        if !self.dir.exists() {
            return BTreeSet::new();
        }
        walkdir::WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(&self.extension))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Display name of a record path, `group/story` when it sits in the usual layout
    pub fn record_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.dir).unwrap_or(path);
        let display = relative.to_string_lossy().replace('\\', "/");
        let stem = display.strip_suffix(&self.extension).unwrap_or(&display);
        stem.split('/').map(decode).collect::<Vec<_>>().join("/")
    }
}

/// Encode one key part as a single path component.
///
/// Safe characters are kept, everything else (including `%`) becomes
/// `%XX` per UTF-8 byte, so distinct parts never share a file name.
fn encode(part: &str) -> String {
    match part {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut encoded = String::with_capacity(part.len());
    for c in part.chars() {
        if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
            encoded.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(encoded, "%{:02X}", byte);
            }
        }
    }
    encoded
}

/// Inverse of [`encode`]; unknown text passes through unchanged
fn decode(component: &str) -> String {
    if component == "%" {
        return String::new();
    }
    let bytes = component.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                decoded.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_normalized() {
        assert_eq!(SnapshotStore::new("s", "snap").extension(), ".snap");
        assert_eq!(SnapshotStore::new("s", ".snap").extension(), ".snap");
        assert_eq!(SnapshotStore::new("s", "").extension(), ".shot");
    }

    #[test]
    fn test_path_layout_and_encoding() {
        let store = SnapshotStore::new("/snaps", ".shot");
        assert_eq!(
            store.path_for(&StoryKey::new("Forms/Input", "with: label")),
            PathBuf::from("/snaps/Forms%2FInput/with%3A label.shot")
        );
        assert_eq!(
            store.path_for(&StoryKey::new("..", "")),
            PathBuf::from("/snaps/%2E%2E/%.shot")
        );
        assert_eq!(
            store.path_for(&StoryKey::new("Rates", "100%")),
            PathBuf::from("/snaps/Rates/100%25.shot")
        );
    }

    #[test]
    fn test_distinct_keys_get_distinct_records() {
        let store = SnapshotStore::new("/snaps", ".shot");
        let keys = [
            StoryKey::new("Forms/Input", "plain"),
            StoryKey::new("Forms_Input", "plain"),
            StoryKey::new("Forms%2FInput", "plain"),
            StoryKey::new("Dialog", "a:b"),
            StoryKey::new("Dialog", "a?b"),
            StoryKey::new("Dialog", "a_b"),
            StoryKey::new("Dialog", "."),
            StoryKey::new("Dialog", "%2E"),
        ];
        let paths: BTreeSet<PathBuf> = keys.iter().map(|k| store.path_for(k)).collect();
        assert_eq!(paths.len(), keys.len());

        for key in &keys {
            assert_eq!(store.record_name(&store.path_for(key)), key.to_string());
        }
    }

    #[test]
    fn test_read_write_and_list() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("__storyshots__"), ".shot");
        let key = StoryKey::new("Button", "primary");

        assert_eq!(store.read(&key).unwrap(), None);
        assert!(store.list_records().is_empty());

        let path = store.write(&key, "<button/>").unwrap();
        std::fs::write(tmp.path().join("__storyshots__/Button/notes.txt"), "x").unwrap();

        assert_eq!(store.read(&key).unwrap().as_deref(), Some("<button/>"));
        let records = store.list_records();
        assert_eq!(records.len(), 1);
        assert!(records.contains(&path));
        assert_eq!(store.record_name(&path), "Button/primary");
    }
}
