use crate::error::{CacheError, IoContext, Result};
use crate::store::{BackendKind, CacheStoreStrategy, Key};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const BACKEND: BackendKind = BackendKind::File;
/// Holds the default partition. Scope names cannot start with a dot, so no scope lands here.
const DEFAULT_DIR: &str = ".default";

/// Each (scope, key) lives in its own file at `root/scope/key{suffix}`. Unscoped
/// entries live under `root/.default/`.
///
/// The file is the storage, so there is no working set to load or back up.
pub struct DiscreteFileStore {
    root: PathBuf,
    format: FileFormat,
    suffix: String,
}

impl DiscreteFileStore {
    pub fn new(root: impl Into<PathBuf>, format: FileFormat) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).backend_io(BACKEND)?;

        Ok(DiscreteFileStore {
            root,
            format,
            suffix: String::new(),
        })
    }

    /// Commonly starts with a dot, e.g. `.json`.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scope_dir(&self, scope: Option<&str>) -> Result<PathBuf> {
        match scope {
            Some(scope) => {
                check_component(scope)?;
                Ok(self.root.join(scope))
            }
            None => Ok(self.root.join(DEFAULT_DIR)),
        }
    }

    fn file_path(&self, key: &str, scope: Option<&str>) -> Result<PathBuf> {
        check_component(key)?;
        Ok(self
            .scope_dir(scope)?
            .join(format!("{key}{}", self.suffix)))
    }

    fn read(&self, path: &Path) -> Result<Option<Value>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(BACKEND, e)),
        };
        self.format.deserialize(BufReader::new(file)).map(Some)
    }

    fn write(&self, path: &Path, value: &Value) -> Result<()> {
        let directory = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(directory).backend_io(BACKEND)?;

        // Readers never observe a half-written file.
        let staging = directory.join(format!(".{}.tmp", Uuid::new_v4().hyphenated()));
        let written = File::create(&staging)
            .backend_io(BACKEND)
            .and_then(|file| self.format.serialize(BufWriter::new(file), value))
            .and_then(|()| fs::rename(&staging, path).backend_io(BACKEND));

        if written.is_err() {
            let _ = fs::remove_file(&staging);
        }
        written
    }

    fn key_of(&self, file_name: &str) -> Option<Key> {
        if file_name.starts_with('.') {
            return None;
        }
        file_name.strip_suffix(self.suffix.as_str()).map(str::to_string)
    }
}

impl CacheStoreStrategy for DiscreteFileStore {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        Ok(self.file_path(key, scope)?.is_file())
    }

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let path = self.file_path(key, scope)?;
        self.read(&path)
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        let path = self.file_path(key, scope)?;
        self.write(&path, &value)?;
        Ok(value)
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let path = self.file_path(key, scope)?;
        let Some(previous) = self.read(&path)? else {
            return Ok(None);
        };

        match fs::remove_file(&path) {
            Ok(()) => Ok(Some(previous)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(BACKEND, e)),
        }
    }

    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        let directory = self.scope_dir(scope)?;
        let mut keys = Vec::new();
        for (name, is_file) in list_directory(&directory)? {
            if let (true, Some(key)) = (is_file, self.key_of(&name)) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn scopes(&self) -> Result<Vec<String>> {
        Ok(list_directory(&self.root)?
            .into_iter()
            .filter(|(name, is_file)| !is_file && !name.starts_with('.'))
            .map(|(name, _)| name)
            .collect())
    }
}

/// Entries of a directory as (name, is_file). A missing directory is empty.
fn list_directory(directory: &Path) -> Result<Vec<(String, bool)>> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(BACKEND, e)),
    };

    let mut listed = Vec::new();
    for entry in entries {
        let entry = entry.backend_io(BACKEND)?;
        let file_type = entry.file_type().backend_io(BACKEND)?;
        match entry.file_name().into_string() {
            Ok(name) => listed.push((name, file_type.is_file())),
            Err(name) => tracing::warn!(?name, "skipping non UTF-8 cache entry"),
        }
    }
    Ok(listed)
}

fn check_component(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name == "." || name == ".." {
        "must not be a relative path component"
    } else if name.starts_with('.') {
        "must not start with a dot"
    } else if name.contains(['/', '\\', '\0']) {
        "must not contain path separators"
    } else {
        return Ok(());
    };
    Err(CacheError::invalid_key(name, reason))
}

/// How a value is laid out inside its file.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Json,
    Bincode,
    /// Raw text; only string values can be stored.
    Text,
}

impl FileFormat {
    fn serialize(&self, mut writer: BufWriter<File>, value: &Value) -> Result<()> {
        match self {
            FileFormat::Json => serde_json::to_writer(&mut writer, value).backend_io(BACKEND)?,
            FileFormat::Bincode => {
                bincode::serialize_into(&mut writer, &BinaryValue::from(value))
                    .backend_io(BACKEND)?;
            }
            FileFormat::Text => {
                let Value::String(text) = value else {
                    return Err(CacheError::InvalidValue(
                        "text files can only hold string values".to_string(),
                    ));
                };
                writer.write_all(text.as_bytes()).backend_io(BACKEND)?;
            }
        }
        writer.flush().backend_io(BACKEND)
    }

    fn deserialize(&self, mut reader: BufReader<File>) -> Result<Value> {
        match self {
            FileFormat::Json => serde_json::from_reader(reader).backend_io(BACKEND),
            FileFormat::Bincode => bincode::deserialize_from::<_, BinaryValue>(reader)
                .map(Value::from)
                .backend_io(BACKEND),
            FileFormat::Text => {
                let mut text = String::new();
                reader.read_to_string(&mut text).backend_io(BACKEND)?;
                Ok(Value::String(text))
            }
        }
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(FileFormat::Json),
            "bincode" | "binary" => Ok(FileFormat::Bincode),
            "text" | "txt" => Ok(FileFormat::Text),
            other => Err(format!("unknown file format: {other}")),
        }
    }
}

/// bincode is not self-describing, so JSON values travel as an explicitly tagged tree.
#[derive(Serialize, Deserialize)]
enum BinaryValue {
    Null,
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    String(String),
    Array(Vec<BinaryValue>),
    Object(Vec<(String, BinaryValue)>),
}

impl From<&Value> for BinaryValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => BinaryValue::Null,
            Value::Bool(b) => BinaryValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BinaryValue::Signed(i)
                } else if let Some(u) = n.as_u64() {
                    BinaryValue::Unsigned(u)
                } else {
                    BinaryValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => BinaryValue::String(s.clone()),
            Value::Array(items) => BinaryValue::Array(items.iter().map(Into::into).collect()),
            Value::Object(fields) => BinaryValue::Object(
                fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.into()))
                    .collect(),
            ),
        }
    }
}

impl From<BinaryValue> for Value {
    fn from(value: BinaryValue) -> Self {
        match value {
            BinaryValue::Null => Value::Null,
            BinaryValue::Bool(b) => Value::Bool(b),
            BinaryValue::Signed(i) => Value::Number(i.into()),
            BinaryValue::Unsigned(u) => Value::Number(u.into()),
            BinaryValue::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
            BinaryValue::String(s) => Value::String(s),
            BinaryValue::Array(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            BinaryValue::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(name, field)| (name, field.into()))
                    .collect(),
            ),
        }
    }
}
