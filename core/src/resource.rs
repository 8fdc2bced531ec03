//! Resource providers
//!
//! A resource is a named document the parser can read. Identity is the
//! scheme-qualified path; two handles to the same path are the same
//! resource.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

pub trait Resource: Send + Sync + fmt::Debug {
    /// Scheme-qualified identity, e.g. `file:/srv/flows/a.xml`
    fn path(&self) -> &str;

    /// Short display name, also the name the resource is invoked by
    fn name(&self) -> String;

    fn exists(&self) -> bool;

    /// Last modification time, if known
    fn modified(&self) -> Option<DateTime<Utc>>;

    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    fn cacheable(&self) -> bool {
        true
    }
}

/// Shared resource handle compared by identity
#[derive(Clone)]
pub struct ResourceRef(Arc<dyn Resource>);

impl ResourceRef {
    pub fn new(resource: impl Resource + 'static) -> Self {
        Self(Arc::new(resource))
    }

    pub fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.0.open()?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl std::ops::Deref for ResourceRef {
    type Target = dyn Resource;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.path() == other.0.path()
    }
}

impl Eq for ResourceRef {}

impl Hash for ResourceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.path().hash(state);
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.path())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.path())
    }
}

/* ===================== File system ===================== */

#[derive(Debug, Clone)]
pub struct FileResource {
    file: PathBuf,
    path: String,
}

impl FileResource {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let path = format!("file:{}", file.display());
        Self { file, path }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl Resource for FileResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> String {
        self.file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn exists(&self) -> bool {
        self.file.is_file()
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        let modified = std::fs::metadata(&self.file).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.file)?))
    }
}

/* ===================== In memory ===================== */

#[derive(Debug)]
struct MemoryState {
    content: Option<Vec<u8>>,
    modified: DateTime<Utc>,
}

/// In-memory document. Clones share content, so a test can keep one clone
/// to edit while the engine holds another.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    name: String,
    path: String,
    cacheable: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryResource {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            path: format!("mem:{}", name),
            cacheable: true,
            state: Arc::new(Mutex::new(MemoryState {
                content: Some(content.as_bytes().to_vec()),
                modified: Utc::now(),
            })),
        }
    }

    /// Never let the parser cache entities of this resource
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the content and bump the modification time
    pub fn set_content(&self, content: &str) {
        let mut state = self.state();
        state.content = Some(content.as_bytes().to_vec());
        state.modified = next_stamp(state.modified);
    }

    /// Bump the modification time without changing content
    pub fn touch(&self) {
        let mut state = self.state();
        state.modified = next_stamp(state.modified);
    }

    pub fn delete(&self) {
        self.state().content = None;
    }
}

fn next_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}

impl Resource for MemoryResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn exists(&self) -> bool {
        self.state().content.is_some()
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        let state = self.state();
        state.content.as_ref().map(|_| state.modified)
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.state().content {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was deleted", self.path),
            )),
        }
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }
}

/* ===================== Locator ===================== */

/// Name → resource registry used for invocation by name
#[derive(Debug, Default)]
pub struct ResourceLocator {
    resources: RwLock<IndexMap<String, ResourceRef>>,
}

impl ResourceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under its name, replacing any previous one
    pub fn add(&self, resource: ResourceRef) {
        let name = resource.name();
        debug!(name = %name, resource = %resource, "Registered resource");
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, resource);
    }

    pub fn get(&self, name: &str) -> Option<ResourceRef> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Register every `*.xml` file directly under `dir`, returning how many
    /// were found
    pub fn add_dir(&self, dir: &Path) -> io::Result<usize> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "xml"))
            .collect();
        files.sort();
        for file in &files {
            self.add(ResourceRef::new(FileResource::new(file)));
        }
        debug!(dir = %dir.display(), count = files.len(), "Scanned resource directory");
        Ok(files.len())
    }
}
