//! The in-memory filesystem store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::FsError;
use crate::path;

/// What kind of entry a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
}

/// Metadata for a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: FileKind,
    /// Content length in bytes; `0` for directories.
    pub len: u64,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }
}

#[derive(Debug)]
enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, Node>),
}

impl Node {
    fn new_dir() -> Node {
        Node::Dir(BTreeMap::new())
    }
}

/// A shared handle to an in-memory filesystem.
///
/// Clones share the same store: a write through one handle is immediately
/// visible to reads through every other. The handle is `Send + Sync`; the
/// runtime relies on call-level serialization, not on this lock, for its
/// ordering guarantees.
#[derive(Clone)]
pub struct MemFs {
    root: Arc<RwLock<Node>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Create an empty filesystem containing only the root directory.
    pub fn new() -> Self {
        Self {
            root: Arc::new(RwLock::new(Node::new_dir())),
        }
    }

    /// Read a file's contents.
    pub fn read_file(&self, p: &str) -> Result<Vec<u8>, FsError> {
        let norm = path::normalize(p);
        let root = self.root.read();
        match lookup(&root, &path::segments(&norm), &norm)? {
            Node::File(data) => Ok(data.clone()),
            Node::Dir(_) => Err(FsError::IsADirectory(norm)),
        }
    }

    /// Read a file as UTF-8 text.
    pub fn read_to_string(&self, p: &str) -> Result<String, FsError> {
        let data = self.read_file(p)?;
        String::from_utf8(data).map_err(|_| FsError::Invalid(path::normalize(p)))
    }

    /// Write a file, creating or truncating it. The parent directory must
    /// already exist.
    pub fn write_file(&self, p: &str, data: impl AsRef<[u8]>) -> Result<(), FsError> {
        let norm = path::normalize(p);
        let (parent, name) = split_parent(&norm)?;
        let mut root = self.root.write();
        let children = parent_children_mut(&mut root, &parent, &norm)?;
        match children.get_mut(&name) {
            Some(Node::Dir(_)) => Err(FsError::IsADirectory(norm)),
            Some(Node::File(existing)) => {
                *existing = data.as_ref().to_vec();
                Ok(())
            }
            None => {
                children.insert(name, Node::File(data.as_ref().to_vec()));
                Ok(())
            }
        }
    }

    /// Append to a file, creating it if absent.
    pub fn append_file(&self, p: &str, data: impl AsRef<[u8]>) -> Result<(), FsError> {
        let norm = path::normalize(p);
        let (parent, name) = split_parent(&norm)?;
        let mut root = self.root.write();
        let children = parent_children_mut(&mut root, &parent, &norm)?;
        match children.get_mut(&name) {
            Some(Node::Dir(_)) => Err(FsError::IsADirectory(norm)),
            Some(Node::File(existing)) => {
                existing.extend_from_slice(data.as_ref());
                Ok(())
            }
            None => {
                children.insert(name, Node::File(data.as_ref().to_vec()));
                Ok(())
            }
        }
    }

    /// Whether the path names an existing entry.
    pub fn exists(&self, p: &str) -> bool {
        let norm = path::normalize(p);
        let root = self.root.read();
        lookup(&root, &path::segments(&norm), &norm).is_ok()
    }

    /// Metadata for an entry.
    pub fn metadata(&self, p: &str) -> Result<Metadata, FsError> {
        let norm = path::normalize(p);
        let root = self.root.read();
        match lookup(&root, &path::segments(&norm), &norm)? {
            Node::File(data) => Ok(Metadata {
                kind: FileKind::File,
                len: data.len() as u64,
            }),
            Node::Dir(_) => Ok(Metadata {
                kind: FileKind::Dir,
                len: 0,
            }),
        }
    }

    /// Whether the path names an existing file.
    pub fn is_file(&self, p: &str) -> bool {
        self.metadata(p).map(|m| m.is_file()).unwrap_or(false)
    }

    /// Whether the path names an existing directory.
    pub fn is_dir(&self, p: &str) -> bool {
        self.metadata(p).map(|m| m.is_dir()).unwrap_or(false)
    }

    /// Create a directory. The parent must exist.
    pub fn create_dir(&self, p: &str) -> Result<(), FsError> {
        let norm = path::normalize(p);
        let (parent, name) = split_parent(&norm)?;
        let mut root = self.root.write();
        let children = parent_children_mut(&mut root, &parent, &norm)?;
        if children.contains_key(&name) {
            return Err(FsError::AlreadyExists(norm));
        }
        children.insert(name, Node::new_dir());
        Ok(())
    }

    /// Create a directory and any missing parents. Existing directories
    /// along the way are fine; an existing file in the way is `ENOTDIR`.
    pub fn create_dir_all(&self, p: &str) -> Result<(), FsError> {
        let norm = path::normalize(p);
        let mut root = self.root.write();
        let mut cur = &mut *root;
        for seg in path::segments(&norm) {
            let children = match cur {
                Node::Dir(children) => children,
                Node::File(_) => return Err(FsError::NotADirectory(norm.clone())),
            };
            cur = children.entry(seg).or_insert_with(Node::new_dir);
        }
        match cur {
            Node::Dir(_) => Ok(()),
            Node::File(_) => Err(FsError::NotADirectory(norm)),
        }
    }

    /// List a directory's entry names in sorted order.
    pub fn read_dir(&self, p: &str) -> Result<Vec<String>, FsError> {
        let norm = path::normalize(p);
        let root = self.root.read();
        match lookup(&root, &path::segments(&norm), &norm)? {
            Node::Dir(children) => Ok(children.keys().cloned().collect()),
            Node::File(_) => Err(FsError::NotADirectory(norm)),
        }
    }

    /// Remove a file.
    pub fn remove_file(&self, p: &str) -> Result<(), FsError> {
        let norm = path::normalize(p);
        let (parent, name) = split_parent(&norm)?;
        let mut root = self.root.write();
        let children = parent_children_mut(&mut root, &parent, &norm)?;
        match children.get(&name) {
            Some(Node::File(_)) => {
                children.remove(&name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(FsError::IsADirectory(norm)),
            None => Err(FsError::NotFound(norm)),
        }
    }

    /// Remove an empty directory.
    pub fn remove_dir(&self, p: &str) -> Result<(), FsError> {
        let norm = path::normalize(p);
        let (parent, name) = split_parent(&norm)?;
        let mut root = self.root.write();
        let children = parent_children_mut(&mut root, &parent, &norm)?;
        match children.get(&name) {
            Some(Node::Dir(entries)) if entries.is_empty() => {
                children.remove(&name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(FsError::NotEmpty(norm)),
            Some(Node::File(_)) => Err(FsError::NotADirectory(norm)),
            None => Err(FsError::NotFound(norm)),
        }
    }

    /// Remove a directory and everything beneath it.
    pub fn remove_dir_all(&self, p: &str) -> Result<(), FsError> {
        let norm = path::normalize(p);
        let (parent, name) = split_parent(&norm)?;
        let mut root = self.root.write();
        let children = parent_children_mut(&mut root, &parent, &norm)?;
        match children.get(&name) {
            Some(Node::Dir(_)) => {
                children.remove(&name);
                Ok(())
            }
            Some(Node::File(_)) => Err(FsError::NotADirectory(norm)),
            None => Err(FsError::NotFound(norm)),
        }
    }

    /// Rename a file or directory. Overwrites an existing file target;
    /// refuses to overwrite a directory.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let from_norm = path::normalize(from);
        let to_norm = path::normalize(to);
        let (from_parent, from_name) = split_parent(&from_norm)?;
        let (to_parent, to_name) = split_parent(&to_norm)?;

        let mut root = self.root.write();

        // Validate both ends before mutating anything.
        {
            let from_children = parent_children_ref(&root, &from_parent, &from_norm)?;
            if !from_children.contains_key(&from_name) {
                return Err(FsError::NotFound(from_norm));
            }
            let to_children = parent_children_ref(&root, &to_parent, &to_norm)?;
            if let Some(Node::Dir(_)) = to_children.get(&to_name) {
                return Err(FsError::AlreadyExists(to_norm));
            }
        }

        let node = parent_children_mut(&mut root, &from_parent, &from_norm)?
            .remove(&from_name)
            .ok_or(FsError::NotFound(from_norm))?;
        parent_children_mut(&mut root, &to_parent, &to_norm)?.insert(to_name, node);
        Ok(())
    }
}

/// Split a normalized path into parent segments and final name.
fn split_parent(norm: &str) -> Result<(Vec<String>, String), FsError> {
    let mut segs = path::segments(norm);
    match segs.pop() {
        Some(name) => Ok((segs, name)),
        None => Err(FsError::Invalid(norm.to_string())),
    }
}

fn lookup<'a>(root: &'a Node, segs: &[String], full: &str) -> Result<&'a Node, FsError> {
    let mut cur = root;
    for seg in segs {
        match cur {
            Node::Dir(children) => {
                cur = children
                    .get(seg)
                    .ok_or_else(|| FsError::NotFound(full.to_string()))?;
            }
            Node::File(_) => return Err(FsError::NotADirectory(full.to_string())),
        }
    }
    Ok(cur)
}

fn parent_children_ref<'a>(
    root: &'a Node,
    parent: &[String],
    full: &str,
) -> Result<&'a BTreeMap<String, Node>, FsError> {
    match lookup(root, parent, full)? {
        Node::Dir(children) => Ok(children),
        Node::File(_) => Err(FsError::NotADirectory(full.to_string())),
    }
}

fn parent_children_mut<'a>(
    root: &'a mut Node,
    parent: &[String],
    full: &str,
) -> Result<&'a mut BTreeMap<String, Node>, FsError> {
    let mut cur = root;
    for seg in parent {
        match cur {
            Node::Dir(children) => {
                cur = children
                    .get_mut(seg)
                    .ok_or_else(|| FsError::NotFound(full.to_string()))?;
            }
            Node::File(_) => return Err(FsError::NotADirectory(full.to_string())),
        }
    }
    match cur {
        Node::Dir(children) => Ok(children),
        Node::File(_) => Err(FsError::NotADirectory(full.to_string())),
    }
}
