//! Index over the reference face database.
//!
//! The database is a directory with one subdirectory per enrolled person,
//! each holding that person's reference images. The index owns the mapping
//! from identities to images and back, so matcher output is turned into a
//! structured [`Identity`] in one place.

use crate::types::Identity;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("reference database not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("cannot read reference database {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    root: PathBuf,
    images: BTreeMap<Identity, Vec<PathBuf>>,
    owners: HashMap<PathBuf, Identity>,
}

impl ReferenceIndex {
    /// Scan `root` for identity directories.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self, ReferenceError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ReferenceError::Missing(root));
        }

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ReferenceError::Io { path, source }
        };

        let mut entries = BTreeMap::new();
        for entry in fs::read_dir(&root).map_err(io_err(&root))? {
            let dir = entry.map_err(io_err(&root))?.path();
            if !dir.is_dir() || is_hidden(&dir) {
                continue;
            }
            let Some(identity) = dir
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| Identity::new(n).ok())
            else {
                tracing::debug!(dir = %dir.display(), "skipping reference directory with unusable name");
                continue;
            };

            let mut images = Vec::new();
            for file in fs::read_dir(&dir).map_err(io_err(&dir))? {
                let path = file.map_err(io_err(&dir))?.path();
                if path.is_file() && is_image(&path) {
                    images.push(path);
                }
            }

            if images.is_empty() {
                tracing::debug!(%identity, "no reference images; identity skipped");
                continue;
            }
            images.sort();
            entries.insert(identity, images);
        }

        let index = Self::from_entries(root, entries);
        tracing::debug!(
            root = %index.root.display(),
            identities = index.len(),
            "reference database indexed"
        );
        Ok(index)
    }

    /// Index rooted at `root` with nothing enrolled yet, for a database that
    /// could not be scanned.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self::from_entries(root, BTreeMap::new())
    }

    /// Rescan the root, picking up identities enrolled or removed since the
    /// last scan. On error the current entries are kept.
    pub fn refresh(&mut self) -> Result<(), ReferenceError> {
        let fresh = Self::scan(self.root.clone())?;
        if fresh.images != self.images {
            tracing::info!(
                root = %self.root.display(),
                before = self.len(),
                after = fresh.len(),
                "reference database changed"
            );
        }
        *self = fresh;
        Ok(())
    }

    /// Build an index from an explicit identity → images mapping.
    pub fn from_entries(root: impl Into<PathBuf>, images: BTreeMap<Identity, Vec<PathBuf>>) -> Self {
        let owners = images
            .iter()
            .flat_map(|(id, paths)| paths.iter().map(move |p| (p.clone(), id.clone())))
            .collect();
        Self {
            root: root.into(),
            images,
            owners,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.images.keys()
    }

    pub fn images(&self, identity: &Identity) -> &[PathBuf] {
        self.images.get(identity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.images.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Map what a matcher reported (an identity label or one of the
    /// reference image paths) to an enrolled identity.
    pub fn resolve(&self, reported: &str) -> Option<Identity> {
        if let Ok(label) = Identity::new(reported) {
            if self.contains(&label) {
                return Some(label);
            }
        }

        let path = Path::new(reported);
        if let Some(owner) = self.owners.get(path) {
            return Some(owner.clone());
        }

        // A path under the root whose first component is an identity directory.
        let relative = path.strip_prefix(&self.root).ok()?;
        match relative.components().next()? {
            Component::Normal(first) => {
                let label = Identity::new(first.to_str()?).ok()?;
                self.contains(&label).then_some(label)
            }
            _ => None,
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    fn dataset() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for (person, files) in [
            ("alice", &["1.jpg", "2.PNG", "notes.txt"][..]),
            ("bob", &["1.jpeg"][..]),
            ("empty", &["readme.md"][..]),
            (".cache", &["x.jpg"][..]),
        ] {
            fs::create_dir_all(root.join(person)).unwrap();
            for f in files {
                fs::write(root.join(person).join(f), b"").unwrap();
            }
        }
        fs::write(root.join("stray.jpg"), b"").unwrap();
        dir
    }

    #[test]
    fn test_scan_indexes_identity_directories() {
        let dir = dataset();
        let index = ReferenceIndex::scan(dir.path()).unwrap();

        let names: Vec<_> = index.identities().map(Identity::as_str).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(index.images(&id("alice")).len(), 2);
        assert!(index.images(&id("empty")).is_empty());
    }

    #[test]
    fn test_scan_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = ReferenceIndex::scan(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ReferenceError::Missing(_)));
    }

    #[test]
    fn test_resolve_label_and_paths() {
        let dir = dataset();
        let index = ReferenceIndex::scan(dir.path()).unwrap();

        assert_eq!(index.resolve("alice"), Some(id("alice")));

        let image = dir.path().join("bob").join("1.jpeg");
        assert_eq!(index.resolve(image.to_str().unwrap()), Some(id("bob")));

        // Not a scanned file, but still under bob's directory.
        let other = dir.path().join("bob").join("later.jpg");
        assert_eq!(index.resolve(other.to_str().unwrap()), Some(id("bob")));

        assert_eq!(index.resolve("mallory"), None);
        assert_eq!(index.resolve("/elsewhere/alice/1.jpg"), None);
        assert_eq!(index.resolve(""), None);
    }

    #[test]
    fn test_refresh_picks_up_new_enrollment() {
        let dir = dataset();
        let mut index = ReferenceIndex::scan(dir.path()).unwrap();

        let carol = dir.path().join("carol");
        fs::create_dir_all(&carol).unwrap();
        fs::write(carol.join("1.jpg"), b"").unwrap();
        let image = carol.join("1.jpg");
        assert_eq!(index.resolve(image.to_str().unwrap()), None);

        index.refresh().unwrap();
        assert_eq!(index.resolve(image.to_str().unwrap()), Some(id("carol")));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_refresh_missing_root_keeps_entries() {
        let dir = dataset();
        let mut index = ReferenceIndex::scan(dir.path()).unwrap();
        let root = dir.path().to_path_buf();
        drop(dir);

        assert!(matches!(index.refresh(), Err(ReferenceError::Missing(_))));
        assert_eq!(index.len(), 2);
        assert_eq!(index.root(), root.as_path());
    }
}
