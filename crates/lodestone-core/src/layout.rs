//! On-disk layout of a game directory
//!
//! Every destination path the builder hands out comes from here. The layout
//! is pure: it never touches the filesystem.

use lodestone_types::StorageOptions;
use std::path::{Component, Path, PathBuf};

/// Maps logical game files to paths under a game directory.
///
/// ```text
/// <root>/versions/<id>/<id>.jar
/// <root>/versions/<id>/<id>.json
/// <root>/versions/<id>/natives/
/// <root>/libraries/<maven path>            (shared)
/// <root>/versions/<id>/libraries/<path>    (isolated)
/// <root>/assets/indexes/<index>.json
/// <root>/assets/objects/<hash[0:2]>/<hash>
/// <root>/assets/log_configs/<file>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn version_dir(&self, version_id: &str) -> PathBuf {
        self.versions_dir().join(file_name(version_id))
    }

    /// Client jar of an installed version
    pub fn version_jar(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}.jar", file_name(version_id)))
    }

    /// Descriptor JSON of an installed version
    pub fn version_json(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}.json", file_name(version_id)))
    }

    /// Directory natives are extracted into before launch
    pub fn natives_dir(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id).join("natives")
    }

    /// Library root, shared or per version depending on `options`
    pub fn libraries_dir(&self, version_id: &str, options: StorageOptions) -> PathBuf {
        if options.isolate {
            self.version_dir(version_id).join("libraries")
        } else {
            self.root.join("libraries")
        }
    }

    /// Destination of a library artifact given its repository-relative path
    pub fn library(&self, version_id: &str, path: &str, options: StorageOptions) -> PathBuf {
        join_relative(self.libraries_dir(version_id, options), path)
    }

    /// Assets are content addressed and always shared between versions
    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn asset_index(&self, index_id: &str) -> PathBuf {
        self.assets_dir()
            .join("indexes")
            .join(format!("{}.json", file_name(index_id)))
    }

    pub fn asset_object(&self, hash: &str) -> PathBuf {
        let hash = file_name(hash);
        let prefix = file_name(hash.get(..2).unwrap_or(&hash));
        self.assets_dir().join("objects").join(prefix).join(hash)
    }

    pub fn log_config(&self, file_id: &str) -> PathBuf {
        join_relative(self.assets_dir().join("log_configs"), file_id)
    }
}

/// Turn an id into a single path component. Separators become `_` and
/// the names `.`/`..` are prefixed so they stay inside their directory.
fn file_name(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => format!("_{}", name),
        _ => name,
    }
}

/// Join a descriptor-supplied relative path, dropping anything that could
/// escape `base` (`..`, roots, drive prefixes).
fn join_relative(base: PathBuf, relative: &str) -> PathBuf {
    let mut path = base;
    for component in Path::new(relative).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_files_live_in_the_version_folder() {
        let layout = StorageLayout::new("/games/mc");
        assert_eq!(
            layout.version_jar("1.20.1"),
            PathBuf::from("/games/mc/versions/1.20.1/1.20.1.jar")
        );
        assert_eq!(
            layout.version_json("fabric-1.20.1"),
            PathBuf::from("/games/mc/versions/fabric-1.20.1/fabric-1.20.1.json")
        );
    }

    #[test]
    fn asset_objects_are_keyed_by_hash_prefix() {
        let layout = StorageLayout::new("/mc");
        let hash = "bdf48ef6b5d0d23bbb02e17d04865216179f510a";
        assert_eq!(
            layout.asset_object(hash),
            PathBuf::from("/mc/assets/objects/bd").join(hash)
        );
    }

    #[test]
    fn isolation_moves_libraries_under_the_version() {
        let layout = StorageLayout::new("/mc");
        let path = "org/lwjgl/lwjgl/3.3.1/lwjgl-3.3.1.jar";
        assert_eq!(
            layout.library("1.20.1", path, StorageOptions::default()),
            PathBuf::from("/mc/libraries").join(path)
        );
        assert_eq!(
            layout.library("1.20.1", path, StorageOptions { isolate: true }),
            PathBuf::from("/mc/versions/1.20.1/libraries").join(path)
        );
        // Assets stay shared either way
        assert_eq!(layout.asset_index("5"), PathBuf::from("/mc/assets/indexes/5.json"));
    }

    #[test]
    fn library_paths_cannot_escape_the_root() {
        let layout = StorageLayout::new("/mc");
        assert_eq!(
            layout.library("x", "../../etc/passwd", StorageOptions::default()),
            PathBuf::from("/mc/libraries/etc/passwd")
        );
    }

    #[test]
    fn ids_and_hashes_stay_inside_their_directory() {
        let layout = StorageLayout::new("/mc");
        let object = layout.asset_object("../../../../tmp/evil");
        assert!(object.starts_with("/mc/assets/objects"));
        assert_eq!(object.file_name().unwrap(), ".._.._.._.._tmp_evil");

        let index = layout.asset_index("../../../etc/pwn");
        assert_eq!(index, PathBuf::from("/mc/assets/indexes/.._.._.._etc_pwn.json"));

        assert_eq!(layout.version_dir(".."), PathBuf::from("/mc/versions/_.."));
        let jar = layout.version_jar("../escape");
        assert_eq!(jar, PathBuf::from("/mc/versions/.._escape/.._escape.jar"));
        for path in [object, index, jar] {
            assert!(!path.components().any(|c| c == Component::ParentDir));
        }
    }
}
