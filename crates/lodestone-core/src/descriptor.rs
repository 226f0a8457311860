//! Version descriptor model and `inheritsFrom` resolution
//!
//! Descriptors are the `versions/<id>/<id>.json` documents published by the
//! launcher meta service and by mod-loader installers. Fetching them is the
//! caller's concern; this module only models, loads from disk and flattens
//! them.

use crate::error::DownloadError;
use crate::layout::StorageLayout;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lodestone_types::{CoreLoader, JavaRequirement, ModLoaderProfile, OptimizationMod};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// A version descriptor as published, before inheritance is applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub id: String,
    #[serde(default)]
    pub inherits_from: Option<String>,
    #[serde(rename = "type", default)]
    pub version_type: Option<String>,
    #[serde(default)]
    pub release_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub java_version: Option<JavaVersion>,
    #[serde(default)]
    pub downloads: Option<VersionDownloads>,
    #[serde(default)]
    pub asset_index: Option<AssetIndexRef>,
    #[serde(default)]
    pub assets: Option<String>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    #[serde(default)]
    pub logging: Option<Logging>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersion {
    #[serde(default)]
    pub component: String,
    pub major_version: u32,
}

impl From<&JavaVersion> for JavaRequirement {
    fn from(java: &JavaVersion) -> Self {
        JavaRequirement {
            component: java.component.clone(),
            major_version: java.major_version,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionDownloads {
    #[serde(default)]
    pub client: Option<FileRef>,
    #[serde(default)]
    pub server: Option<FileRef>,
}

/// A downloadable file with optional integrity data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub total_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub downloads: Option<LibraryDownloads>,
    #[serde(default)]
    pub rules: Option<Vec<Rule>>,
    /// OS name → classifier, e.g. `"windows": "natives-windows-${arch}"`
    #[serde(default)]
    pub natives: Option<BTreeMap<String, String>>,
    /// Maven repository base for libraries without `downloads`
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(default)]
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub classifiers: Option<BTreeMap<String, Artifact>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default)]
    pub os: Option<OsRule>,
    #[serde(default)]
    pub features: Option<BTreeMap<String, bool>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRule {
    #[serde(default)]
    pub name: Option<String>,
    /// Regular expression matched against the OS version string
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default)]
    pub client: Option<LoggingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub argument: Option<String>,
    pub file: LogFile,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Contents of an asset index file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetIndex {
    #[serde(default)]
    pub objects: BTreeMap<String, AssetObject>,
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub map_to_resources: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

/// Source of version descriptors by id
#[async_trait]
pub trait VersionResolver: Send + Sync {
    async fn load(&self, version_id: &str) -> Result<VersionDescriptor, DownloadError>;
}

/// Reads descriptors from `versions/<id>/<id>.json` under a game directory
#[derive(Debug, Clone)]
pub struct LocalVersionResolver {
    layout: StorageLayout,
}

impl LocalVersionResolver {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl VersionResolver for LocalVersionResolver {
    async fn load(&self, version_id: &str) -> Result<VersionDescriptor, DownloadError> {
        let path = self.layout.version_json(version_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::VersionNotFound(version_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded descriptor {} from {:?}", version_id, path);
        Ok(serde_json::from_str(&text)?)
    }
}

/// Descriptors supplied up front, e.g. already fetched from the meta service
#[derive(Debug, Clone, Default)]
pub struct StaticVersionResolver {
    descriptors: HashMap<String, VersionDescriptor>,
}

impl StaticVersionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, descriptor: VersionDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: VersionDescriptor) {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }
}

#[async_trait]
impl VersionResolver for StaticVersionResolver {
    async fn load(&self, version_id: &str) -> Result<VersionDescriptor, DownloadError> {
        self.descriptors
            .get(version_id)
            .cloned()
            .ok_or_else(|| DownloadError::VersionNotFound(version_id.to_string()))
    }
}

/// A descriptor with its whole `inheritsFrom` chain applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVersion {
    pub descriptor: VersionDescriptor,
    /// Ids from the requested version up to the root
    pub chain: Vec<String>,
}

impl ResolvedVersion {
    /// Root of the chain, if the version inherits from anything
    pub fn root(&self) -> Option<&str> {
        if self.chain.len() > 1 {
            self.chain.last().map(String::as_str)
        } else {
            None
        }
    }
}

/// Load `version_id` and fold its parents into it.
///
/// Child values win; the parent fills whatever the child leaves out.
/// Libraries are the child's followed by parent libraries the child does
/// not already provide (same group, artifact and classifier).
pub async fn resolve_version(
    resolver: &dyn VersionResolver,
    version_id: &str,
) -> Result<ResolvedVersion, DownloadError> {
    let mut merged = resolver.load(version_id).await?;
    let mut chain = vec![merged.id.clone()];
    let mut seen: HashSet<String> = chain.iter().cloned().collect();

    while let Some(parent_id) = merged.inherits_from.take() {
        if !seen.insert(parent_id.clone()) {
            return Err(DownloadError::InheritanceCycle(parent_id));
        }
        let parent = resolver.load(&parent_id).await?;
        debug!("Version {} inherits from {}", merged.id, parent_id);
        chain.push(parent_id);
        merged = merge(merged, parent);
    }

    Ok(ResolvedVersion {
        descriptor: merged,
        chain,
    })
}

fn merge(child: VersionDescriptor, parent: VersionDescriptor) -> VersionDescriptor {
    let provided: HashSet<String> = child
        .libraries
        .iter()
        .map(|lib| library_key(&lib.name))
        .collect();

    let mut libraries = child.libraries;
    libraries.extend(
        parent
            .libraries
            .into_iter()
            .filter(|lib| !provided.contains(&library_key(&lib.name))),
    );

    VersionDescriptor {
        id: child.id,
        inherits_from: parent.inherits_from,
        version_type: child.version_type.or(parent.version_type),
        release_time: child.release_time.or(parent.release_time),
        main_class: child.main_class.or(parent.main_class),
        java_version: child.java_version.or(parent.java_version),
        downloads: child.downloads.or(parent.downloads),
        asset_index: child.asset_index.or(parent.asset_index),
        assets: child.assets.or(parent.assets),
        libraries,
        logging: child.logging.or(parent.logging),
    }
}

/// `group:artifact[:classifier]`, i.e. the coordinate without its version
fn library_key(name: &str) -> String {
    let name = name.split('@').next().unwrap_or(name);
    let parts: Vec<&str> = name.split(':').collect();
    match parts.as_slice() {
        [group, artifact, _version, classifier, ..] => {
            format!("{}:{}:{}", group, artifact, classifier)
        }
        [group, artifact, ..] => format!("{}:{}", group, artifact),
        _ => name.to_string(),
    }
}

/// Derive the mod-loader tag from a flattened descriptor
pub fn detect_loader(descriptor: &VersionDescriptor) -> ModLoaderProfile {
    let has_library = |prefix: &str| {
        descriptor
            .libraries
            .iter()
            .any(|lib| lib.name.starts_with(prefix))
    };
    let main_class = descriptor.main_class.as_deref().unwrap_or_default();

    let loader = if has_library("net.neoforged") {
        CoreLoader::NeoForge
    } else if has_library("net.minecraftforge:forge") || has_library("net.minecraftforge:fmlloader") {
        CoreLoader::Forge
    } else if main_class.contains("quilt") || has_library("org.quiltmc:quilt-loader") {
        CoreLoader::Quilt
    } else if main_class.contains("fabric") || has_library("net.fabricmc:fabric-loader") {
        CoreLoader::Fabric
    } else if has_library("com.mumfrey:liteloader") {
        CoreLoader::LiteLoader
    } else {
        CoreLoader::None
    };

    let mut profile = ModLoaderProfile::new(loader);
    if has_library("optifine:OptiFine") {
        profile = profile.with(OptimizationMod::OptiFine);
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> VersionDescriptor {
        serde_json::from_value(value).unwrap()
    }

    fn vanilla() -> VersionDescriptor {
        descriptor(json!({
            "id": "1.20.1",
            "type": "release",
            "mainClass": "net.minecraft.client.main.Main",
            "releaseTime": "2023-06-12T13:25:51+00:00",
            "javaVersion": { "component": "java-runtime-gamma", "majorVersion": 17 },
            "assetIndex": { "id": "5", "url": "https://meta.test/5.json", "sha1": "aa", "size": 10 },
            "downloads": { "client": { "url": "https://meta.test/client.jar", "sha1": "bb", "size": 20 } },
            "libraries": [
                { "name": "org.ow2.asm:asm:9.3" },
                { "name": "com.mojang:brigadier:1.1.8" }
            ]
        }))
    }

    fn fabric() -> VersionDescriptor {
        descriptor(json!({
            "id": "fabric-loader-0.14.21-1.20.1",
            "inheritsFrom": "1.20.1",
            "mainClass": "net.fabricmc.loader.impl.launch.knot.KnotClient",
            "libraries": [
                { "name": "org.ow2.asm:asm:9.5", "url": "https://maven.fabricmc.net/" },
                { "name": "net.fabricmc:fabric-loader:0.14.21", "url": "https://maven.fabricmc.net/" }
            ]
        }))
    }

    #[tokio::test]
    async fn child_overrides_and_parent_fills_gaps() {
        let resolver = StaticVersionResolver::new().with(vanilla()).with(fabric());
        let resolved = resolve_version(&resolver, "fabric-loader-0.14.21-1.20.1")
            .await
            .unwrap();

        let d = &resolved.descriptor;
        assert_eq!(d.id, "fabric-loader-0.14.21-1.20.1");
        assert_eq!(d.main_class.as_deref(), Some("net.fabricmc.loader.impl.launch.knot.KnotClient"));
        assert_eq!(d.asset_index.as_ref().map(|a| a.id.as_str()), Some("5"));
        assert_eq!(d.java_version.as_ref().map(|j| j.major_version), Some(17));

        let names: Vec<&str> = d.libraries.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "org.ow2.asm:asm:9.5",
                "net.fabricmc:fabric-loader:0.14.21",
                "com.mojang:brigadier:1.1.8"
            ]
        );
        assert_eq!(resolved.root(), Some("1.20.1"));
        assert_eq!(detect_loader(d).loader, CoreLoader::Fabric);
    }

    #[tokio::test]
    async fn inheritance_cycles_are_rejected() {
        let mut a = VersionDescriptor::default();
        a.id = "a".into();
        a.inherits_from = Some("b".into());
        let mut b = VersionDescriptor::default();
        b.id = "b".into();
        b.inherits_from = Some("a".into());

        let resolver = StaticVersionResolver::new().with(a).with(b);
        let err = resolve_version(&resolver, "a").await.unwrap_err();
        assert!(matches!(err, DownloadError::InheritanceCycle(id) if id == "a"));
    }

    #[tokio::test]
    async fn missing_parent_is_a_resolution_error() {
        let resolver = StaticVersionResolver::new().with(fabric());
        let err = resolve_version(&resolver, "fabric-loader-0.14.21-1.20.1")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::VersionNotFound(id) if id == "1.20.1"));
    }

    #[tokio::test]
    async fn local_resolver_reads_version_json() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let path = layout.version_json("1.20.1");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, serde_json::to_vec(&vanilla()).unwrap())
            .await
            .unwrap();

        let resolver = LocalVersionResolver::new(layout);
        let loaded = resolver.load("1.20.1").await.unwrap();
        assert_eq!(loaded, vanilla());
        assert!(matches!(
            resolver.load("nope").await,
            Err(DownloadError::VersionNotFound(_))
        ));
    }

    #[test]
    fn library_keys_ignore_versions() {
        assert_eq!(library_key("org.lwjgl:lwjgl:3.3.1"), "org.lwjgl:lwjgl");
        assert_eq!(
            library_key("org.lwjgl:lwjgl:3.3.1:natives-linux"),
            "org.lwjgl:lwjgl:natives-linux"
        );
    }
}
