//! Download task builder
//!
//! Turns a flattened version descriptor into the list of files a version
//! needs. The builder is pure: same descriptor, platform and features give
//! the same tasks in the same order.

mod rules;

pub use rules::{rules_allow, FeatureSet, OsName, Platform};

use crate::descriptor::{AssetIndex, Library, VersionDescriptor};
use crate::layout::StorageLayout;
use lodestone_types::{DownloadCategory, DownloadTask, StorageOptions, TaskPriority};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Repository used by libraries that name neither `downloads` nor `url`
pub const DEFAULT_LIBRARY_REPOSITORY: &str = "https://libraries.minecraft.net/";

/// Base URL of the content-addressed asset store
pub const DEFAULT_ASSET_BASE_URL: &str = "https://resources.download.minecraft.net";

/// Options that shape the task list
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub storage: StorageOptions,
    pub asset_base_url: String,
    /// Also download the client logging configuration
    pub include_log_config: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            storage: StorageOptions::default(),
            asset_base_url: DEFAULT_ASSET_BASE_URL.to_string(),
            include_log_config: true,
        }
    }
}

/// Builds download tasks from descriptors and asset indexes
#[derive(Debug, Clone)]
pub struct DownloadTaskBuilder {
    layout: StorageLayout,
    options: BuildOptions,
}

impl DownloadTaskBuilder {
    pub fn new(layout: StorageLayout, options: BuildOptions) -> Self {
        Self { layout, options }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Tasks for the client jar, asset index, libraries, natives and log
    /// config of `descriptor`, installed under `install_id`.
    ///
    /// Asset objects are not included; they come from
    /// [`build_asset_tasks`](Self::build_asset_tasks) once the index is on
    /// disk.
    pub fn build_tasks(
        &self,
        install_id: &str,
        descriptor: &VersionDescriptor,
        platform: &Platform,
        features: &FeatureSet,
    ) -> Vec<DownloadTask> {
        let mut tasks = TaskList::default();

        if let Some(client) = descriptor.downloads.as_ref().and_then(|d| d.client.as_ref()) {
            tasks.push(
                DownloadTask::new(
                    install_id,
                    client.url.clone(),
                    self.layout.version_jar(install_id),
                    DownloadCategory::Version,
                    TaskPriority::High,
                )
                .with_integrity(client.size, client.sha1.clone()),
            );
        }

        if let Some(index) = &descriptor.asset_index {
            tasks.push(
                DownloadTask::new(
                    install_id,
                    index.url.clone(),
                    self.layout.asset_index(&index.id),
                    DownloadCategory::AssetIndex,
                    TaskPriority::Normal,
                )
                .with_integrity(index.size, index.sha1.clone()),
            );
        }

        for library in &descriptor.libraries {
            if !rules_allow(library.rules.as_deref(), platform, features) {
                debug!("Skipping library {} on this platform", library.name);
                continue;
            }
            if let Some(task) = self.library_task(install_id, library) {
                tasks.push(task);
            }
            if let Some(task) = self.natives_task(install_id, library, platform) {
                tasks.push(task);
            }
        }

        if self.options.include_log_config {
            if let Some(config) = descriptor.logging.as_ref().and_then(|l| l.client.as_ref()) {
                tasks.push(
                    DownloadTask::new(
                        install_id,
                        config.file.url.clone(),
                        self.layout.log_config(&config.file.id),
                        DownloadCategory::Config,
                        TaskPriority::Low,
                    )
                    .with_integrity(config.file.size, config.file.sha1.clone()),
                );
            }
        }

        tasks.into_inner()
    }

    /// One task per distinct object in `index`, ordered by asset name
    pub fn build_asset_tasks(&self, install_id: &str, index: &AssetIndex) -> Vec<DownloadTask> {
        let base = self.options.asset_base_url.trim_end_matches('/');
        let mut tasks = TaskList::default();

        for object in index.objects.values() {
            let hash = object.hash.to_ascii_lowercase();
            if !is_sha1_hex(&hash) {
                warn!("Skipping asset with malformed hash {:?}", object.hash);
                continue;
            }
            let prefix = hash.get(..2).unwrap_or(&hash);
            let url = format!("{}/{}/{}", base, prefix, hash);
            tasks.push(
                DownloadTask::new(
                    install_id,
                    url,
                    self.layout.asset_object(&hash),
                    DownloadCategory::Assets,
                    TaskPriority::Low,
                )
                .with_integrity(Some(object.size), Some(hash.clone())),
            );
        }

        tasks.into_inner()
    }

    fn library_task(&self, install_id: &str, library: &Library) -> Option<DownloadTask> {
        let category = if is_native_coordinate(&library.name) {
            DownloadCategory::Natives
        } else {
            DownloadCategory::Libraries
        };

        if let Some(downloads) = &library.downloads {
            let artifact = downloads.artifact.as_ref()?;
            // Installer-generated libraries carry no URL
            if artifact.url.is_empty() {
                return None;
            }
            let path = artifact
                .path
                .clone()
                .or_else(|| maven_path(&library.name))?;
            return Some(
                DownloadTask::new(
                    install_id,
                    artifact.url.clone(),
                    self.library_path(install_id, &path),
                    category,
                    TaskPriority::Normal,
                )
                .with_integrity(artifact.size, artifact.sha1.clone()),
            );
        }

        let path = maven_path(&library.name)?;
        let repository = library
            .url
            .as_deref()
            .unwrap_or(DEFAULT_LIBRARY_REPOSITORY);
        let url = format!("{}/{}", repository.trim_end_matches('/'), path);
        Some(
            DownloadTask::new(
                install_id,
                url,
                self.library_path(install_id, &path),
                category,
                TaskPriority::Normal,
            )
            .with_integrity(library.size, library.sha1.clone()),
        )
    }

    fn natives_task(
        &self,
        install_id: &str,
        library: &Library,
        platform: &Platform,
    ) -> Option<DownloadTask> {
        let classifier = library
            .natives
            .as_ref()?
            .get(platform.os.as_str())?
            .replace("${arch}", platform.arch_bits());
        let artifact = library
            .downloads
            .as_ref()?
            .classifiers
            .as_ref()?
            .get(&classifier)?;

        let path = match &artifact.path {
            Some(path) => path.clone(),
            None => maven_path(&format!("{}:{}", library.name, classifier))?,
        };
        Some(
            DownloadTask::new(
                install_id,
                artifact.url.clone(),
                self.library_path(install_id, &path),
                DownloadCategory::Natives,
                TaskPriority::Normal,
            )
            .with_integrity(artifact.size, artifact.sha1.clone()),
        )
    }

    fn library_path(&self, install_id: &str, path: &str) -> PathBuf {
        self.layout.library(install_id, path, self.options.storage)
    }
}

/// Task list that drops repeated destinations, keeping the first
#[derive(Default)]
struct TaskList {
    tasks: Vec<DownloadTask>,
    destinations: HashSet<PathBuf>,
}

impl TaskList {
    fn push(&mut self, task: DownloadTask) {
        if self.destinations.insert(task.destination.clone()) {
            self.tasks.push(task);
        }
    }

    fn into_inner(self) -> Vec<DownloadTask> {
        self.tasks
    }
}

fn is_sha1_hex(hash: &str) -> bool {
    hash.len() == 40 && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_native_coordinate(name: &str) -> bool {
    name.split(':')
        .nth(3)
        .map(|classifier| classifier.starts_with("natives-"))
        .unwrap_or(false)
}

/// Repository path of a Maven coordinate
/// (`group:artifact:version[:classifier][@extension]`)
pub fn maven_path(coordinate: &str) -> Option<String> {
    let (coordinate, extension) = match coordinate.split_once('@') {
        Some((coordinate, extension)) => (coordinate, extension),
        None => (coordinate, "jar"),
    };
    let parts: Vec<&str> = coordinate.split(':').collect();
    let (group, artifact, version, classifier) = match parts.as_slice() {
        [group, artifact, version] => (*group, *artifact, *version, None),
        [group, artifact, version, classifier] => (*group, *artifact, *version, Some(*classifier)),
        _ => return None,
    };
    if group.is_empty() || artifact.is_empty() || version.is_empty() {
        return None;
    }

    let file = match classifier {
        Some(classifier) => format!("{}-{}-{}.{}", artifact, version, classifier, extension),
        None => format!("{}-{}.{}", artifact, version, extension),
    };
    Some(format!(
        "{}/{}/{}/{}",
        group.replace('.', "/"),
        artifact,
        version,
        file
    ))
}
