// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository index cache.

A Debian repository is a collection of files holding packages and other
support primitives. See <https://wiki.debian.org/DebianRepository/Format>
for the canonical definition of a Debian repository.

[Repository] binds an [ArchiveBackend] holding `.deb` files to the generated
files describing them. It moves through three states:

1. [RepositoryState::Empty] after construction.
2. [RepositoryState::Indexed] after [Repository::populate()] has scanned the
   backend into a [PackageSet].
3. [RepositoryState::Ready] after [Repository::generate_files()] has produced
   `Packages` documents and a `Release` manifest.

Both transitions can be repeated at any time and always replace their output
wholesale. Generated output lives in an immutable [Snapshot] which is swapped
in as a single [Arc], so readers see either the previous snapshot or the new
one and never a mix. A failed step leaves the previous output in place.
*/

use {
    crate::{
        deb::{ArchiveParser, DebArchiveParser},
        error::{RepositoryError, Result},
        package_record::{extract_record, pool_filename, PackageRecord, DEFAULT_POOL_PREFIX},
        repository::{
            backend::{ArchiveBackend, ArchiveRef},
            index::{build_packages_index, packages_index_path, GeneratedDocument},
            release::{build_release, ReleaseConfig},
        },
        resolver::{DuplicatePackage, PackageSet},
    },
    bytes::Bytes,
    chrono::{DateTime, Utc},
    futures::StreamExt,
    log::{debug, info, warn},
    serde::Deserialize,
    std::{
        collections::{BTreeMap, BTreeSet},
        sync::{Arc, PoisonError, RwLock},
        time::Duration,
    },
};

pub mod backend;
pub mod filesystem;
pub mod index;
pub mod release;

fn default_pool_prefix() -> String {
    DEFAULT_POOL_PREFIX.to_string()
}

fn default_max_parallel_io() -> usize {
    num_cpus::get()
}

fn default_read_timeout_secs() -> u64 {
    60
}

/// Settings for a [Repository].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Metadata written to the `Release` file.
    #[serde(default)]
    pub release: ReleaseConfig,

    /// Prefix of the `Filename` of every package. Archives are served beneath it.
    #[serde(default = "default_pool_prefix")]
    pub pool_prefix: String,

    /// Maximum number of archives read concurrently.
    #[serde(default = "default_max_parallel_io")]
    pub max_parallel_io: usize,

    /// Seconds a single archive may take to open and read. 0 disables the limit.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            release: ReleaseConfig::default(),
            pool_prefix: default_pool_prefix(),
            max_parallel_io: default_max_parallel_io(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

/// Lifecycle state of a [Repository].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RepositoryState {
    /// Nothing has been indexed.
    Empty,
    /// Packages are indexed but no files have been generated.
    Indexed,
    /// Generated files are available.
    Ready,
}

impl RepositoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Indexed => "indexed",
            Self::Ready => "ready",
        }
    }
}

/// An archive that was left out of the index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedArchive {
    pub path: String,
    pub error: String,
}

/// Outcome of [Repository::populate()].
#[derive(Clone, Debug, Default)]
pub struct PopulateReport {
    /// Number of archives the backend listed.
    pub archives: usize,
    /// Number of records admitted to the package set.
    pub indexed: usize,
    /// Archives that could not be read or parsed.
    pub skipped: Vec<SkippedArchive>,
    /// Records dropped because an earlier archive had the same package, architecture and version.
    pub duplicates: Vec<DuplicatePackage>,
}

/// An architecture whose `Packages` document could not be generated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailedArchitecture {
    pub architecture: String,
    pub error: String,
}

/// Outcome of [Repository::generate_files()].
#[derive(Clone, Debug)]
pub struct GenerateReport {
    /// Date written to the manifest.
    pub date: DateTime<Utc>,
    /// Architectures with a published document.
    pub architectures: Vec<String>,
    /// Architectures left out of the snapshot.
    pub failed: Vec<FailedArchitecture>,
}

/// Outcome of [Repository::rebuild()].
#[derive(Clone, Debug)]
pub struct RebuildReport {
    pub populate: PopulateReport,
    pub generate: GenerateReport,
}

/// A complete, immutable set of generated files.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Distribution the files are published under.
    pub suite: String,
    /// Generation time recorded in the manifest.
    pub date: DateTime<Utc>,
    /// `Packages` documents keyed by path relative to the distribution directory.
    pub documents: BTreeMap<String, GeneratedDocument>,
    /// Content of the `Release` file.
    pub manifest: Bytes,
    /// Architectures having a document.
    pub architectures: BTreeSet<String>,
}

impl Snapshot {
    /// Look up a generated document by its path relative to the distribution directory.
    pub fn document(&self, path: &str) -> Option<&GeneratedDocument> {
        self.documents.get(path.trim_start_matches('/'))
    }
}

/// A Debian repository index over an [ArchiveBackend].
///
/// All operations take `&self` so an instance can be shared behind an [Arc]
/// between whatever drives rebuilds and whatever serves the generated files.
pub struct Repository {
    backend: Arc<dyn ArchiveBackend>,
    parser: Arc<dyn ArchiveParser>,
    config: RepositoryConfig,
    packages: RwLock<Option<Arc<PackageSet>>>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl Repository {
    /// Construct an instance reading `.deb` files from a backend.
    pub fn new(backend: Arc<dyn ArchiveBackend>, config: RepositoryConfig) -> Self {
        Self::with_parser(backend, Arc::new(DebArchiveParser), config)
    }

    /// Construct an instance using a custom [ArchiveParser].
    pub fn with_parser(
        backend: Arc<dyn ArchiveBackend>,
        parser: Arc<dyn ArchiveParser>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            backend,
            parser,
            config,
            packages: RwLock::new(None),
            snapshot: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The configuration this instance was constructed with.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// The current lifecycle state.
    pub fn state(&self) -> RepositoryState {
        if self.snapshot().is_some() {
            RepositoryState::Ready
        } else if self.package_set().is_some() {
            RepositoryState::Indexed
        } else {
            RepositoryState::Empty
        }
    }

    /// The current package set, if the repository has been populated.
    pub fn package_set(&self) -> Option<Arc<PackageSet>> {
        self.packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current snapshot of generated files, if any.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Content of a generated document by its path relative to the distribution directory.
    pub fn document(&self, path: &str) -> Option<Bytes> {
        self.snapshot()
            .and_then(|s| s.document(path).map(|doc| doc.data.clone()))
    }

    /// Content of the `Packages` document for an architecture.
    pub fn packages_index(&self, architecture: &str) -> Option<Bytes> {
        self.document(&packages_index_path(
            &self.config.release.component,
            architecture,
        ))
    }

    /// Content of the `Release` manifest.
    pub fn manifest(&self) -> Option<Bytes> {
        self.snapshot().map(|s| s.manifest.clone())
    }

    /// Architectures present in the current snapshot. Empty before files are generated.
    pub fn architectures(&self) -> BTreeSet<String> {
        self.snapshot()
            .map(|s| s.architectures.clone())
            .unwrap_or_default()
    }

    async fn extract(&self, archive: &ArchiveRef) -> Result<PackageRecord> {
        let filename = pool_filename(&self.config.pool_prefix, &archive.path);

        let fut = async {
            let reader = self.backend.open_archive(archive).await?;
            extract_record(reader, &archive.path, filename, self.parser.as_ref()).await
        };

        let record = match self.config.read_timeout_secs {
            0 => fut.await?,
            secs => tokio::time::timeout(Duration::from_secs(secs), fut)
                .await
                .map_err(|_| RepositoryError::BackendTimeout(archive.path.clone(), secs))??,
        };

        debug!(
            "indexed {} as {} {} {}",
            archive.path, record.package, record.version, record.architecture
        );

        Ok(record)
    }

    /// Scan the backend and replace the package set.
    ///
    /// Archives that cannot be read or parsed are skipped and reported. A failure to
    /// list the backend aborts the scan and keeps the previous package set.
    pub async fn populate(&self) -> Result<PopulateReport> {
        let archives = self.backend.list_archives().await?;
        info!("indexing {} archives", archives.len());

        // `buffered` yields results in listing order, so duplicate resolution is stable.
        let extractions: Vec<_> = archives
            .iter()
            .map(|archive| self.extract(archive))
            .collect();
        let results = futures::stream::iter(extractions)
            .buffered(self.config.max_parallel_io.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut records = Vec::with_capacity(results.len());
        let mut skipped = vec![];

        for (archive, res) in archives.iter().zip(results) {
            match res {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("skipping {}: {}", archive.path, e);
                    skipped.push(SkippedArchive {
                        path: archive.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let (set, duplicates) = PackageSet::from_records(records);
        let indexed = set.record_count();

        info!(
            "indexed {} records of {} packages; {} archives skipped; {} duplicates",
            indexed,
            set.len(),
            skipped.len(),
            duplicates.len()
        );

        *self.packages.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(set));

        Ok(PopulateReport {
            archives: archives.len(),
            indexed,
            skipped,
            duplicates,
        })
    }

    /// Generate `Packages` documents and the `Release` manifest from the current package set.
    pub fn generate_files(&self) -> Result<GenerateReport> {
        self.generate_files_at(Utc::now())
    }

    /// Generate files recording a specific date in the manifest.
    ///
    /// An architecture whose document cannot be generated is left out and reported.
    /// If every architecture fails, or the manifest cannot be produced, nothing is
    /// published and the previous snapshot remains current.
    pub fn generate_files_at(&self, date: DateTime<Utc>) -> Result<GenerateReport> {
        let packages = self
            .package_set()
            .ok_or(RepositoryError::RepositoryNotPopulated)?;
        let release = &self.config.release;

        let mut documents = BTreeMap::new();
        let mut failed = vec![];

        for architecture in packages.architectures() {
            match build_packages_index(
                &release.component,
                &architecture,
                packages.latest_for_architecture(&architecture),
            ) {
                Ok(doc) => {
                    info!("generated {} ({} bytes)", doc.path, doc.size());
                    documents.insert(doc.path.clone(), doc);
                }
                Err(e) => {
                    warn!("omitting architecture {}: {}", architecture, e);
                    failed.push(FailedArchitecture {
                        architecture,
                        error: e.to_string(),
                    });
                }
            }
        }

        if documents.is_empty() && !failed.is_empty() {
            return Err(RepositoryError::IndexGeneration(
                failed
                    .iter()
                    .map(|f| f.architecture.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        }

        let manifest = build_release(
            release,
            date,
            &documents.values().cloned().collect::<Vec<_>>(),
        )?;

        let architectures = documents
            .values()
            .map(|doc| doc.architecture.clone())
            .collect::<BTreeSet<_>>();

        let snapshot = Snapshot {
            suite: release.suite.clone(),
            date,
            documents,
            manifest,
            architectures,
        };

        info!(
            "publishing {} documents for {} architectures",
            snapshot.documents.len(),
            snapshot.architectures.len()
        );

        let architectures = snapshot.architectures.iter().cloned().collect();

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(snapshot));

        Ok(GenerateReport {
            date,
            architectures,
            failed,
        })
    }

    /// Populate and generate files.
    ///
    /// Concurrent calls are serialized.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let _guard = self.rebuild_lock.lock().await;

        let populate = self.populate().await?;
        let generate = self.generate_files()?;

        Ok(RebuildReport { populate, generate })
    }
}
