// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem based package pools and published repositories. */

use {
    crate::{
        error::{RepositoryError, Result},
        package_record::pool_filename,
        repository::{
            backend::{ArchiveBackend, ArchiveRef},
            Snapshot,
        },
        resolver::PackageSet,
        signing::ManifestSigner,
    },
    async_trait::async_trait,
    futures::{io::BufReader, AsyncRead},
    log::{info, warn},
    std::{
        collections::BTreeSet,
        ffi::OsStr,
        path::{Component, Path, PathBuf},
        pin::Pin,
    },
    walkdir::WalkDir,
};

/// An [ArchiveBackend] reading `.deb` files beneath a directory.
///
/// Every regular file with a `.deb` extension at any depth is an archive. Directory
/// entries are visited in file name order.
#[derive(Clone, Debug)]
pub struct FilesystemBackend {
    root_dir: PathBuf,
}

impl FilesystemBackend {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    /// The directory archives are read from.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[async_trait]
impl ArchiveBackend for FilesystemBackend {
    async fn list_archives(&self) -> Result<Vec<ArchiveRef>> {
        let metadata = std::fs::metadata(&self.root_dir).map_err(|e| {
            RepositoryError::BackendIoPath(format!("{}", self.root_dir.display()), e)
        })?;

        if !metadata.is_dir() {
            return Err(RepositoryError::Backend(format!(
                "{} is not a directory",
                self.root_dir.display()
            )));
        }

        let mut archives = vec![];

        for entry in WalkDir::new(&self.root_dir)
            .follow_links(true)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable path: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || entry.path().extension() != Some(OsStr::new("deb"))
            {
                continue;
            }

            let relative = entry.path().strip_prefix(&self.root_dir).map_err(|_| {
                RepositoryError::Backend(format!(
                    "{} is not beneath {}",
                    entry.path().display(),
                    self.root_dir.display()
                ))
            })?;

            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            archives.push(ArchiveRef::new(relative));
        }

        Ok(archives)
    }

    async fn open_archive(&self, archive: &ArchiveRef) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.root_dir.join(&archive.path);

        let f = std::fs::File::open(&path)
            .map_err(|e| RepositoryError::BackendIoPath(format!("{}", path.display()), e))?;

        Ok(Box::pin(BufReader::new(futures::io::AllowStdIo::new(f))))
    }
}

/// Interpret `relative` as a path of plain segments.
///
/// Absolute paths and `.` or `..` segments are refused, so joining the result to a
/// directory never leaves that directory.
fn relative_path(relative: &str) -> Result<&Path> {
    let path = Path::new(relative);

    if relative.is_empty()
        || relative.starts_with('/')
        || !path.components().all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(RepositoryError::PublishInvalidPath(relative.to_string()));
    }

    Ok(path)
}

/// Writes generated repository content to a directory.
///
/// The layout matches what `apt` expects beneath a repository URL: generated files
/// under `dists/<suite>/` and archives under their pool `Filename`.
pub struct FilesystemPublisher {
    root_dir: PathBuf,
}

impl FilesystemPublisher {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// The directory does not need to exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepositoryError::PublishIoPath(format!("{}", parent.display()), e)
            })?;
        }

        std::fs::write(path, data)
            .map_err(|e| RepositoryError::PublishIoPath(format!("{}", path.display()), e))
    }

    /// Write the documents and manifest of a snapshot.
    ///
    /// With a signer, `Release.gpg` and `InRelease` are written as well. Signatures are
    /// produced and paths are checked before anything is written, so a signing failure
    /// or a path escaping the root directory leaves no files behind.
    ///
    /// Returns the paths written.
    pub fn publish_snapshot(
        &self,
        snapshot: &Snapshot,
        signer: Option<&dyn ManifestSigner>,
    ) -> Result<Vec<PathBuf>> {
        let dist_dir = self
            .root_dir
            .join("dists")
            .join(relative_path(&snapshot.suite)?);

        let mut files = snapshot
            .documents
            .values()
            .map(|doc| Ok((dist_dir.join(relative_path(&doc.path)?), doc.data.to_vec())))
            .collect::<Result<Vec<_>>>()?;

        files.push((dist_dir.join("Release"), snapshot.manifest.to_vec()));

        if let Some(signer) = signer {
            files.push((
                dist_dir.join("Release.gpg"),
                signer.sign_detached(&snapshot.manifest)?.into_bytes(),
            ));
            files.push((
                dist_dir.join("InRelease"),
                signer.sign_cleartext(&snapshot.manifest)?.into_bytes(),
            ));
        }

        for (path, data) in &files {
            self.write_file(path, data)?;
        }

        info!(
            "published {} files to {}",
            files.len(),
            dist_dir.display()
        );

        Ok(files.into_iter().map(|(path, _)| path).collect())
    }

    /// Copy the archives of indexed packages to their pool `Filename`.
    ///
    /// Archives that were not admitted to `packages` are not copied. Nothing is copied
    /// if any destination would fall outside the root directory. Returns the number of
    /// bytes copied.
    pub async fn publish_pool(
        &self,
        backend: &dyn ArchiveBackend,
        pool_prefix: &str,
        packages: &PackageSet,
    ) -> Result<u64> {
        let wanted = packages
            .iter_records()
            .map(|r| r.filename.as_str())
            .collect::<BTreeSet<_>>();

        let mut targets = vec![];
        for archive in backend.list_archives().await? {
            let filename = pool_filename(pool_prefix, &archive.path);
            if wanted.contains(filename.as_str()) {
                targets.push((self.root_dir.join(relative_path(&filename)?), archive));
            }
        }

        let mut total = 0;

        for (dest_path, archive) in targets {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RepositoryError::PublishIoPath(format!("{}", parent.display()), e)
                })?;
            }

            let fh = std::fs::File::create(&dest_path).map_err(|e| {
                RepositoryError::PublishIoPath(format!("{}", dest_path.display()), e)
            })?;
            let mut writer = futures::io::AllowStdIo::new(fh);

            let reader = backend.open_archive(&archive).await?;
            total += futures::io::copy(reader, &mut writer).await.map_err(|e| {
                RepositoryError::PublishIoPath(format!("{}", dest_path.display()), e)
            })?;
        }

        Ok(total)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            control::ControlParagraph,
            deb::builder::DebBuilder,
            io::MultiContentDigest,
            repository::{
                index::GeneratedDocument, release::ReleaseFile, Repository, RepositoryConfig,
            },
        },
        bytes::Bytes,
        futures::AsyncReadExt,
        std::{collections::BTreeMap, sync::Arc},
    };

    fn write_deb(
        dir: &Path,
        relative: &str,
        package: &str,
        version: &str,
        arch: &str,
    ) -> Result<Vec<u8>> {
        let mut para = ControlParagraph::default();
        para.set_field_from_string("Package".into(), package.to_string().into());
        para.set_field_from_string("Version".into(), version.to_string().into());
        para.set_field_from_string("Architecture".into(), arch.to_string().into());
        para.set_field_from_string("Maintainer".into(), "Someone <someone@example.com>".into());

        let mut data = vec![];
        DebBuilder::new(para)
            .set_mtime(Some(std::time::SystemTime::UNIX_EPOCH))
            .install_file(format!("usr/share/doc/{}/README", package), b"readme".to_vec(), false)
            .write(&mut data)?;

        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(&path, &data)?;

        Ok(data)
    }

    struct FixedSigner;

    impl ManifestSigner for FixedSigner {
        fn sign_detached(&self, data: &[u8]) -> Result<String> {
            Ok(format!("detached {}", data.len()))
        }

        fn sign_cleartext(&self, _data: &[u8]) -> Result<String> {
            Ok("cleartext".into())
        }

        fn public_key_armored(&self) -> Result<String> {
            Ok("key".into())
        }
    }

    struct FailingSigner;

    impl ManifestSigner for FailingSigner {
        fn sign_detached(&self, _data: &[u8]) -> Result<String> {
            Err(RepositoryError::Signing("no key".into()))
        }

        fn sign_cleartext(&self, _data: &[u8]) -> Result<String> {
            Err(RepositoryError::Signing("no key".into()))
        }

        fn public_key_armored(&self) -> Result<String> {
            Err(RepositoryError::Signing("no key".into()))
        }
    }

    #[tokio::test]
    async fn list_archives_sorted() -> Result<()> {
        let td = tempfile::tempdir()?;

        write_deb(td.path(), "zeta_1.0_amd64.deb", "zeta", "1.0", "amd64")?;
        write_deb(td.path(), "b/bar_1.0_amd64.deb", "bar", "1.0", "amd64")?;
        write_deb(td.path(), "alpha_1.0_amd64.deb", "alpha", "1.0", "amd64")?;
        std::fs::write(td.path().join("README.txt"), b"not a package")?;
        std::fs::create_dir_all(td.path().join("empty.deb"))?;

        let backend = FilesystemBackend::new(td.path());
        let archives = backend.list_archives().await?;

        assert_eq!(
            archives.iter().map(|a| a.path.as_str()).collect::<Vec<_>>(),
            vec!["alpha_1.0_amd64.deb", "b/bar_1.0_amd64.deb", "zeta_1.0_amd64.deb"]
        );
        assert_eq!(archives[1].name, "bar_1.0_amd64.deb");

        Ok(())
    }

    #[tokio::test]
    async fn missing_root() {
        let td = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(td.path().join("missing"));

        assert!(matches!(
            backend.list_archives().await,
            Err(RepositoryError::BackendIoPath(..))
        ));
    }

    #[tokio::test]
    async fn open_archive_reads_file() -> Result<()> {
        let td = tempfile::tempdir()?;
        let data = write_deb(td.path(), "foo.deb", "foo", "1.0", "amd64")?;

        let backend = FilesystemBackend::new(td.path());
        let mut reader = backend.open_archive(&ArchiveRef::new("foo.deb")).await?;

        let mut buf = vec![];
        reader.read_to_end(&mut buf).await?;
        assert_eq!(buf, data);

        assert!(backend
            .open_archive(&ArchiveRef::new("missing.deb"))
            .await
            .is_err());

        Ok(())
    }

    #[tokio::test]
    async fn publish_repository() -> Result<()> {
        let pool = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;

        write_deb(pool.path(), "f/foo_1.0_amd64.deb", "foo", "1.0", "amd64")?;
        let foo2 = write_deb(pool.path(), "f/foo_2.0_amd64.deb", "foo", "2.0", "amd64")?;
        write_deb(pool.path(), "b/bar_1.0_all.deb", "bar", "1.0", "all")?;
        std::fs::write(pool.path().join("broken.deb"), b"garbage")?;

        let backend = Arc::new(FilesystemBackend::new(pool.path()));
        let repo = Repository::new(backend.clone(), RepositoryConfig::default());
        let report = repo.rebuild().await?;

        assert_eq!(report.populate.archives, 4);
        assert_eq!(report.populate.skipped.len(), 1);

        let publisher = FilesystemPublisher::new(out.path());
        let snapshot = repo.snapshot().unwrap();
        let written = publisher.publish_snapshot(&snapshot, Some(&FixedSigner))?;

        let dist = out.path().join("dists").join("stable");
        assert_eq!(written.len(), 5);
        for name in [
            "main/binary-all/Packages",
            "main/binary-amd64/Packages",
            "Release",
            "Release.gpg",
            "InRelease",
        ] {
            assert!(dist.join(name).is_file(), "{} exists", name);
        }

        let release = ReleaseFile::from_reader(std::io::BufReader::new(std::fs::File::open(
            dist.join("Release"),
        )?))?;
        assert_eq!(
            release.architectures().unwrap().collect::<Vec<_>>(),
            vec!["all", "amd64"]
        );

        let amd64 = std::fs::read_to_string(dist.join("main/binary-amd64/Packages"))?;
        assert!(amd64.contains("Version: 2.0\n"));
        assert!(!amd64.contains("Version: 1.0\n"));
        assert!(amd64.contains("Filename: pool/main/f/foo_2.0_amd64.deb\n"));

        let copied = publisher
            .publish_pool(
                backend.as_ref(),
                &repo.config().pool_prefix,
                &repo.package_set().unwrap(),
            )
            .await?;
        assert!(copied > 0);
        assert_eq!(
            std::fs::read(out.path().join("pool/main/f/foo_2.0_amd64.deb"))?,
            foo2
        );
        assert!(out.path().join("pool/main/f/foo_1.0_amd64.deb").is_file());
        assert!(out.path().join("pool/main/b/bar_1.0_all.deb").is_file());
        assert!(!out.path().join("pool/main/broken.deb").exists());

        Ok(())
    }

    #[tokio::test]
    async fn signing_failure_writes_nothing() -> Result<()> {
        let pool = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        write_deb(pool.path(), "foo.deb", "foo", "1.0", "amd64")?;

        let repo = Repository::new(
            Arc::new(FilesystemBackend::new(pool.path())),
            RepositoryConfig::default(),
        );
        repo.rebuild().await?;

        let publisher = FilesystemPublisher::new(out.path());
        assert!(matches!(
            publisher.publish_snapshot(&repo.snapshot().unwrap(), Some(&FailingSigner)),
            Err(RepositoryError::Signing(_))
        ));
        assert!(!out.path().join("dists").exists());

        Ok(())
    }

    fn snapshot_with_document(suite: &str, path: &str) -> Snapshot {
        let data = Bytes::from_static(b"Package: foo\n");
        let document = GeneratedDocument {
            path: path.to_string(),
            architecture: "amd64".into(),
            digests: MultiContentDigest::from_bytes(&data),
            data,
        };

        Snapshot {
            suite: suite.to_string(),
            date: chrono::Utc::now(),
            documents: BTreeMap::from([(path.to_string(), document)]),
            manifest: Bytes::from_static(b"Suite: stable\n"),
            architectures: BTreeSet::from(["amd64".to_string()]),
        }
    }

    #[test]
    fn escaping_paths_write_nothing() -> Result<()> {
        let td = tempfile::tempdir()?;
        let out = td.path().join("out");
        let publisher = FilesystemPublisher::new(&out);

        for (suite, path) in [
            ("stable", "main/binary-/../../../../escaped/Packages"),
            ("stable", "/main/binary-amd64/Packages"),
            ("../escaped", "main/binary-amd64/Packages"),
        ] {
            let res = publisher.publish_snapshot(&snapshot_with_document(suite, path), None);
            assert!(
                matches!(res, Err(RepositoryError::PublishInvalidPath(_))),
                "{} {}",
                suite,
                path
            );
        }

        assert!(!out.exists());
        assert!(!td.path().join("escaped").exists());

        Ok(())
    }

    #[tokio::test]
    async fn pool_outside_root_refused() -> Result<()> {
        let pool = tempfile::tempdir()?;
        let td = tempfile::tempdir()?;
        let out = td.path().join("out");
        write_deb(pool.path(), "foo.deb", "foo", "1.0", "amd64")?;

        let backend = Arc::new(FilesystemBackend::new(pool.path()));
        let repo = Repository::new(
            backend.clone(),
            RepositoryConfig {
                pool_prefix: "../outside".into(),
                ..Default::default()
            },
        );
        repo.rebuild().await?;

        let publisher = FilesystemPublisher::new(&out);
        let res = publisher
            .publish_pool(
                backend.as_ref(),
                &repo.config().pool_prefix,
                &repo.package_set().unwrap(),
            )
            .await;
        assert!(matches!(res, Err(RepositoryError::PublishInvalidPath(_))));
        assert!(!td.path().join("outside").exists());

        Ok(())
    }
}
