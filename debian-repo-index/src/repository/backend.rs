// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Sources of package archives. */

use {
    crate::error::Result,
    async_trait::async_trait,
    futures::AsyncRead,
    std::pin::Pin,
};

/// A reference to a package archive held by an [ArchiveBackend].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ArchiveRef {
    /// Path of the archive relative to the backend root, `/` separated.
    ///
    /// This is what the archive's pool `Filename` is derived from.
    pub path: String,

    /// Human readable name of the archive. Typically its file name.
    pub name: String,
}

impl ArchiveRef {
    /// Construct an instance from a relative path, naming it after the final path component.
    pub fn new(path: impl ToString) -> Self {
        let path = path.to_string();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();

        Self { path, name }
    }
}

/// Enumerates package archives and opens them for reading.
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    /// Obtain the archives currently available.
    ///
    /// The result is a snapshot. Order must be deterministic, as it decides which
    /// of two archives claiming the same package version wins.
    ///
    /// An error means the backend as a whole is unusable.
    async fn list_archives(&self) -> Result<Vec<ArchiveRef>>;

    /// Open an archive for reading.
    async fn open_archive(&self, archive: &ArchiveRef) -> Result<Pin<Box<dyn AsyncRead + Send>>>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn archive_ref_name() {
        let a = ArchiveRef::new("sub/dir/foo_1.0_amd64.deb");
        assert_eq!(a.path, "sub/dir/foo_1.0_amd64.deb");
        assert_eq!(a.name, "foo_1.0_amd64.deb");

        assert_eq!(ArchiveRef::new("bar.deb").name, "bar.deb");
    }
}
