// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("date parsing error: {0:?}")]
    DateParse(#[from] mailparse::MailParseError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("Control file lacks a paragraph")]
    ControlFileNoParagraph,

    #[error("Control file not found")]
    ControlFileNotFound,

    #[error("required field missing in control file: {0}")]
    ControlRequiredFieldMissing(&'static str),

    #[error("invalid control field name: {0:?}")]
    ControlInvalidFieldName(String),

    #[error("invalid value for control field {0}: {1:?}")]
    ControlInvalidFieldValue(String, String),

    #[error("unknown entry in binary package archive: {0}")]
    DebUnknownBinaryPackageEntry(String),

    #[error("unknown compression in deb archive file: {0}")]
    DebUnknownCompression(String),

    #[error("archive backend error: {0}")]
    Backend(String),

    #[error("archive backend I/O error on path {0}: {1:?}")]
    BackendIoPath(String, std::io::Error),

    #[error("I/O error publishing {0}: {1:?}")]
    PublishIoPath(String, std::io::Error),

    #[error("refusing to publish path outside the repository root: {0}")]
    PublishInvalidPath(String),

    #[error("timed out reading archive {0} after {1} seconds")]
    BackendTimeout(String, u64),

    #[error("error extracting package record from {path}: {source}")]
    Extraction {
        path: String,
        #[source]
        source: Box<RepositoryError>,
    },

    #[error("error serializing {package} into the {architecture} index: {source}")]
    IndexSerialization {
        package: String,
        architecture: String,
        #[source]
        source: Box<RepositoryError>,
    },

    #[error("index generation failed for every architecture: {0}")]
    IndexGeneration(String),

    #[error("repository has not been populated")]
    RepositoryNotPopulated,

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("index entry path unexpectedly has spaces: {0}")]
    ManifestPathWithSpaces(String),

    #[error("expected 1 paragraph in release file; got {0}")]
    ReleaseControlParagraphMismatch(usize),

    #[error("digest missing from index entry")]
    ReleaseMissingDigest,

    #[error("size missing from index entry")]
    ReleaseMissingSize,

    #[error("path missing from index entry")]
    ReleaseMissingPath,

    #[error("signing error: {0}")]
    Signing(String),
}

impl<W> From<std::io::IntoInnerError<W>> for RepositoryError {
    fn from(e: std::io::IntoInnerError<W>) -> Self {
        Self::Io(e.into())
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, RepositoryError>;
