// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Generation of per-architecture `Packages` index documents. */

use {
    crate::{
        error::{RepositoryError, Result},
        io::{DigestingWriter, MultiContentDigest},
        package_record::PackageRecord,
    },
    bytes::Bytes,
    std::io::Write,
};

/// An immutable, generated file served from a repository's distribution directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratedDocument {
    /// Path relative to the distribution directory. e.g. `main/binary-amd64/Packages`.
    pub path: String,
    /// Architecture this document indexes.
    pub architecture: String,
    /// The exact bytes that are served.
    pub data: Bytes,
    /// Digests of [Self::data].
    pub digests: MultiContentDigest,
}

impl GeneratedDocument {
    /// Size of the document in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Path of the `Packages` file for a component and architecture.
pub fn packages_index_path(component: &str, architecture: &str) -> String {
    format!("{}/binary-{}/Packages", component, architecture)
}

/// Serialize records into a `Packages` document.
///
/// Records are written in iteration order as paragraphs separated by an empty line.
/// If any record fails to serialize, the whole document is abandoned and an
/// [RepositoryError::IndexSerialization] naming the record is returned.
pub fn build_packages_index<'a>(
    component: &str,
    architecture: &str,
    records: impl IntoIterator<Item = &'a PackageRecord>,
) -> Result<GeneratedDocument> {
    let mut writer = DigestingWriter::new(Vec::new());

    for (i, record) in records.into_iter().enumerate() {
        // Serialize into an intermediate buffer so a failure never leaves a partial
        // paragraph in the digest stream.
        let paragraph = record.to_control_paragraph().to_bytes().map_err(|e| {
            RepositoryError::IndexSerialization {
                package: record.package.clone(),
                architecture: architecture.to_string(),
                source: Box::new(e),
            }
        })?;

        if i > 0 {
            writer.write_all(b"\n")?;
        }
        writer.write_all(&paragraph)?;
    }

    let (data, _, digests) = writer.finish();

    Ok(GeneratedDocument {
        path: packages_index_path(component, architecture),
        architecture: architecture.to_string(),
        data: Bytes::from(data),
        digests,
    })
}
