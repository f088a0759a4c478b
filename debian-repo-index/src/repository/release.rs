// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file primitives.

`Release` files are the entry point of a Debian repository. They are a single
control paragraph holding repository-level metadata plus one list of indices
files per digest flavor.

[build_release()] produces the `Release` document for a set of
[GeneratedDocument]. [ReleaseFile] parses a `Release` document back so its
entries can be checked against the files they describe.
*/

use {
    crate::{
        control::{ControlField, ControlParagraph, ControlParagraphReader},
        error::{RepositoryError, Result},
        io::ContentDigest,
        repository::index::GeneratedDocument,
    },
    bytes::Bytes,
    chrono::{DateTime, TimeZone, Utc},
    serde::Deserialize,
    std::{
        collections::{BTreeMap, BTreeSet},
        io::BufRead,
        ops::{Deref, DerefMut},
        str::FromStr,
    },
};

/// Formatter string for dates in release files.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S UTC";

/// Checksum type / digest mechanism used in a release file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// Emit variants in the order their fields appear in generated `Release` files.
    pub fn iter() -> impl Iterator<Item = ChecksumType> {
        [Self::Md5, Self::Sha1, Self::Sha256].into_iter()
    }

    /// Name of the control field in `Release` files holding this variant type.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }
}

fn default_suite() -> String {
    "stable".to_string()
}

fn default_component() -> String {
    "main".to_string()
}

/// Repository-level metadata written to `Release` files.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Distribution name. Also the directory under `dists/`.
    #[serde(default = "default_suite")]
    pub suite: String,

    #[serde(default)]
    pub codename: Option<String>,

    #[serde(default)]
    pub origin: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// The single component all packages are published in.
    #[serde(default = "default_component")]
    pub component: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            suite: default_suite(),
            codename: None,
            origin: None,
            label: None,
            description: None,
            component: default_component(),
        }
    }
}

/// Set a field if the value is present and not blank.
fn set_optional(para: &mut ControlParagraph<'_>, name: &'static str, value: &Option<String>) {
    if let Some(value) = value.as_deref().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        para.set_field_from_string(name.into(), value.to_string().into());
    }
}

/// Produce the content of a `Release` file describing a set of documents.
///
/// Given the same configuration, date and documents, output is byte identical.
///
/// `Architectures` lists the architectures having a document, sorted. Entries of
/// each digest list are sorted by path with sizes right-aligned to the widest.
pub fn build_release(
    config: &ReleaseConfig,
    date: DateTime<Utc>,
    documents: &[GeneratedDocument],
) -> Result<Bytes> {
    let mut para = ControlParagraph::default();

    set_optional(&mut para, "Origin", &config.origin);
    set_optional(&mut para, "Label", &config.label);
    para.set_field_from_string("Suite".into(), config.suite.clone().into());
    set_optional(&mut para, "Codename", &config.codename);
    para.set_field_from_string("Date".into(), date.format(DATE_FORMAT).to_string().into());

    let architectures = documents
        .iter()
        .map(|doc| doc.architecture.as_str())
        .collect::<BTreeSet<_>>();
    if !architectures.is_empty() {
        para.set_field_from_string(
            "Architectures".into(),
            architectures.into_iter().collect::<Vec<_>>().join(" ").into(),
        );
    }

    para.set_field_from_string("Components".into(), config.component.clone().into());
    set_optional(&mut para, "Description", &config.description);

    let mut entries = BTreeMap::new();
    for doc in documents {
        if doc.path.contains(|c: char| c.is_whitespace()) {
            return Err(RepositoryError::ManifestPathWithSpaces(doc.path.clone()));
        }

        if entries.insert(doc.path.as_str(), doc).is_some() {
            return Err(RepositoryError::Manifest(format!(
                "document path {} occurs more than once",
                doc.path
            )));
        }
    }

    if !entries.is_empty() {
        let size_width = entries
            .values()
            .map(|doc| doc.size().to_string().len())
            .max()
            .unwrap_or_default();

        for checksum in ChecksumType::iter() {
            let lines = entries.iter().map(|(path, doc)| {
                format!(
                    "{} {:>size_width$} {}",
                    doc.digests.digest_from_checksum(checksum).digest_hex(),
                    doc.size(),
                    path,
                    size_width = size_width
                )
            });

            para.set_field(ControlField::from_lines(
                checksum.field_name().into(),
                std::iter::once(String::new()).chain(lines),
            ));
        }
    }

    let data = para
        .to_bytes()
        .map_err(|e| RepositoryError::Manifest(format!("{}", e)))?;

    Ok(Bytes::from(data))
}

/// An entry for a file in a parsed `Release` file.
///
/// Instances correspond to a line in a `MD5Sum`, `SHA1`, or `SHA256` field.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct ReleaseFileEntry<'a> {
    /// The path to this file within the repository.
    pub path: &'a str,

    /// The content digest of this file.
    pub digest: ContentDigest,

    /// The size of the file in bytes.
    pub size: u64,
}

/// A Debian repository `Release` file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> From<ControlParagraph<'a>> for ReleaseFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> From<ReleaseFile<'a>> for ControlParagraph<'a> {
    fn from(release: ReleaseFile<'a>) -> Self {
        release.paragraph
    }
}

impl<'a> Deref for ReleaseFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> DerefMut for ReleaseFile<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.paragraph
    }
}

impl<'a> ReleaseFile<'a> {
    /// Construct an instance by reading data from a reader.
    ///
    /// The source must be a Debian control file with exactly 1 paragraph. PGP
    /// armored content such as `InRelease` files is not accepted.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut paragraphs = ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

        if paragraphs.len() != 1 {
            return Err(RepositoryError::ReleaseControlParagraphMismatch(
                paragraphs.len(),
            ));
        }

        Ok(Self {
            paragraph: paragraphs.remove(0),
        })
    }

    /// Description of this repository.
    pub fn description(&self) -> Option<&str> {
        self.field_str("Description")
    }

    /// Origin of the repository.
    pub fn origin(&self) -> Option<&str> {
        self.field_str("Origin")
    }

    /// Label for the repository.
    pub fn label(&self) -> Option<&str> {
        self.field_str("Label")
    }

    /// Suite of this repository.
    ///
    /// e.g. `stable`, `unstable`, `experimental`.
    pub fn suite(&self) -> Option<&str> {
        self.field_str("Suite")
    }

    /// Codename of this repository.
    pub fn codename(&self) -> Option<&str> {
        self.field_str("Codename")
    }

    /// Names of components within this repository.
    pub fn components(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_words("Components")
    }

    /// Debian machine architectures supported by this repository.
    pub fn architectures(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_words("Architectures")
    }

    /// Time the release file was created, as its raw string value.
    pub fn date_str(&self) -> Option<&str> {
        self.field_str("Date")
    }

    /// Time the release file was created, normalized to UTC.
    pub fn date(&self) -> Option<Result<DateTime<Utc>>> {
        self.date_str().map(|v| {
            let timestamp = mailparse::dateparse(v)?;

            Utc.timestamp_opt(timestamp, 0)
                .single()
                .ok_or_else(|| RepositoryError::Manifest(format!("invalid date: {}", v)))
        })
    }

    /// Obtain indexed files in this repository.
    ///
    /// If the specified checksum variant is present, [Some] is returned.
    ///
    /// The returned iterator emits [ReleaseFileEntry] instances. Entries are lazily
    /// parsed as they are consumed from the iterator. Parse errors result in an [Err].
    pub fn iter_index_files(
        &self,
        checksum: ChecksumType,
    ) -> Option<Box<(dyn Iterator<Item = Result<ReleaseFileEntry<'_>>> + '_)>> {
        self.iter_field_lines(checksum.field_name()).map(|iter| {
            Box::new(iter.map(move |v| {
                // Values are of form: <digest> <size> <path>
                let mut parts = v.split_ascii_whitespace();

                let digest = parts.next().ok_or(RepositoryError::ReleaseMissingDigest)?;
                let size = parts.next().ok_or(RepositoryError::ReleaseMissingSize)?;
                let path = parts.next().ok_or(RepositoryError::ReleaseMissingPath)?;

                if parts.next().is_some() {
                    return Err(RepositoryError::ManifestPathWithSpaces(v.to_string()));
                }

                let digest = ContentDigest::from_hex_digest(checksum, digest)?;
                let size = u64::from_str(size)?;

                Ok(ReleaseFileEntry { path, digest, size })
            })) as Box<(dyn Iterator<Item = Result<ReleaseFileEntry<'_>>> + '_)>
        })
    }
}
