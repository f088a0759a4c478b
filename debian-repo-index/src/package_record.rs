// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Normalized metadata for a single binary package archive.

A [PackageRecord] is everything a `Packages` index needs to know about one
`.deb`: the identifying fields from its `control` file plus the size and
digests of the archive bytes and the path clients fetch it from.

[extract_record()] derives a record from a byte stream in a single pass. The
bytes are digested and counted as they are read and the same buffer is handed
to the [ArchiveParser], so `Size` and the digests always describe the bytes
that were parsed.
*/

use {
    crate::{
        binary_package_control::BinaryPackageControlFile,
        control::{ControlField, ControlParagraph},
        deb::ArchiveParser,
        error::{RepositoryError, Result},
        io::{DigestingReader, MultiContentDigest},
        package_version::PackageVersion,
    },
    futures::{AsyncRead, AsyncReadExt},
    std::collections::BTreeMap,
    strum::{EnumIter, IntoEnumIterator},
};

/// Pool prefix used when none is configured.
pub const DEFAULT_POOL_PREFIX: &str = "pool/main";

/// A package relationship field.
///
/// Variants are declared in the order they are emitted in `Packages` files.
#[derive(Clone, Copy, Debug, EnumIter, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Relationship {
    PreDepends,
    Depends,
    Recommends,
    Suggests,
    Enhances,
    Breaks,
    Conflicts,
    Replaces,
    Provides,
    BuiltUsing,
}

impl Relationship {
    /// Name of the control field holding this relationship.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::PreDepends => "Pre-Depends",
            Self::Depends => "Depends",
            Self::Recommends => "Recommends",
            Self::Suggests => "Suggests",
            Self::Enhances => "Enhances",
            Self::Breaks => "Breaks",
            Self::Conflicts => "Conflicts",
            Self::Replaces => "Replaces",
            Self::Provides => "Provides",
            Self::BuiltUsing => "Built-Using",
        }
    }
}

/// Collapse all whitespace runs, including line folding, into single spaces.
fn normalize_expression(value: &str) -> String {
    value.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a string is a usable `Architecture` value.
///
/// Architecture names consist of lowercase ASCII alphanumerics and `-`. They become
/// part of index paths, so anything else is refused.
pub fn is_valid_architecture(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Whether a string is a usable `Package` value.
pub fn is_valid_package_name(value: &str) -> bool {
    !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '/')
}

/// Derive the repository-relative `Filename` of an archive.
///
/// `relative_path` is the archive's location relative to the backend root. The
/// result is that path placed under `pool_prefix`.
pub fn pool_filename(pool_prefix: &str, relative_path: &str) -> String {
    let relative = relative_path.replace('\\', "/");
    let relative = relative.trim_matches('/');
    let prefix = pool_prefix.trim_matches('/');

    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Metadata describing a single binary package archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageRecord {
    pub package: String,
    pub source: Option<String>,
    pub version: PackageVersion,
    pub architecture: String,
    pub essential: Option<String>,
    pub maintainer: Option<String>,
    /// Estimated installed size in KiB.
    pub installed_size: Option<u64>,
    /// Normalized relationship expressions. Empty expressions are never stored.
    pub relationships: BTreeMap<Relationship, String>,
    /// Path of the archive relative to the repository root.
    pub filename: String,
    /// Size of the archive in bytes.
    pub size: u64,
    pub digests: MultiContentDigest,
    pub section: Option<String>,
    pub priority: Option<String>,
    pub multi_arch: Option<String>,
    pub homepage: Option<String>,
    /// Description in its control file representation, continuation lines included.
    pub description: Option<String>,
}

impl PackageRecord {
    /// Construct an instance from a parsed control file and facts about the archive bytes.
    pub fn from_control(
        control: &BinaryPackageControlFile<'_>,
        filename: String,
        size: u64,
        digests: MultiContentDigest,
    ) -> Result<Self> {
        let optional = |name: &str| {
            control
                .field_str(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        let relationships = Relationship::iter()
            .filter_map(|rel| {
                control
                    .field_str(rel.field_name())
                    .map(normalize_expression)
                    .filter(|v| !v.is_empty())
                    .map(|v| (rel, v))
            })
            .collect::<BTreeMap<_, _>>();

        let package = control.package()?.trim();
        if !is_valid_package_name(package) {
            return Err(RepositoryError::ControlInvalidFieldValue(
                "Package".into(),
                package.to_string(),
            ));
        }

        let architecture = control.architecture()?.trim();
        if !is_valid_architecture(architecture) {
            return Err(RepositoryError::ControlInvalidFieldValue(
                "Architecture".into(),
                architecture.to_string(),
            ));
        }

        Ok(Self {
            package: package.to_string(),
            source: optional("Source"),
            version: control.version()?,
            architecture: architecture.to_string(),
            essential: optional("Essential"),
            maintainer: optional("Maintainer"),
            installed_size: control.installed_size().transpose()?,
            relationships,
            filename,
            size,
            digests,
            section: optional("Section"),
            priority: optional("Priority"),
            multi_arch: optional("Multi-Arch"),
            homepage: optional("Homepage"),
            description: optional("Description"),
        })
    }

    /// The relationship expression for a given field, if present.
    pub fn relationship(&self, relationship: Relationship) -> Option<&str> {
        self.relationships.get(&relationship).map(|v| v.as_str())
    }

    /// Convert this record to a `Packages` file paragraph.
    ///
    /// Fields are emitted in a fixed order and absent fields are omitted.
    pub fn to_control_paragraph(&self) -> ControlParagraph<'_> {
        let mut para = ControlParagraph::default();

        let mut set = |name: &'static str, value| {
            para.set_field(ControlField::new(name.into(), value));
        };

        set("Package", self.package.as_str().into());
        if let Some(v) = &self.source {
            set("Source", v.into());
        }
        set("Version", self.version.to_string().into());
        set("Architecture", self.architecture.as_str().into());
        if let Some(v) = &self.essential {
            set("Essential", v.into());
        }
        if let Some(v) = &self.maintainer {
            set("Maintainer", v.into());
        }
        if let Some(v) = self.installed_size {
            set("Installed-Size", v.to_string().into());
        }
        for (rel, expression) in &self.relationships {
            set(rel.field_name(), expression.into());
        }
        set("Filename", self.filename.as_str().into());
        set("Size", self.size.to_string().into());
        set("MD5sum", self.digests.md5.digest_hex().into());
        set("SHA1", self.digests.sha1.digest_hex().into());
        set("SHA256", self.digests.sha256.digest_hex().into());
        if let Some(v) = &self.section {
            set("Section", v.into());
        }
        if let Some(v) = &self.priority {
            set("Priority", v.into());
        }
        if let Some(v) = &self.multi_arch {
            set("Multi-Arch", v.into());
        }
        if let Some(v) = &self.homepage {
            set("Homepage", v.into());
        }
        if let Some(v) = &self.description {
            set("Description", v.into());
        }

        para
    }
}

/// Extract a [PackageRecord] from an archive byte stream.
///
/// The stream is read to its end exactly once. `path` identifies the archive in
/// errors and `filename` becomes the record's `Filename`.
///
/// Any read or parse failure is reported as [RepositoryError::Extraction].
pub async fn extract_record<R>(
    reader: R,
    path: &str,
    filename: String,
    parser: &dyn ArchiveParser,
) -> Result<PackageRecord>
where
    R: AsyncRead + Unpin,
{
    let extraction_error = |e: RepositoryError| RepositoryError::Extraction {
        path: path.to_string(),
        source: Box::new(e),
    };

    let mut reader = DigestingReader::new(reader);
    let mut data = vec![];
    reader
        .read_to_end(&mut data)
        .await
        .map_err(|e| extraction_error(e.into()))?;

    let (_, size, digests) = reader.finish();

    let control = parser.parse_control(&data).map_err(extraction_error)?;

    PackageRecord::from_control(&control, filename, size, digests).map_err(extraction_error)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            deb::{builder::DebBuilder, DebArchiveParser},
            package_version::PackageVersion,
        },
        indoc::indoc,
    };

    fn control(s: &str) -> Result<BinaryPackageControlFile<'static>> {
        let cf = crate::control::ControlFile::parse_str(s)?;
        let paragraph = cf
            .into_paragraphs()
            .next()
            .ok_or(RepositoryError::ControlFileNoParagraph)?;

        Ok(BinaryPackageControlFile::from(paragraph))
    }

    const CONTROL: &str = indoc! {"
        Package: foo
        Version: 1:2.0-1
        Architecture: amd64
        Maintainer: Someone <someone@example.com>
        Installed-Size: 12
        Depends: libc6 (>= 2.31),
          libfoo1
        Recommends:
        Suggests:   bar
        Section: utils
        Priority: optional
        Description: a foo
         Foo does things.
         .
         More things.
    "};

    #[test]
    fn pool_filenames() {
        assert_eq!(pool_filename("pool/main", "foo_1.0_amd64.deb"), "pool/main/foo_1.0_amd64.deb");
        assert_eq!(pool_filename("/pool/main/", "/f/foo.deb"), "pool/main/f/foo.deb");
        assert_eq!(pool_filename("pool/main", "sub\\foo.deb"), "pool/main/sub/foo.deb");
        assert_eq!(pool_filename("", "foo.deb"), "foo.deb");
    }

    #[test]
    fn record_from_control() -> Result<()> {
        let digests = MultiContentDigest::from_bytes(b"archive");
        let record = PackageRecord::from_control(
            &control(CONTROL)?,
            "pool/main/foo.deb".into(),
            7,
            digests.clone(),
        )?;

        assert_eq!(record.package, "foo");
        assert_eq!(record.version, PackageVersion::parse("1:2.0-1")?);
        assert_eq!(record.architecture, "amd64");
        assert_eq!(record.installed_size, Some(12));
        assert_eq!(
            record.relationship(Relationship::Depends),
            Some("libc6 (>= 2.31), libfoo1")
        );
        assert_eq!(record.relationship(Relationship::Suggests), Some("bar"));
        assert_eq!(record.relationship(Relationship::Recommends), None);
        assert_eq!(record.relationships.len(), 2);
        assert_eq!(record.size, 7);
        assert_eq!(record.digests, digests);

        Ok(())
    }

    #[test]
    fn architecture_names() {
        for value in ["amd64", "arm64", "all", "armhf", "kfreebsd-i386", "x32"] {
            assert!(is_valid_architecture(value), "{}", value);
        }
        for value in ["", "amd 64", "AMD64", "amd64\n", "../escaped", "/../x", "-amd64"] {
            assert!(!is_valid_architecture(value), "{:?}", value);
        }
    }

    #[test]
    fn unusable_identity_fields_rejected() -> Result<()> {
        for (package, architecture) in [
            ("foo", "amd 64"),
            ("foo", "/../../escaped"),
            ("foo bar", "amd64"),
            ("foo/bar", "amd64"),
        ] {
            let text = format!(
                "Package: {}\nVersion: 1.0\nArchitecture: {}\n",
                package, architecture
            );

            let res = PackageRecord::from_control(
                &control(&text)?,
                "pool/main/foo.deb".into(),
                7,
                MultiContentDigest::from_bytes(b"archive"),
            );
            assert!(
                matches!(res, Err(RepositoryError::ControlInvalidFieldValue(..))),
                "{} {}",
                package,
                architecture
            );
        }

        Ok(())
    }

    #[test]
    fn control_paragraph_field_order() -> Result<()> {
        let record = PackageRecord::from_control(
            &control(CONTROL)?,
            "pool/main/foo.deb".into(),
            7,
            MultiContentDigest::from_bytes(b"archive"),
        )?;

        let para = record.to_control_paragraph();
        let names = para.iter_fields().map(|f| f.name()).collect::<Vec<_>>();

        assert_eq!(
            names,
            vec![
                "Package",
                "Version",
                "Architecture",
                "Maintainer",
                "Installed-Size",
                "Depends",
                "Suggests",
                "Filename",
                "Size",
                "MD5sum",
                "SHA1",
                "SHA256",
                "Section",
                "Priority",
                "Description",
            ]
        );

        let text = String::from_utf8(para.to_bytes()?).unwrap();
        assert!(text.starts_with("Package: foo\nVersion: 1:2.0-1\n"));
        assert!(text.ends_with("Description: a foo\n Foo does things.\n .\n More things.\n"));

        Ok(())
    }

    #[tokio::test]
    async fn extract_from_deb() -> Result<()> {
        let mut para = ControlParagraph::default();
        para.set_field_from_string("Package".into(), "hello".into());
        para.set_field_from_string("Version".into(), "2.10-2".into());
        para.set_field_from_string("Architecture".into(), "amd64".into());
        para.set_field_from_string("Depends".into(), "libc6".into());

        let mut deb = vec![];
        DebBuilder::new(para).write(&mut deb)?;

        let record = extract_record(
            futures::io::Cursor::new(deb.clone()),
            "hello_2.10-2_amd64.deb",
            pool_filename(DEFAULT_POOL_PREFIX, "hello_2.10-2_amd64.deb"),
            &DebArchiveParser,
        )
        .await?;

        assert_eq!(record.package, "hello");
        assert_eq!(record.filename, "pool/main/hello_2.10-2_amd64.deb");
        assert_eq!(record.size, deb.len() as u64);
        assert_eq!(record.digests, MultiContentDigest::from_bytes(&deb));
        assert_eq!(record.relationship(Relationship::Depends), Some("libc6"));

        Ok(())
    }

    #[tokio::test]
    async fn extract_garbage() {
        let res = extract_record(
            futures::io::Cursor::new(b"garbage".to_vec()),
            "bad.deb",
            "pool/main/bad.deb".into(),
            &DebArchiveParser,
        )
        .await;

        match res {
            Err(RepositoryError::Extraction { path, .. }) => assert_eq!(path, "bad.deb"),
            other => panic!("expected extraction error; got {:?}", other),
        }
    }
}
