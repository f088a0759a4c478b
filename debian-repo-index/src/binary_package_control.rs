// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian binary package control files. */

use {
    crate::{control::ControlParagraph, error::Result, package_version::PackageVersion},
    std::ops::{Deref, DerefMut},
};

/// A Debian binary package control file/paragraph.
///
/// See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#binary-package-control-files-debian-control>.
///
/// Binary package control files are defined by a single paragraph with well-defined
/// fields. This type is a low-level wrapper around an inner [ControlParagraph].
/// [Deref] and [DerefMut] can be used to operate on the inner [ControlParagraph].
///
/// Fields this crate needs to index a package (`Package`, `Version`, `Architecture`)
/// have getters that return [Result] and will error if a field is not present. Other
/// fields return [Option].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BinaryPackageControlFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> Deref for BinaryPackageControlFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> DerefMut for BinaryPackageControlFile<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for BinaryPackageControlFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> From<BinaryPackageControlFile<'a>> for ControlParagraph<'a> {
    fn from(cf: BinaryPackageControlFile<'a>) -> Self {
        cf.paragraph
    }
}

impl<'a> BinaryPackageControlFile<'a> {
    /// The `Package` field value.
    pub fn package(&self) -> Result<&str> {
        self.required_field_str("Package")
    }

    /// The `Version` field as its original string.
    pub fn version_str(&self) -> Result<&str> {
        self.required_field_str("Version")
    }

    /// The `Version` field parsed into a [PackageVersion].
    pub fn version(&self) -> Result<PackageVersion> {
        Ok(PackageVersion::parse(self.version_str()?)?)
    }

    /// The `Architecture` field.
    pub fn architecture(&self) -> Result<&str> {
        self.required_field_str("Architecture")
    }

    /// The `Maintainer` field.
    pub fn maintainer(&self) -> Option<&str> {
        self.field_str("Maintainer")
    }

    /// The `Description` field.
    ///
    /// The value retains its multiline formatting.
    pub fn description(&self) -> Option<&str> {
        self.field_str("Description")
    }

    /// The `Source` field.
    ///
    /// The value may carry a version qualifier, e.g. `glibc (2.31-13)`.
    pub fn source(&self) -> Option<&str> {
        self.field_str("Source")
    }

    /// The source package name, without any version qualifier.
    pub fn source_package_name(&self) -> Option<&str> {
        self.source()
            .and_then(|s| s.split_ascii_whitespace().next())
    }

    /// The `Section` field.
    pub fn section(&self) -> Option<&str> {
        self.field_str("Section")
    }

    /// The `Priority` field.
    pub fn priority(&self) -> Option<&str> {
        self.field_str("Priority")
    }

    /// The `Essential` field.
    pub fn essential(&self) -> Option<&str> {
        self.field_str("Essential")
    }

    /// The `Homepage` field.
    pub fn homepage(&self) -> Option<&str> {
        self.field_str("Homepage")
    }

    /// The `Multi-Arch` field.
    pub fn multi_arch(&self) -> Option<&str> {
        self.field_str("Multi-Arch")
    }

    /// The `Installed-Size` field, parsed to a [u64].
    ///
    /// The value is an estimate of the installed size in KiB.
    pub fn installed_size(&self) -> Option<Result<u64>> {
        self.field_u64("Installed-Size")
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{control::ControlParagraphReader, error::RepositoryError},
        indoc::indoc,
    };

    fn parse(s: &str) -> Result<BinaryPackageControlFile<'static>> {
        let mut reader = ControlParagraphReader::new(std::io::Cursor::new(s.as_bytes()));
        let paragraph = reader
            .next()
            .ok_or(RepositoryError::ControlFileNoParagraph)??;

        Ok(BinaryPackageControlFile::from(paragraph))
    }

    #[test]
    fn accessors() -> Result<()> {
        let cf = parse(indoc! {"
            Package: libzstd1
            Source: libzstd (1.4.8+dfsg-2.1)
            Version: 1.4.8+dfsg-2.1
            Architecture: amd64
            Maintainer: Debian Med Packaging Team <debian-med-packaging@lists.alioth.debian.org>
            Installed-Size: 804
            Multi-Arch: same
            Section: libs
            Priority: optional
            Homepage: https://github.com/facebook/zstd
            Description: fast lossless compression algorithm
             Zstd, short for Zstandard, is a fast lossless compression algorithm.
        "})?;

        assert_eq!(cf.package()?, "libzstd1");
        assert_eq!(cf.version()?, PackageVersion::parse("1.4.8+dfsg-2.1")?);
        assert_eq!(cf.architecture()?, "amd64");
        assert_eq!(cf.source_package_name(), Some("libzstd"));
        assert_eq!(cf.installed_size().transpose()?, Some(804));
        assert_eq!(cf.multi_arch(), Some("same"));
        assert!(cf.description().unwrap().starts_with("fast lossless"));
        assert_eq!(cf.essential(), None);

        Ok(())
    }

    #[test]
    fn required_fields() -> Result<()> {
        let cf = parse("Package: foo\nArchitecture: all\n")?;

        assert!(matches!(
            cf.version(),
            Err(RepositoryError::ControlRequiredFieldMissing("Version"))
        ));

        let cf = parse("Package: foo\nVersion: not a version\n")?;
        assert!(matches!(cf.version(), Err(RepositoryError::Version(_))));

        Ok(())
    }
}
