// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! .deb file reading functionality. */

use {
    crate::{
        binary_package_control::BinaryPackageControlFile,
        control::ControlParagraphReader,
        error::{RepositoryError, Result},
    },
    std::{
        io::{Cursor, Read},
        ops::{Deref, DerefMut},
    },
};

fn reader_from_filename(extension: &str, data: Cursor<Vec<u8>>) -> Result<Box<dyn Read>> {
    match extension {
        "" => Ok(Box::new(data)),
        ".gz" => Ok(Box::new(libflate::gzip::Decoder::new(data)?)),
        ".xz" => Ok(Box::new(xz2::read::XzDecoder::new(data))),
        ".zst" => Ok(Box::new(zstd::Decoder::new(data)?)),
        _ => Err(RepositoryError::DebUnknownCompression(extension.to_string())),
    }
}

/// A reader of .deb files.
///
/// A .deb binary package file is an ar archive with 3 entries:
///
/// 1. `debian-binary` holding the version of the binary package format.
/// 2. `control.tar` holding package metadata.
/// 3. `data.tar[.<ext>]` holding file content.
pub struct BinaryPackageReader<R: Read> {
    archive: ar::Archive<R>,
}

impl<R: Read> BinaryPackageReader<R> {
    /// Construct a new instance from a reader.
    pub fn new(reader: R) -> Self {
        Self {
            archive: ar::Archive::new(reader),
        }
    }

    /// Obtain the next entry from the underlying ar archive.
    ///
    /// The entry will be converted to an enum that richly represents its content.
    pub fn next_entry(&mut self) -> Option<Result<BinaryPackageEntry>> {
        let mut entry = match self.archive.next_entry()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };

        // Member names should be ASCII, so converting to strings is reasonably safe.
        let filename = String::from_utf8_lossy(entry.header().identifier()).to_string();

        let mut data = vec![];
        if let Err(e) = entry.read_to_end(&mut data) {
            return Some(Err(e.into()));
        }

        let data = Cursor::new(data);

        Some(if filename == "debian-binary" {
            Ok(BinaryPackageEntry::DebianBinary(data))
        } else if let Some(tail) = filename.strip_prefix("control.tar") {
            reader_from_filename(tail, data).map(|res| {
                BinaryPackageEntry::Control(ControlTarReader {
                    archive: tar::Archive::new(res),
                })
            })
        } else if let Some(tail) = filename.strip_prefix("data.tar") {
            reader_from_filename(tail, data).map(|res| {
                BinaryPackageEntry::Data(DataTarReader {
                    archive: tar::Archive::new(res),
                })
            })
        } else {
            Err(RepositoryError::DebUnknownBinaryPackageEntry(filename))
        })
    }
}

/// Represents an entry in a .deb archive.
pub enum BinaryPackageEntry {
    /// The `debian-binary` file.
    DebianBinary(Cursor<Vec<u8>>),
    /// The `control.tar` tar archive.
    Control(ControlTarReader),
    /// The `data.tar[.<ext>]` tar archive.
    Data(DataTarReader),
}

/// A reader for `control.tar` files.
pub struct ControlTarReader {
    archive: tar::Archive<Box<dyn Read>>,
}

impl Deref for ControlTarReader {
    type Target = tar::Archive<Box<dyn Read>>;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

impl DerefMut for ControlTarReader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.archive
    }
}

impl ControlTarReader {
    /// Find and parse the `control` file in this archive.
    ///
    /// Other members (maintainer scripts, `md5sums`, ...) are skipped.
    pub fn control_file(&mut self) -> Result<Option<BinaryPackageControlFile<'static>>> {
        for entry in self.archive.entries()? {
            let mut entry = entry?;

            let path_bytes = entry.path_bytes().to_vec();
            let path = String::from_utf8_lossy(&path_bytes);

            if path.trim_start_matches("./") != "control" {
                continue;
            }

            let mut data = vec![];
            entry.read_to_end(&mut data)?;

            let mut reader = ControlParagraphReader::new(Cursor::new(data));
            let paragraph = reader
                .next()
                .ok_or(RepositoryError::ControlFileNoParagraph)??;

            return Ok(Some(BinaryPackageControlFile::from(paragraph)));
        }

        Ok(None)
    }
}

/// A reader for `data.tar` files.
pub struct DataTarReader {
    archive: tar::Archive<Box<dyn Read>>,
}

impl Deref for DataTarReader {
    type Target = tar::Archive<Box<dyn Read>>;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

impl DerefMut for DataTarReader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.archive
    }
}

/// Resolve the `control` file from the `control.tar` file within a `.deb` archive.
pub fn resolve_control_file(reader: impl Read) -> Result<BinaryPackageControlFile<'static>> {
    let mut reader = BinaryPackageReader::new(reader);

    while let Some(entry) = reader.next_entry() {
        if let BinaryPackageEntry::Control(mut control) = entry? {
            if let Some(control) = control.control_file()? {
                return Ok(control);
            }
        }
    }

    Err(RepositoryError::ControlFileNotFound)
}
