// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Create .deb package files and their components. */

use {
    crate::{control::ControlParagraph, deb::DebCompression, error::Result},
    digest::Digest,
    std::{
        collections::{BTreeMap, BTreeSet},
        io::{Cursor, Read, Write},
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

/// A file to be installed by a package.
#[derive(Clone, Debug)]
struct InstallFile {
    data: Vec<u8>,
    executable: bool,
}

/// A builder for a `.deb` package file.
///
/// Output is fully determined by the inputs when a modified time is set via
/// [Self::set_mtime()].
pub struct DebBuilder<'control> {
    control: ControlParagraph<'control>,

    compression: DebCompression,

    /// Files to install as part of the package, keyed by relative path.
    install_files: BTreeMap<PathBuf, InstallFile>,

    mtime: Option<SystemTime>,
}

impl<'control> DebBuilder<'control> {
    /// Construct a new instance using a control paragraph.
    pub fn new(control: ControlParagraph<'control>) -> Self {
        Self {
            control,
            compression: DebCompression::Gzip,
            install_files: BTreeMap::new(),
            mtime: None,
        }
    }

    /// Set the compression format to use.
    ///
    /// Not all compression formats are supported by all Linux distributions.
    pub fn set_compression(mut self, compression: DebCompression) -> Self {
        self.compression = compression;
        self
    }

    fn mtime(&self) -> u64 {
        self.mtime
            .unwrap_or_else(SystemTime::now)
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Set the modified time to use on archive members.
    ///
    /// If this is called, all archive members will use the specified time, helping
    /// to make archive content deterministic.
    ///
    /// If not called, the current time will be used.
    pub fn set_mtime(mut self, time: Option<SystemTime>) -> Self {
        self.mtime = time;
        self
    }

    /// Register a file as to be installed by this package.
    pub fn install_file(mut self, path: impl AsRef<Path>, data: Vec<u8>, executable: bool) -> Self {
        self.install_files
            .insert(path.as_ref().to_path_buf(), InstallFile { data, executable });
        self
    }

    /// Write `.deb` file content to a writer.
    ///
    /// This effectively materialized the `.deb` package somewhere.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mtime = self.mtime();
        let mut ar_builder = ar::Builder::new(writer);

        // First entry is a debian-binary file with static content.
        let data: &[u8] = b"2.0\n";
        let mut header = ar::Header::new(b"debian-binary".to_vec(), data.len() as _);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        ar_builder.append(&header, data)?;

        // Second entry is a control.tar with metadata.
        let control_tar = self.control_tar(mtime)?;
        let control_tar = self.compression.compress(&mut Cursor::new(control_tar))?;

        let mut header = ar::Header::new(
            format!("control.tar{}", self.compression.extension()).into_bytes(),
            control_tar.len() as _,
        );
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        ar_builder.append(&header, &*control_tar)?;

        // Third entry is a data.tar with file content.
        let mut data_tar = vec![];
        write_deb_tar(&mut data_tar, &self.install_files, mtime)?;
        let data_tar = self.compression.compress(&mut Cursor::new(data_tar))?;

        let mut header = ar::Header::new(
            format!("data.tar{}", self.compression.extension()).into_bytes(),
            data_tar.len() as _,
        );
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        ar_builder.append(&header, &*data_tar)?;

        Ok(())
    }

    /// Produce the uncompressed `control.tar` holding `control` and `md5sums`.
    fn control_tar(&self, mtime: u64) -> Result<Vec<u8>> {
        let control_data = self.control.to_bytes()?;

        let md5sums = self
            .install_files
            .iter()
            .map(|(path, file)| {
                format!(
                    "{}  {}\n",
                    hex::encode(md5::Md5::digest(&file.data)),
                    path.display()
                )
            })
            .collect::<String>();

        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("control"),
            InstallFile {
                data: control_data,
                executable: false,
            },
        );
        files.insert(
            PathBuf::from("md5sums"),
            InstallFile {
                data: md5sums.into_bytes(),
                executable: false,
            },
        );

        let mut buffer = vec![];
        write_deb_tar(&mut buffer, &files, mtime)?;

        Ok(buffer)
    }
}

fn new_tar_header(mtime: u64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(mtime);

    Ok(header)
}

fn set_header_path(
    builder: &mut tar::Builder<impl Write>,
    header: &mut tar::Header,
    path: &Path,
    is_directory: bool,
) -> Result<()> {
    // Debian archives in the wild have filenames beginning with `./`. And
    // paths ending with `/` are directories. `header.set_path()` would normalize
    // away the `./`, so the name field is written directly.
    let value = format!(
        "./{}{}",
        path.display(),
        if is_directory { "/" } else { "" }
    );
    let value_bytes = value.as_bytes();

    let name_buffer = &mut header.as_old_mut().name;

    if value_bytes.len() <= name_buffer.len() {
        name_buffer[0..value_bytes.len()].copy_from_slice(value_bytes);
    } else {
        // GNU long name extension: a preceding entry carries the full path.
        let mut long_header = tar::Header::new_gnu();
        let name = b"././@LongLink";
        long_header.as_old_mut().name[..name.len()].clone_from_slice(&name[..]);
        long_header.set_mode(0o644);
        long_header.set_uid(0);
        long_header.set_gid(0);
        long_header.set_mtime(0);
        long_header.set_size(value_bytes.len() as u64 + 1);
        long_header.set_entry_type(tar::EntryType::new(b'L'));
        long_header.set_cksum();
        let mut data = value_bytes.chain(std::io::repeat(0).take(1));
        builder.append(&long_header, &mut data)?;

        let truncated_bytes = &value_bytes[0..name_buffer.len()];
        name_buffer[0..truncated_bytes.len()].copy_from_slice(truncated_bytes);
    }

    Ok(())
}

/// Write a tar archive suitable for inclusion in a `.deb` archive.
fn write_deb_tar<W: Write>(
    writer: W,
    files: &BTreeMap<PathBuf, InstallFile>,
    mtime: u64,
) -> Result<()> {
    let mut builder = tar::Builder::new(writer);

    // Add root directory entry.
    let mut header = new_tar_header(mtime)?;
    header.set_path(Path::new("./"))?;
    header.set_mode(0o755);
    header.set_size(0);
    header.set_cksum();
    builder.append(&header, &*vec![])?;

    // And entries for each directory in the tree.
    let directories = files
        .keys()
        .flat_map(|p| p.ancestors().skip(1))
        .filter(|p| !p.as_os_str().is_empty())
        .collect::<BTreeSet<_>>();

    for directory in directories {
        let mut header = new_tar_header(mtime)?;
        set_header_path(&mut builder, &mut header, directory, true)?;
        header.set_mode(0o755);
        header.set_size(0);
        header.set_cksum();
        builder.append(&header, &*vec![])?;
    }

    // BTreeMap iteration is deterministic.
    for (rel_path, file) in files {
        let mut header = new_tar_header(mtime)?;
        set_header_path(&mut builder, &mut header, rel_path, false)?;
        header.set_mode(if file.executable { 0o755 } else { 0o644 });
        header.set_size(file.data.len() as _);
        header.set_cksum();
        builder.append(&header, &*file.data)?;
    }

    builder.finish()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> ControlParagraph<'static> {
        let mut control = ControlParagraph::default();
        control.set_field_from_string("Package".into(), "mypackage".into());
        control.set_field_from_string("Architecture".into(), "amd64".into());
        control
    }

    #[test]
    fn test_write_control_tar() -> Result<()> {
        let builder = DebBuilder::new(control())
            .set_mtime(Some(SystemTime::UNIX_EPOCH))
            .install_file("usr/bin/myapp", b"data".to_vec(), true);

        let buffer = builder.control_tar(0)?;
        let mut archive = tar::Archive::new(Cursor::new(buffer));

        for (i, entry) in archive.entries()?.enumerate() {
            let mut entry = entry?;

            let path = match i {
                0 => Path::new("./"),
                1 => Path::new("./control"),
                2 => Path::new("./md5sums"),
                _ => panic!("unexpected archive entry"),
            };

            assert_eq!(entry.path()?, path, "entry {} path matches", i);

            if i == 2 {
                let mut md5sums = String::new();
                entry.read_to_string(&mut md5sums)?;
                assert_eq!(
                    md5sums,
                    "8d777f385d3dfec8815d20f7496026dc  usr/bin/myapp\n"
                );
            }
        }

        Ok(())
    }

    #[test]
    fn test_write_data_tar_long_path() -> Result<()> {
        let long_path = PathBuf::from(format!("f{}.txt", "u".repeat(200)));

        let mut files = BTreeMap::new();
        files.insert(
            long_path,
            InstallFile {
                data: vec![42],
                executable: false,
            },
        );

        let mut buffer = vec![];
        write_deb_tar(&mut buffer, &files, 2)?;

        let mut archive = tar::Archive::new(Cursor::new(buffer));
        let paths = archive
            .entries()?
            .map(|entry| Ok(entry?.path()?.to_path_buf()))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(
            paths,
            vec![
                PathBuf::from("./"),
                PathBuf::from(format!("./f{}.txt", "u".repeat(200)))
            ]
        );

        Ok(())
    }

    #[test]
    fn test_write_deb_deterministic() -> Result<()> {
        let build = || -> Result<Vec<u8>> {
            let mut buffer = vec![];
            DebBuilder::new(control())
                .set_compression(DebCompression::Zstandard(3))
                .set_mtime(Some(SystemTime::UNIX_EPOCH))
                .install_file("usr/bin/myapp", vec![42], true)
                .write(&mut buffer)?;
            Ok(buffer)
        };

        let buffer = build()?;
        assert_eq!(buffer, build()?);

        let mut archive = ar::Archive::new(Cursor::new(buffer));
        let mut names = vec![];
        while let Some(entry) = archive.next_entry() {
            names.push(entry?.header().identifier().to_vec());
        }

        assert_eq!(
            names,
            vec![
                b"debian-binary".to_vec(),
                b"control.tar.zst".to_vec(),
                b"data.tar.zst".to_vec()
            ]
        );

        Ok(())
    }
}
