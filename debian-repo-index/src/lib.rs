// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository index generation.

This crate turns a collection of `.deb` files into the metadata `apt` needs to
consume them as a repository: a `Packages` index per architecture and a
`Release` manifest describing those indices.

The canonical home of this crate is <https://github.com/indygreg/PyOxidizer>. Please file issues
and pull requests there.

# Determinism

Given the same set of `.deb` files and the same clock, every generated byte is
identical across runs. Archives are enumerated in a stable order and the order
in which concurrent reads complete has no effect on the output.

# A Tour of Functionality

A `.deb` file defines a Debian package. The [deb] module reads them. Its
[deb::ArchiveParser] trait is how the rest of the crate obtains a package's
`control` paragraph, with [deb::DebArchiveParser] as the implementation for real
`.deb` files. [deb::builder::DebBuilder] creates `.deb` files.

Control files consist of *paragraphs* of key-value metadata. The [control] module
defines [control::ControlParagraph] and friends. [binary_package_control::BinaryPackageControlFile]
adds accessors for the fields of a binary package.

[package_version::PackageVersion] implements Debian version parsing and ordering.

[package_record::PackageRecord] is what a `Packages` index knows about a single
archive. [package_record::extract_record()] derives one from an archive's bytes in
a single pass that also computes the size and digests of those bytes.

The [resolver] module groups records by package, architecture and version in a
[resolver::PackageSet] and selects the latest version of each package.

The [repository] module ties everything together. [repository::Repository] scans an
[repository::backend::ArchiveBackend], generates `Packages` documents with
[repository::index] and a `Release` manifest with [repository::release], and
publishes them as an immutable [repository::Snapshot].
[repository::filesystem::FilesystemBackend] reads archives from a directory and
[repository::filesystem::FilesystemPublisher] writes a snapshot back out.

[signing::ManifestSigner] signs manifests. [signing::PgpSigner] implements it with
a PGP key.
*/

pub mod binary_package_control;
pub mod control;
pub mod deb;
pub mod error;
pub mod io;
pub mod package_record;
pub mod package_version;
pub mod repository;
pub mod resolver;
pub mod signing;
