// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Grouping of package records and selection of the latest versions.

Records are grouped by package name, then architecture, then version. Each level
owns the level below it, so a [PackageSet] can be built off to the side and
swapped in whole.

At most one record exists per package, architecture and version. When a second
record arrives for an occupied slot, the first one is kept and the second is
returned to the caller as a [DuplicatePackage]. Which record wins therefore
depends on insertion order, and callers wanting reproducible output must insert
in a stable order.
*/

use {
    crate::{package_record::PackageRecord, package_version::PackageVersion},
    log::warn,
    std::collections::{btree_map::Entry, BTreeMap, BTreeSet},
};

/// A record that was rejected because its package, architecture and version were taken.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DuplicatePackage {
    pub package: String,
    pub architecture: String,
    pub version: PackageVersion,
    /// `Filename` of the record that was kept.
    pub kept: String,
    /// `Filename` of the record that was dropped.
    pub dropped: String,
}

/// All known records for a single package name.
#[derive(Clone, Debug, Default)]
pub struct LogicalPackage {
    name: String,
    architectures: BTreeMap<String, BTreeMap<PackageVersion, PackageRecord>>,
}

impl LogicalPackage {
    /// Construct an empty instance for a package name.
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            architectures: BTreeMap::new(),
        }
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a record, keeping any existing record for the same architecture and version.
    ///
    /// Returns the rejected record's details if the slot was already occupied.
    pub fn insert(&mut self, record: PackageRecord) -> Option<DuplicatePackage> {
        let versions = self
            .architectures
            .entry(record.architecture.clone())
            .or_default();

        match versions.entry(record.version.clone()) {
            Entry::Occupied(existing) => Some(DuplicatePackage {
                package: record.package,
                architecture: record.architecture,
                version: record.version,
                kept: existing.get().filename.clone(),
                dropped: record.filename,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                None
            }
        }
    }

    /// Architectures this package has records for.
    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.architectures.keys().map(|x| x.as_str())
    }

    /// All records for an architecture, in ascending version order.
    pub fn versions(&self, architecture: &str) -> impl Iterator<Item = &PackageRecord> {
        self.architectures
            .get(architecture)
            .into_iter()
            .flat_map(|versions| versions.values())
    }

    /// The record with the highest version for an architecture.
    pub fn latest(&self, architecture: &str) -> Option<&PackageRecord> {
        self.architectures
            .get(architecture)
            .and_then(|versions| versions.values().next_back())
    }

    /// Total number of records across all architectures.
    pub fn record_count(&self) -> usize {
        self.architectures.values().map(|v| v.len()).sum()
    }

    /// Iterate over every record of this package.
    pub fn iter_records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.architectures.values().flat_map(|v| v.values())
    }
}

/// The complete set of logical packages known to a repository.
#[derive(Clone, Debug, Default)]
pub struct PackageSet {
    packages: BTreeMap<String, LogicalPackage>,
}

impl PackageSet {
    /// Build a set from records, in iteration order.
    ///
    /// Returns the set and every record that was rejected as a duplicate.
    pub fn from_records(
        records: impl IntoIterator<Item = PackageRecord>,
    ) -> (Self, Vec<DuplicatePackage>) {
        let mut set = Self::default();

        let duplicates = records
            .into_iter()
            .filter_map(|record| set.insert(record))
            .collect::<Vec<_>>();

        (set, duplicates)
    }

    /// Add a record to the set.
    ///
    /// If a record for the same package, architecture and version is already present
    /// the incoming record is dropped and its details are returned.
    ///
    /// This is the only place a duplicate is logged: one `warn!` line per returned
    /// [DuplicatePackage]. Callers report the returned values and do not log them again.
    pub fn insert(&mut self, record: PackageRecord) -> Option<DuplicatePackage> {
        let duplicate = self
            .packages
            .entry(record.package.clone())
            .or_insert_with(|| LogicalPackage::new(&record.package))
            .insert(record);

        if let Some(dup) = &duplicate {
            warn!(
                "duplicate package/arch/version {}/{}/{}; keeping {}, ignoring {}",
                dup.package, dup.architecture, dup.version, dup.kept, dup.dropped
            );
        }

        duplicate
    }

    /// Fold another set into this one.
    ///
    /// Records already present in `self` win over records from `other`.
    pub fn merge(&mut self, other: PackageSet) -> Vec<DuplicatePackage> {
        other
            .packages
            .into_values()
            .flat_map(|package| package.architectures.into_values())
            .flat_map(|versions| versions.into_values())
            .filter_map(|record| self.insert(record))
            .collect()
    }

    /// Whether the set holds no packages.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Number of distinct package names.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Total number of records across all packages.
    pub fn record_count(&self) -> usize {
        self.packages.values().map(|p| p.record_count()).sum()
    }

    /// Obtain a logical package by name.
    pub fn get(&self, name: &str) -> Option<&LogicalPackage> {
        self.packages.get(name)
    }

    /// Iterate over logical packages, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &LogicalPackage> {
        self.packages.values()
    }

    /// Iterate over every record in the set.
    pub fn iter_records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values().flat_map(|p| p.iter_records())
    }

    /// The set of architectures observed across all packages.
    pub fn architectures(&self) -> BTreeSet<String> {
        self.packages
            .values()
            .flat_map(|p| p.architectures())
            .map(|a| a.to_string())
            .collect()
    }

    /// The latest record of every package for an architecture, ordered by package name.
    ///
    /// Packages without records for the architecture are skipped.
    pub fn latest_for_architecture<'a>(
        &'a self,
        architecture: &'a str,
    ) -> impl Iterator<Item = &'a PackageRecord> + 'a {
        self.packages
            .values()
            .filter_map(move |p| p.latest(architecture))
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::io::MultiContentDigest,
        std::collections::BTreeMap,
    };

    fn record(package: &str, version: &str, architecture: &str) -> PackageRecord {
        let filename = format!("pool/main/{}_{}_{}.deb", package, version, architecture);

        PackageRecord {
            package: package.to_string(),
            source: None,
            version: PackageVersion::parse(version).unwrap(),
            architecture: architecture.to_string(),
            essential: None,
            maintainer: None,
            installed_size: None,
            relationships: BTreeMap::new(),
            digests: MultiContentDigest::from_bytes(filename.as_bytes()),
            size: filename.len() as u64,
            filename,
            section: None,
            priority: None,
            multi_arch: None,
            homepage: None,
            description: None,
        }
    }

    #[test]
    fn latest_wins() {
        let (set, duplicates) = PackageSet::from_records(vec![
            record("foo", "2.0", "amd64"),
            record("foo", "1.0", "amd64"),
            record("foo", "10.0~rc1", "amd64"),
            record("foo", "1:0.1", "arm64"),
            record("foo", "3.0", "arm64"),
            record("bar", "0.1", "amd64"),
        ]);

        assert!(duplicates.is_empty());
        assert_eq!(set.len(), 2);
        assert_eq!(set.record_count(), 6);

        let amd64 = set
            .latest_for_architecture("amd64")
            .map(|r| (r.package.as_str(), r.version.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(
            amd64,
            vec![("bar", "0.1".to_string()), ("foo", "10.0~rc1".to_string())]
        );

        let arm64 = set
            .latest_for_architecture("arm64")
            .map(|r| r.version.to_string())
            .collect::<Vec<_>>();
        assert_eq!(arm64, vec!["1:0.1".to_string()]);

        assert!(set.latest_for_architecture("i386").next().is_none());
        assert_eq!(
            set.architectures().into_iter().collect::<Vec<_>>(),
            vec!["amd64".to_string(), "arm64".to_string()]
        );
    }

    #[test]
    fn first_duplicate_kept() {
        let mut first = record("foo", "1.0", "amd64");
        first.filename = "pool/main/a/foo.deb".into();
        let mut second = record("foo", "1.0", "amd64");
        second.filename = "pool/main/b/foo.deb".into();
        let mut third = record("foo", "1.00", "amd64");
        third.filename = "pool/main/c/foo.deb".into();

        let (set, duplicates) = PackageSet::from_records(vec![first, second, third]);

        assert_eq!(duplicates.len(), 2);
        assert!(duplicates
            .iter()
            .all(|d| d.kept == "pool/main/a/foo.deb" && d.package == "foo"));
        assert_eq!(duplicates[0].dropped, "pool/main/b/foo.deb");
        assert_eq!(duplicates[1].dropped, "pool/main/c/foo.deb");

        assert_eq!(set.record_count() + duplicates.len(), 3);

        let foo = set.get("foo").unwrap();
        assert_eq!(foo.record_count(), 1);
        assert_eq!(foo.latest("amd64").unwrap().filename, "pool/main/a/foo.deb");
    }

    #[test]
    fn same_version_different_architectures() {
        let (set, duplicates) = PackageSet::from_records(vec![
            record("foo", "1.0", "amd64"),
            record("foo", "1.0", "arm64"),
            record("foo", "1.0", "all"),
        ]);

        assert!(duplicates.is_empty());
        assert_eq!(
            set.get("foo").unwrap().architectures().collect::<Vec<_>>(),
            vec!["all", "amd64", "arm64"]
        );
    }

    #[test]
    fn merge_keeps_existing() {
        let (mut left, left_duplicates) =
            PackageSet::from_records(vec![record("foo", "1.0", "amd64")]);
        assert!(left_duplicates.is_empty());

        let mut conflicting = record("foo", "1.0", "amd64");
        conflicting.filename = "pool/main/other.deb".into();
        let (right, right_duplicates) =
            PackageSet::from_records(vec![conflicting, record("foo", "2.0", "amd64")]);
        assert!(right_duplicates.is_empty());

        let duplicates = left.merge(right);

        // One duplicate reported for the one record dropped.
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].dropped, "pool/main/other.deb");
        assert_eq!(duplicates[0].kept, "pool/main/foo_1.0_amd64.deb");
        assert_eq!(left.record_count() + duplicates.len(), 3);
        assert_eq!(
            left.get("foo")
                .unwrap()
                .versions("amd64")
                .map(|r| r.version.to_string())
                .collect::<Vec<_>>(),
            vec!["1.0".to_string(), "2.0".to_string()]
        );
    }

    #[test]
    fn chosen_record_is_maximum() {
        // Exhaustively check that the chosen record is the maximum over several orderings.
        let versions = ["1.0", "1.0-1", "1.0~b1", "0:2", "1:0", "2.0+dfsg"];

        for rotation in 0..versions.len() {
            let mut ordered = versions.to_vec();
            ordered.rotate_left(rotation);

            let (set, _) = PackageSet::from_records(
                ordered.iter().map(|v| record("foo", v, "amd64")),
            );

            let chosen = set.latest_for_architecture("amd64").next().unwrap();
            let max = versions
                .iter()
                .map(|v| PackageVersion::parse(v).unwrap())
                .max()
                .unwrap();

            assert_eq!(chosen.version, max);
            assert_eq!(chosen.version.to_string(), "1:0");
        }
    }
}
