use log::info;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;

use crate::bagit::bag::BagContext;
use crate::bagit::consts::*;
use crate::bagit::digest::{DigestAlgorithm, HexDigest};
use crate::bagit::encoding::{percent_decode, percent_encode};
use crate::bagit::error::*;
use crate::bagit::io::{is_space_or_tab, replace_file, LineReader};
use crate::bagit::paths;
use crate::bagit::validate::{Issue, IssueLog};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ManifestKind {
    Payload,
    Tag,
}

/// A single payload or tag manifest: the digests of a set of files, as
/// calculated by one algorithm.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    algorithm: DigestAlgorithm,
    kind: ManifestKind,
    entries: BTreeMap<String, HexDigest>,
    load_errors: Vec<Issue>,
}

impl ManifestKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ManifestKind::Payload => PAYLOAD_MANIFEST_PREFIX,
            ManifestKind::Tag => TAG_MANIFEST_PREFIX,
        }
    }
}

impl ManifestFile {
    pub fn new(algorithm: DigestAlgorithm, kind: ManifestKind) -> Self {
        Self {
            algorithm,
            kind,
            entries: BTreeMap::new(),
            load_errors: Vec::new(),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    pub fn filename(&self) -> String {
        format!("{}-{}.txt", self.kind.prefix(), self.algorithm)
    }

    pub fn entries(&self) -> &BTreeMap<String, HexDigest> {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|p| p.as_str())
    }

    pub fn contains<S: AsRef<str>>(&self, path: S) -> bool {
        self.entries.contains_key(path.as_ref())
    }

    /// Replaces all of the entries with freshly computed digests
    pub fn set_entries(&mut self, entries: BTreeMap<String, HexDigest>) {
        self.entries = entries;
        self.load_errors.clear();
    }

    pub fn insert_entry<S: AsRef<str>>(&mut self, path: S, digest: HexDigest) {
        self.entries.insert(paths::standardize(path), digest);
    }

    /// Parses a manifest from the bag. Lines that cannot be understood are
    /// recorded as load errors and surfaced when the manifest is verified;
    /// they do not fail the load.
    pub fn load<P: AsRef<Path>>(
        base_dir: P,
        algorithm: DigestAlgorithm,
        kind: ManifestKind,
    ) -> Result<Self> {
        let mut manifest = Self::new(algorithm, kind);
        let filename = manifest.filename();
        let path = base_dir.as_ref().join(&filename);

        info!("Reading manifest {}", path.display());

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(manifest),
            Err(e) => return Err(Error::IoRead { source: e, path }),
        };

        let mut num = 0;

        for line in LineReader::new(BufReader::new(file)) {
            let line = line?;
            num += 1;

            if line.trim().is_empty() {
                continue;
            }

            let (digest, raw_path) = match split_manifest_line(&line) {
                Some(parts) => parts,
                None => {
                    manifest.load_errors.push(Issue::new(
                        &filename,
                        format!("Line {num} is not of the form 'digest path'"),
                    ));
                    continue;
                }
            };

            let decoded = match percent_decode(raw_path) {
                Ok(decoded) => paths::standardize(decoded),
                Err(e) => {
                    manifest
                        .load_errors
                        .push(Issue::new(&filename, format!("Line {num}: {e}")));
                    continue;
                }
            };

            if manifest.entries.contains_key(&decoded) {
                manifest.load_errors.push(Issue::new(
                    &filename,
                    format!("Line {num}: path {decoded} appears in the manifest multiple times"),
                ));
                continue;
            }

            manifest.entries.insert(decoded, HexDigest::from(digest));
        }

        Ok(manifest)
    }

    /// Deletes any existing manifest file and writes the entries back out,
    /// percent encoded and sorted by path.
    pub fn write<P: AsRef<Path>>(&self, base_dir: P) -> Result<()> {
        let path = base_dir.as_ref().join(self.filename());
        info!("Writing manifest {}", path.display());

        let mut content = String::new();

        for (entry_path, digest) in &self.entries {
            let encoded = percent_encode(entry_path);
            content.push_str(&format!("{digest}  {encoded}{LINE_ENDING}"));
        }

        replace_file(path, content.as_bytes())
    }

    /// Verifies every entry against the files on disk. Load errors are
    /// surfaced first, then each entry is resolved, hashed, and compared.
    pub fn verify(&self, ctx: &BagContext) -> Result<IssueLog> {
        let mut issues = IssueLog::new();
        let filename = self.filename();

        for error in &self.load_errors {
            issues.add_error(error.clone());
        }

        for (entry_path, expected) in &self.entries {
            let absolute = ctx.make_absolute(entry_path);
            let relative = ctx.make_relative(&absolute);

            let inside = match self.kind {
                ManifestKind::Payload => relative.starts_with("data/"),
                ManifestKind::Tag => !relative.is_empty(),
            };

            if !inside {
                issues.error(
                    &filename,
                    format!("{entry_path} resolves to a path outside of the data/ directory"),
                );
                continue;
            }

            if !absolute.exists() {
                issues.error(&filename, format!("{entry_path} does not exist"));
                continue;
            }

            let actual = self.algorithm.hash_file(&absolute)?;

            if &actual != expected {
                issues.error(
                    &filename,
                    format!(
                        "{entry_path} calculated hash ({actual}) does not match manifest ({expected})"
                    ),
                );
            }
        }

        Ok(issues)
    }
}

/// Splits `<digest> <path>` on the first run of spaces or tabs
fn split_manifest_line(line: &str) -> Option<(&str, &str)> {
    let sep = line.find(is_space_or_tab)?;
    let digest = &line[..sep];
    let path = line[sep..].trim_start_matches(is_space_or_tab);

    if digest.is_empty() || path.is_empty() {
        return None;
    }

    // A leading * marked binary mode in old checksum tools and is ignored
    Some((digest, path.strip_prefix('*').unwrap_or(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn load_from(content: &str) -> ManifestFile {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("manifest-sha256.txt"), content).unwrap();
        ManifestFile::load(temp.path(), DigestAlgorithm::Sha256, ManifestKind::Payload).unwrap()
    }

    #[test]
    fn parses_star_and_tab_separated_lines() {
        let manifest = load_from("ABC123  *data/a.txt\ndef456\tdata/b.txt\n\n");

        assert!(manifest.load_errors.is_empty());
        assert_eq!(2, manifest.entries().len());
        assert_eq!(
            "abc123",
            manifest.entries().get("data/a.txt").unwrap().as_str()
        );
        assert!(manifest.contains("data/b.txt"));
    }

    #[test]
    fn duplicate_paths_keep_the_first_entry() {
        let manifest = load_from("aaa  data/a.txt\nbbb  data/a.txt\n");

        assert_eq!(1, manifest.entries().len());
        assert_eq!("aaa", manifest.entries().get("data/a.txt").unwrap().as_str());
        assert_eq!(1, manifest.load_errors.len());
        assert!(manifest.load_errors[0]
            .message()
            .contains("appears in the manifest multiple times"));
    }

    #[test]
    fn invalid_percent_triplets_are_load_errors() {
        let manifest = load_from("aaa  data/file%20name.txt\nbbb  data/ok%0A.txt\n");

        assert_eq!(1, manifest.entries().len());
        assert!(manifest.contains("data/ok\n.txt"));
        assert_eq!(1, manifest.load_errors.len());
    }

    #[test]
    fn lines_without_a_separator_are_load_errors() {
        let manifest = load_from("aaabbbccc\n");

        assert!(manifest.entries().is_empty());
        assert_eq!(1, manifest.load_errors.len());
    }

    #[test]
    fn write_then_load_round_trips_entries() {
        let temp = TempDir::new().unwrap();
        let mut manifest = ManifestFile::new(DigestAlgorithm::Sha512, ManifestKind::Payload);
        manifest.insert_entry("data/plain.txt", HexDigest::from("AAA111"));
        manifest.insert_entry("data/with\nnewline.txt", HexDigest::from("bbb222"));
        manifest.insert_entry("data/with%percent.txt", HexDigest::from("ccc333"));

        manifest.write(temp.path()).unwrap();

        let written = fs::read_to_string(temp.path().join("manifest-sha512.txt")).unwrap();
        assert!(written.contains("data/with%0Anewline.txt"));
        assert!(written.contains("data/with%25percent.txt"));

        let reloaded =
            ManifestFile::load(temp.path(), DigestAlgorithm::Sha512, ManifestKind::Payload)
                .unwrap();
        assert_eq!(manifest.entries(), reloaded.entries());
    }
}
