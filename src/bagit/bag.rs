use chrono::Local;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::info;
use regex::{Captures, Regex};
use snafu::ResultExt;
use tempfile::{NamedTempFile, TempDir};
use walkdir::{DirEntry, WalkDir};

use crate::bagit::consts::*;
use crate::bagit::digest::{DigestAlgorithm, HexDigest, MultiDigestWriter};
use crate::bagit::download::Downloader;
use crate::bagit::encoding::TagEncoding;
use crate::bagit::error::Error::*;
use crate::bagit::error::*;
use crate::bagit::fetch::FetchTable;
use crate::bagit::io::{delete_file_quietly, prune_empty_dirs};
use crate::bagit::manifest::{ManifestFile, ManifestKind};
use crate::bagit::paths;
use crate::bagit::serialize::{find_unpacked_bag, SerializationFormat};
use crate::bagit::tag::{
    build_payload_oxum, human_readable_size, read_bag_declaration, read_bag_info,
    write_bag_declaration, write_bag_info, BagDeclaration, BagInfo,
};
use crate::bagit::validate::{Issue, IssueLog};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct BagItVersion {
    major: u32,
    minor: u32,
}

/// The path and text services children of a bag need in order to resolve
/// manifest and fetch entries. Handed down by value so that manifests and
/// fetch tables never hold a reference back to the bag itself.
#[derive(Debug, Clone)]
pub struct BagContext {
    root: PathBuf,
    encoding: TagEncoding,
}

/// A BagIt bag under construction or loaded from disk.
///
/// Mutations mark the bag dirty; `update()` re-materializes all derived
/// state on disk and clears the flag. `validate()` materializes if needed,
/// re-reads everything from disk, and verifies it.
#[derive(Debug)]
pub struct Bag {
    root: PathBuf,
    declaration: BagDeclaration,
    payload_manifests: BTreeMap<DigestAlgorithm, ManifestFile>,
    tag_manifests: BTreeMap<DigestAlgorithm, ManifestFile>,
    bag_info: BagInfo,
    fetch: Option<FetchTable>,
    extended: bool,
    dirty: bool,
    loaded: bool,
    serialization: Option<SerializationFormat>,
    errors: Vec<Issue>,
    warnings: Vec<Issue>,
    // Owns the temp directory an archive was unpacked into so that it lives
    // as long as the bag and is removed when the bag is dropped
    _unpack_dir: Option<TempDir>,
}

#[derive(Debug)]
struct FileMeta {
    path: PathBuf,
    size_bytes: u64,
    digests: HashMap<DigestAlgorithm, HexDigest>,
}

impl BagItVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl Display for BagItVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<&str> for BagItVersion {
    type Error = Error;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        if let Some((major, minor)) = value.split_once('.') {
            let major = major.parse::<u32>().map_err(|_| InvalidBagItVersion {
                value: value.into(),
            })?;
            let minor = minor.parse::<u32>().map_err(|_| InvalidBagItVersion {
                value: value.into(),
            })?;
            Ok(BagItVersion::new(major, minor))
        } else {
            Err(InvalidBagItVersion {
                value: value.into(),
            })
        }
    }
}

impl TryFrom<String> for BagItVersion {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        TryFrom::try_from(value.as_str())
    }
}

impl BagContext {
    pub fn new<P: AsRef<Path>>(root: P, encoding: &TagEncoding) -> Self {
        Self {
            root: root.as_ref().into(),
            encoding: encoding.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn encoding(&self) -> &TagEncoding {
        &self.encoding
    }

    pub fn make_absolute<S: AsRef<str>>(&self, path: S) -> PathBuf {
        paths::make_absolute(&self.root, path)
    }

    pub fn make_relative<P: AsRef<Path>>(&self, path: P) -> String {
        paths::make_relative(&self.root, path)
    }

    pub fn decode_text(&self, bytes: &[u8]) -> Result<String> {
        self.encoding.decode(bytes)
    }

    pub fn encode_text(&self, text: &str) -> Result<Vec<u8>> {
        self.encoding.encode(text)
    }
}

impl Bag {
    /// Creates a new empty bag. The directory must not already exist. The
    /// bag starts with an empty payload and a single sha512 payload
    /// manifest, and is dirty until `update()` materializes it.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = absolutize(root.as_ref())?;
        let root = root.as_path();

        if root.exists() {
            return Err(FileAlreadyExists {
                path: root.display().to_string(),
            });
        }

        info!("Creating bag at {}", root.display());

        let data_dir = root.join(DATA);
        fs::create_dir_all(&data_dir).context(IoCreateSnafu { path: &data_dir })?;

        let declaration = BagDeclaration::new();
        write_bag_declaration(&declaration, root)?;

        let mut payload_manifests = BTreeMap::new();
        payload_manifests.insert(
            DEFAULT_ALGORITHM,
            ManifestFile::new(DEFAULT_ALGORITHM, ManifestKind::Payload),
        );

        Ok(Self {
            root: root.into(),
            declaration,
            payload_manifests,
            tag_manifests: BTreeMap::new(),
            bag_info: BagInfo::new(),
            fetch: None,
            extended: false,
            dirty: true,
            loaded: false,
            serialization: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            _unpack_dir: None,
        })
    }

    /// Loads a bag from a directory, or from an archive file with a
    /// recognized extension. Archives are unpacked into a temporary
    /// directory that lives as long as the returned bag and must contain a
    /// single top-level directory.
    ///
    /// Format problems discovered while loading are accumulated on the bag
    /// as errors and warnings rather than failing the load.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening bag at {}", path.display());

        let mut serialization = None;
        let mut unpack_dir = None;

        let root: PathBuf = if path.is_file() {
            let format =
                SerializationFormat::detect(path).ok_or_else(|| UnsupportedSerialization {
                    path: path.to_path_buf(),
                })?;
            let temp = TempDir::new().context(IoCreateSnafu {
                path: std::env::temp_dir(),
            })?;

            format.unpack(path, temp.path())?;
            let bag_root = find_unpacked_bag(temp.path())?;

            serialization = Some(format);
            unpack_dir = Some(temp);
            bag_root
        } else if path.is_dir() {
            absolutize(path)?
        } else {
            return Err(MissingSourceFile {
                path: path.to_path_buf(),
            });
        };

        let mut bag = Self {
            root,
            declaration: BagDeclaration::new(),
            payload_manifests: BTreeMap::new(),
            tag_manifests: BTreeMap::new(),
            bag_info: BagInfo::new(),
            fetch: None,
            extended: false,
            dirty: false,
            loaded: true,
            serialization,
            errors: Vec::new(),
            warnings: Vec::new(),
            _unpack_dir: unpack_dir,
        };

        bag.reload()?;
        Ok(bag)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> BagItVersion {
        self.declaration.version()
    }

    pub fn encoding(&self) -> &TagEncoding {
        self.declaration.encoding()
    }

    pub fn bag_info(&self) -> &BagInfo {
        &self.bag_info
    }

    pub fn fetch(&self) -> Option<&FetchTable> {
        self.fetch.as_ref()
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn serialization(&self) -> Option<SerializationFormat> {
        self.serialization
    }

    pub fn errors(&self) -> &[Issue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Issue] {
        &self.warnings
    }

    /// The algorithms of the installed payload manifests
    pub fn algorithms(&self) -> Vec<DigestAlgorithm> {
        self.payload_manifests.keys().copied().collect()
    }

    pub fn payload_manifest(&self, algorithm: DigestAlgorithm) -> Option<&ManifestFile> {
        self.payload_manifests.get(&algorithm)
    }

    pub fn tag_manifest(&self, algorithm: DigestAlgorithm) -> Option<&ManifestFile> {
        self.tag_manifests.get(&algorithm)
    }

    fn context(&self) -> BagContext {
        BagContext::new(&self.root, self.declaration.encoding())
    }

    fn data_dir(&self) -> PathBuf {
        self.root.join(DATA)
    }

    /// Copies a file into the payload. The destination is rooted at `data/`
    /// whether or not the prefix is supplied.
    pub fn add_file<S: AsRef<Path>, D: AsRef<str>>(&mut self, src: S, dest: D) -> Result<()> {
        let src = src.as_ref();

        if !src.is_file() {
            return Err(MissingSourceFile {
                path: src.to_path_buf(),
            });
        }

        let dest = paths::canonicalize(paths::base_in_data(dest.as_ref()));
        let absolute = self.payload_destination(&dest)?;

        if absolute.exists() {
            return Err(FileAlreadyExists { path: dest });
        }
        if let Some(fetch) = &self.fetch {
            if fetch.reserves(&dest) {
                return Err(ReservedByFetch { path: dest });
            }
        }

        let parent = absolute.parent().expect("payload file must have a parent");
        fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
        copy(src, &absolute)?;

        self.dirty = true;
        Ok(())
    }

    /// Writes the bytes to a temp file and adds it to the payload. The temp
    /// file is removed on every exit path.
    pub fn create_file<D: AsRef<str>>(&mut self, content: &[u8], dest: D) -> Result<()> {
        let mut temp = NamedTempFile::new().context(IoCreateSnafu {
            path: std::env::temp_dir(),
        })?;
        temp.write_all(content).context(IoWriteSnafu {
            path: temp.path().to_path_buf(),
        })?;
        temp.flush().context(IoWriteSnafu {
            path: temp.path().to_path_buf(),
        })?;

        self.add_file(temp.path(), dest)
    }

    /// Removes a payload file and prunes any directories the removal left
    /// empty, up to `data/`.
    pub fn remove_file<D: AsRef<str>>(&mut self, dest: D) -> Result<()> {
        let dest = paths::canonicalize(paths::base_in_data(dest.as_ref()));
        let absolute = self.payload_destination(&dest)?;

        if !absolute.is_file() {
            return Err(FileNotInBag { path: dest });
        }

        fs::remove_file(&absolute).context(IoDeleteSnafu { path: &absolute })?;

        if let Some(parent) = absolute.parent() {
            prune_empty_dirs(parent, self.data_dir())?;
        }

        self.dirty = true;
        Ok(())
    }

    /// Copies a tag file into the bag root, outside of `data/`. Makes the
    /// bag extended.
    pub fn add_tag_file<S: AsRef<Path>, D: AsRef<str>>(&mut self, src: S, dest: D) -> Result<()> {
        let src = src.as_ref();

        if !src.is_file() {
            return Err(MissingSourceFile {
                path: src.to_path_buf(),
            });
        }

        let (dest, absolute) = self.tag_destination(dest.as_ref())?;

        if absolute.exists() {
            return Err(FileAlreadyExists { path: dest });
        }

        let parent = absolute.parent().expect("tag file must have a parent");
        fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
        copy(src, &absolute)?;

        self.extended = true;
        self.dirty = true;
        Ok(())
    }

    /// Removes a tag file and prunes any directories the removal left
    /// empty, up to the bag root.
    pub fn remove_tag_file<D: AsRef<str>>(&mut self, dest: D) -> Result<()> {
        let (dest, absolute) = self.tag_destination(dest.as_ref())?;

        if !absolute.is_file() {
            return Err(FileNotInBag { path: dest });
        }

        fs::remove_file(&absolute).context(IoDeleteSnafu { path: &absolute })?;

        if let Some(parent) = absolute.parent() {
            prune_empty_dirs(parent, &self.root)?;
        }

        self.dirty = true;
        Ok(())
    }

    pub fn set_extended(&mut self, extended: bool) {
        if self.extended != extended {
            self.extended = extended;
            self.dirty = true;
        }
    }

    /// Sets the tag file character encoding, which must be in the accepted
    /// character set list. `bagit.txt` itself is always written as UTF-8.
    pub fn set_encoding<S: AsRef<str>>(&mut self, name: S) -> Result<()> {
        let encoding = TagEncoding::new(name)?;
        self.declaration.set_encoding(encoding);
        self.dirty = true;
        Ok(())
    }

    /// Installs an additional digest algorithm for the payload manifests
    /// and, when the bag is extended, the tag manifests.
    pub fn add_algorithm(&mut self, algorithm: DigestAlgorithm) -> Result<()> {
        self.payload_manifests
            .entry(algorithm)
            .or_insert_with(|| ManifestFile::new(algorithm, ManifestKind::Payload));

        if self.extended {
            self.tag_manifests
                .entry(algorithm)
                .or_insert_with(|| ManifestFile::new(algorithm, ManifestKind::Tag));
        }

        self.dirty = true;
        Ok(())
    }

    /// Uninstalls a digest algorithm. The last payload or tag algorithm
    /// cannot be removed.
    pub fn remove_algorithm(&mut self, algorithm: DigestAlgorithm) -> Result<()> {
        if self.payload_manifests.contains_key(&algorithm) && self.payload_manifests.len() == 1 {
            return Err(LastAlgorithm {
                kind: "payload".into(),
            });
        }
        if self.tag_manifests.contains_key(&algorithm) && self.tag_manifests.len() == 1 {
            return Err(LastAlgorithm { kind: "tag".into() });
        }

        self.payload_manifests.remove(&algorithm);
        self.tag_manifests.remove(&algorithm);
        self.dirty = true;
        Ok(())
    }

    pub fn set_algorithm(&mut self, algorithm: DigestAlgorithm) -> Result<()> {
        self.set_algorithms(&[algorithm])
    }

    /// Replaces the set of installed algorithms. Manifests for algorithms
    /// not in the new set are discarded, and fresh manifests are installed
    /// for the additions.
    pub fn set_algorithms(&mut self, algorithms: &[DigestAlgorithm]) -> Result<()> {
        if algorithms.is_empty() {
            return Err(LastAlgorithm {
                kind: "payload".into(),
            });
        }

        let keep: BTreeSet<DigestAlgorithm> = algorithms.iter().copied().collect();

        self.payload_manifests.retain(|a, _| keep.contains(a));
        self.tag_manifests.retain(|a, _| keep.contains(a));

        for algorithm in &keep {
            self.payload_manifests
                .entry(*algorithm)
                .or_insert_with(|| ManifestFile::new(*algorithm, ManifestKind::Payload));
            if self.extended {
                self.tag_manifests
                    .entry(*algorithm)
                    .or_insert_with(|| ManifestFile::new(*algorithm, ManifestKind::Tag));
            }
        }

        self.dirty = true;
        Ok(())
    }

    /// Adds a fetch reference and eagerly downloads it so that the next
    /// update captures its digests. Makes the bag extended.
    pub fn add_fetch_file(
        &mut self,
        url: &str,
        destination: &str,
        size: Option<u64>,
    ) -> Result<()> {
        let ctx = self.context();
        let downloader = Downloader::new()?;

        let table = self.fetch.get_or_insert_with(FetchTable::new);
        table.add(&ctx, url, destination, size, &downloader)?;

        self.extended = true;
        self.dirty = true;
        Ok(())
    }

    /// Removes a fetch reference by URL along with its local file
    pub fn remove_fetch_file(&mut self, url: &str) -> Result<()> {
        let ctx = self.context();

        match &mut self.fetch {
            Some(table) => {
                table.remove(&ctx, url)?;
                self.dirty = true;
                Ok(())
            }
            None => Err(InvalidFetchUrl {
                url: url.into(),
                details: "the bag does not have a fetch file".into(),
            }),
        }
    }

    /// Drops all fetch references, their local files, and fetch.txt itself
    pub fn clear_fetch(&mut self) -> Result<()> {
        let ctx = self.context();

        if let Some(table) = &mut self.fetch {
            table.clear_data(&ctx)?;
            self.fetch = None;
            self.dirty = true;
        }

        Ok(())
    }

    /// Adds a bag-info tag. Generated labels are rejected. Makes the bag
    /// extended.
    pub fn add_bag_info_tag<L: AsRef<str>, V: AsRef<str>>(
        &mut self,
        label: L,
        value: V,
    ) -> Result<()> {
        self.bag_info.add(label, value)?;
        self.extended = true;
        self.dirty = true;
        Ok(())
    }

    pub fn add_bag_info_tags<L: AsRef<str>, V: AsRef<str>>(
        &mut self,
        tags: &[(L, V)],
    ) -> Result<()> {
        for (label, value) in tags {
            self.add_bag_info_tag(label.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Removes all values of a bag-info tag, compared case-insensitively
    pub fn remove_bag_info_tag<S: AsRef<str>>(&mut self, label: S) {
        self.bag_info.remove(label);
        self.dirty = true;
    }

    pub fn remove_bag_info_tag_at<S: AsRef<str>>(&mut self, label: S, index: usize) -> Result<()> {
        self.bag_info.remove_at(label, index)?;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_bag_info_tag_value<S: AsRef<str>, V: AsRef<str>>(
        &mut self,
        label: S,
        value: V,
        case_sensitive: bool,
    ) {
        self.bag_info.remove_value(label, value, case_sensitive);
        self.dirty = true;
    }

    /// Upgrades a loaded, valid bag from an older BagIt version to 1.0. An
    /// md5-only bag is switched to sha512 in the process.
    pub fn upgrade(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(UpgradeNotAllowed {
                details: "only a loaded bag can be upgraded".into(),
            });
        }
        if self.version() == BAGIT_1_0 {
            return Err(UpgradeNotAllowed {
                details: format!("the bag is already at version {BAGIT_1_0}"),
            });
        }
        if !self.validate()? {
            return Err(UpgradeNotAllowed {
                details: "the bag does not validate".into(),
            });
        }

        if self.algorithms() == [DigestAlgorithm::Md5] {
            self.set_algorithms(&[DigestAlgorithm::Sha512])?;
        }

        self.declaration.set_version(BAGIT_1_0);
        self.dirty = true;
        self.update()
    }

    /// Re-materializes all derived state on disk: the declaration, payload
    /// manifests, fetch file, generated bag-info tags, and tag manifests,
    /// strictly in that order. Clears the dirty flag.
    pub fn update(&mut self) -> Result<()> {
        info!("Updating bag at {}", self.root.display());

        let data_dir = self.data_dir();
        fs::create_dir_all(&data_dir).context(IoCreateSnafu { path: &data_dir })?;

        write_bag_declaration(&self.declaration, &self.root)?;

        delete_matching_files(&self.root, &PAYLOAD_MANIFEST_MATCHER)?;
        let algorithms = self.algorithms();
        let mut payload_meta = calculate_digests(&data_dir, &algorithms, |_| true)?;
        add_data_prefix(&mut payload_meta);

        for (algorithm, manifest) in self.payload_manifests.iter_mut() {
            manifest.set_entries(manifest_entries(*algorithm, &payload_meta)?);
            manifest.write(&self.root)?;
        }

        if let Some(fetch) = &self.fetch {
            fetch.write(&self.root)?;
        }

        if self.extended {
            let (total_bytes, file_count) = self.payload_stats()?;

            self.bag_info.remove_generated();
            self.bag_info
                .add_generated(LABEL_PAYLOAD_OXUM, build_payload_oxum(total_bytes, file_count));
            self.bag_info
                .add_generated(LABEL_BAG_SIZE, human_readable_size(total_bytes));
            self.bag_info
                .add_generated(LABEL_BAGGING_DATE, current_date_str());

            write_bag_info(&self.bag_info, &self.context())?;

            delete_matching_files(&self.root, &TAG_MANIFEST_MATCHER)?;

            if self.tag_manifests.is_empty() {
                for algorithm in &algorithms {
                    self.tag_manifests
                        .insert(*algorithm, ManifestFile::new(*algorithm, ManifestKind::Tag));
                }
            }

            let tag_algorithms: Vec<DigestAlgorithm> =
                self.tag_manifests.keys().copied().collect();
            let tag_meta = calculate_digests(&self.root, &tag_algorithms, |f| {
                // Skip the payload directory and all tag manifests
                !(f.depth() == 1 && f.file_name() == DATA)
                    && f.file_name()
                        .to_str()
                        .map(|n| !TAG_MANIFEST_MATCHER.is_match(n))
                        .unwrap_or(true)
            })?;

            for (algorithm, manifest) in self.tag_manifests.iter_mut() {
                manifest.set_entries(manifest_entries(*algorithm, &tag_meta)?);
                manifest.write(&self.root)?;
            }
        } else {
            delete_file_quietly(self.root.join(BAG_INFO_TXT))?;
            delete_matching_files(&self.root, &TAG_MANIFEST_MATCHER)?;
            self.tag_manifests.clear();
        }

        self.dirty = false;
        Ok(())
    }

    /// Validates the bag, reporting every problem found through `errors()`
    /// and `warnings()`. A bag that has never been materialized, or has
    /// unsaved changes, is updated first; the state that gets verified is
    /// always re-read from disk. Fetch references are downloaded before the
    /// manifests are checked.
    pub fn validate(&mut self) -> Result<bool> {
        // Created bags start dirty, so a bag that has never been
        // materialized is updated here; a bag that has been updated is
        // verified exactly as it sits on disk
        if self.dirty {
            self.update()?;
        }

        self.reload()?;

        let ctx = self.context();
        let mut issues = IssueLog::new();

        if let Some(fetch) = &self.fetch {
            let downloader = Downloader::new()?;
            issues.merge(fetch.download_all(&ctx, &downloader)?);
        }

        for manifest in self.payload_manifests.values() {
            issues.merge(manifest.verify(&ctx)?);
        }

        if self.extended {
            for manifest in self.tag_manifests.values() {
                issues.merge(manifest.verify(&ctx)?);
                self.check_tag_manifest_rules(manifest, &mut issues)?;
            }
        }

        self.errors.extend(issues.errors().iter().cloned());
        self.warnings.extend(issues.warnings().iter().cloned());

        Ok(self.errors.is_empty())
    }

    /// Tag manifests must never list tag manifests, and should cover every
    /// tag file that exists on disk.
    fn check_tag_manifest_rules(
        &self,
        manifest: &ManifestFile,
        issues: &mut IssueLog,
    ) -> Result<()> {
        let filename = manifest.filename();

        for path in manifest.paths() {
            let basename = path.rsplit('/').next().unwrap_or(path);
            if TAG_MANIFEST_MATCHER.is_match(basename) {
                issues.error(
                    &filename,
                    format!("{path} MUST not be listed: tag manifests MUST not list any tag files"),
                );
            }
        }

        let mut unlisted = false;
        let ctx = self.context();

        for file in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|f| !(f.depth() == 1 && f.file_name() == DATA))
        {
            let file = file.context(WalkFileSnafu {})?;
            if !file.file_type().is_file() {
                continue;
            }

            let name = file.file_name().to_str().unwrap_or("");
            if TAG_MANIFEST_MATCHER.is_match(name) {
                continue;
            }

            let relative = ctx.make_relative(file.path());
            if !relative.is_empty() && !manifest.contains(&relative) {
                unlisted = true;
            }
        }

        if unlisted {
            issues.warn(
                &filename,
                "There are files on disk not listed in this manifest file.",
            );
        }

        Ok(())
    }

    /// Runs `update()` and then removes the local copies of all fetched
    /// files, leaving their manifest entries behind.
    pub fn finalize(&mut self) -> Result<()> {
        self.update()?;

        let ctx = self.context();
        if let Some(fetch) = &self.fetch {
            fetch.cleanup(&ctx)?;
        }

        Ok(())
    }

    /// Finalizes the bag and packages it into an archive whose format is
    /// chosen by the destination's extension.
    pub fn package<P: AsRef<Path>>(&mut self, dst: P) -> Result<()> {
        let dst = dst.as_ref();

        let format = SerializationFormat::detect(dst).ok_or_else(|| UnsupportedSerialization {
            path: dst.to_path_buf(),
        })?;

        self.finalize()?;
        format.pack(&self.root, dst)
    }

    /// Re-reads the entire bag from disk: declaration, payload manifests,
    /// bag info, tag manifests, then fetch. Replaces accumulated errors and
    /// warnings with whatever this read reports.
    fn reload(&mut self) -> Result<()> {
        let mut issues = IssueLog::new();

        let (declaration, declaration_issues) = read_bag_declaration(&self.root)?;
        issues.merge(declaration_issues);
        self.declaration = declaration;

        self.payload_manifests =
            load_manifests(&self.root, ManifestKind::Payload, &mut issues)?;
        if self.payload_manifests.is_empty() {
            issues.error(
                BAGIT_TXT,
                "Bag does not contain any payload manifest files",
            );
        }

        let (bag_info, info_issues) =
            read_bag_info(&self.context(), self.declaration.version())?;
        issues.merge(info_issues);
        self.bag_info = bag_info;

        // Tag manifests are read after the payload manifests so that the
        // extended flag can be derived from what is actually on disk
        self.tag_manifests = load_manifests(&self.root, ManifestKind::Tag, &mut issues)?;

        self.fetch = if self.root.join(FETCH_TXT).exists() {
            Some(FetchTable::load(&self.root)?)
        } else {
            None
        };

        self.extended = !self.bag_info.is_empty()
            || !self.tag_manifests.is_empty()
            || self.fetch.as_ref().map(|f| !f.is_empty()).unwrap_or(false);

        self.errors = issues.errors().to_vec();
        self.warnings = issues.warnings().to_vec();

        Ok(())
    }

    /// Resolves and checks a payload destination, which must stay below
    /// `data/` and must not use a reserved basename.
    fn payload_destination(&self, dest: &str) -> Result<PathBuf> {
        let ctx = self.context();
        let absolute = ctx.make_absolute(dest);
        let relative = ctx.make_relative(&absolute);

        if relative != dest || !relative.starts_with("data/") {
            return Err(PathOutsideBag { path: dest.into() });
        }
        if paths::is_reserved_basename(dest) {
            return Err(ReservedFilename { path: dest.into() });
        }

        Ok(absolute)
    }

    /// Resolves and checks a tag file destination, which must stay inside
    /// the bag root, outside `data/`, and away from the reserved tag files.
    /// `..` segments are resolved against the bag root before the checks.
    fn tag_destination(&self, dest: &str) -> Result<(String, PathBuf)> {
        let dest = paths::standardize(dest);
        let ctx = self.context();
        let absolute = ctx.make_absolute(&dest);
        let relative = ctx.make_relative(&absolute);

        if relative.is_empty() {
            return Err(PathOutsideBag { path: dest });
        }
        if relative == DATA || relative.starts_with("data/") {
            return Err(ReservedFilename { path: dest });
        }
        if [BAGIT_TXT, BAG_INFO_TXT, FETCH_TXT].contains(&relative.as_str())
            || relative.starts_with("manifest-")
            || relative.starts_with("tagmanifest-")
        {
            return Err(ReservedFilename { path: dest });
        }

        Ok((relative, absolute))
    }

    /// Total size and count of the payload, taken over the union of every
    /// path listed in any payload manifest. Sizes are read from disk, and
    /// missing files are skipped.
    fn payload_stats(&self) -> Result<(u64, u64)> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for manifest in self.payload_manifests.values() {
            seen.extend(manifest.paths());
        }

        let mut total_bytes = 0;
        let mut file_count = 0;

        for path in seen {
            let absolute = self.context().make_absolute(path);
            match fs::metadata(&absolute) {
                Ok(meta) if meta.is_file() => {
                    total_bytes += meta.len();
                    file_count += 1;
                }
                Ok(_) => (),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => {
                    return Err(IoStat {
                        source: e,
                        path: absolute,
                    })
                }
            }
        }

        Ok((total_bytes, file_count))
    }
}

/// Reads all of the manifests of one kind in the bag root. Manifests naming
/// an unknown algorithm are reported as errors and skipped.
fn load_manifests<P: AsRef<Path>>(
    base_dir: P,
    kind: ManifestKind,
    issues: &mut IssueLog,
) -> Result<BTreeMap<DigestAlgorithm, ManifestFile>> {
    let base_dir = base_dir.as_ref();
    let matcher = match kind {
        ManifestKind::Payload => &PAYLOAD_MANIFEST_MATCHER,
        ManifestKind::Tag => &TAG_MANIFEST_MATCHER,
    };

    let mut algorithms = Vec::new();

    for_matching_files(base_dir, matcher, |_, captures| {
        let filename = captures.get(0).unwrap().as_str().to_string();
        let algorithm_str = captures.get(1).unwrap().as_str();
        match DigestAlgorithm::try_from(algorithm_str) {
            Ok(algorithm) => algorithms.push(algorithm),
            Err(_) => issues.error(
                filename,
                format!("Unsupported digest algorithm: {algorithm_str}"),
            ),
        }
    })?;

    let mut manifests = BTreeMap::new();

    for algorithm in algorithms {
        let manifest = ManifestFile::load(base_dir, algorithm, kind)?;
        manifests.insert(algorithm, manifest);
    }

    Ok(manifests)
}

/// Builds one algorithm's manifest entries out of the combined file meta
fn manifest_entries(
    algorithm: DigestAlgorithm,
    file_meta: &[FileMeta],
) -> Result<BTreeMap<String, HexDigest>> {
    let mut entries = BTreeMap::new();

    for meta in file_meta {
        let path = meta.path.to_str().ok_or_else(|| InvalidUtf8Path {
            path: meta.path.to_path_buf(),
        })?;
        let digest = meta
            .digests
            .get(&algorithm)
            .expect("Missing expected file digest");
        entries.insert(paths::standardize(path), digest.clone());
    }

    Ok(entries)
}

/// Calculates the digests for all of the files under the `base_dir`
fn calculate_digests<D, P>(
    base_dir: D,
    algorithms: &[DigestAlgorithm],
    predicate: P,
) -> Result<Vec<FileMeta>>
where
    D: AsRef<Path>,
    P: FnMut(&DirEntry) -> bool,
{
    let base_dir = base_dir.as_ref();
    let mut file_meta = Vec::new();

    for file in WalkDir::new(base_dir).into_iter().filter_entry(predicate) {
        let file = file.context(WalkFileSnafu {})?;

        if file.file_type().is_file() {
            let metadata = file.metadata().context(WalkFileSnafu {})?;

            info!("Calculating digests for {}", file.path().display());

            let mut writer = MultiDigestWriter::new(algorithms, io::sink());
            let mut reader = File::open(file.path()).context(IoReadSnafu { path: file.path() })?;

            io::copy(&mut reader, &mut writer).context(IoReadSnafu { path: file.path() })?;

            file_meta.push(FileMeta {
                path: file.path().strip_prefix(base_dir).unwrap().to_path_buf(),
                size_bytes: metadata.len(),
                digests: writer.finalize_hex(),
            });
        }
    }

    Ok(file_meta)
}

/// Prefixes all payload files with `data/`
fn add_data_prefix(file_meta: &mut [FileMeta]) {
    let relative_data_dir = PathBuf::from(DATA);

    for meta in file_meta {
        meta.path = relative_data_dir.join(&meta.path);
    }
}

fn copy<F: AsRef<Path>, T: AsRef<Path>>(from: F, to: T) -> Result<()> {
    let from = from.as_ref();
    let to = to.as_ref();
    info!("Copying {} to {}", from.display(), to.display());
    fs::copy(from, to)
        .map(|_| ())
        .context(IoCopySnafu { from, to })
}

/// Deletes the files in the base directory whose names match the regex
fn delete_matching_files<P: AsRef<Path>>(base_dir: P, file_regex: &Regex) -> Result<()> {
    let mut doomed = Vec::new();

    for_matching_files(base_dir, file_regex, |path, _| {
        doomed.push(path.to_path_buf());
    })?;

    for path in doomed {
        info!("Deleting file {}", path.display());
        delete_file_quietly(path)?;
    }

    Ok(())
}

/// Iterates the files in a directory and applies `on_match` to the ones with file names that match
/// `file_regex`. `on_match` receives the path to the matched file as well as the captures from the
/// match.
fn for_matching_files<P, M>(base_dir: P, file_regex: &Regex, mut on_match: M) -> Result<()>
where
    P: AsRef<Path>,
    M: FnMut(&Path, &Captures),
{
    let base_dir = base_dir.as_ref();

    for file in fs::read_dir(base_dir).context(IoReadDirSnafu { path: base_dir })? {
        let file = file.context(IoReadDirSnafu { path: base_dir })?;
        if file
            .file_type()
            .context(IoStatSnafu { path: file.path() })?
            .is_file()
        {
            if let Some(file_name) = file.file_name().to_str() {
                if let Some(captures) = file_regex.captures(file_name) {
                    on_match(&file.path(), &captures);
                }
            }
        }
    }

    Ok(())
}

fn current_date_str() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Resolves a caller-supplied bag root to an absolute path. All internal
/// path comparisons rely on the root being absolute.
fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.into());
    }

    let joined = std::env::current_dir()
        .context(IoGeneralSnafu {})?
        .join(path);

    Ok(PathBuf::from(paths::canonicalize(
        joined.to_string_lossy(),
    )))
}
