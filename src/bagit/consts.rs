use crate::bagit::bag::BagItVersion;
use crate::bagit::DigestAlgorithm;
use once_cell::sync::Lazy;
use regex::Regex;

pub static PAYLOAD_MANIFEST_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^manifest-([[:alnum:]]+)\.txt$").unwrap());
pub static TAG_MANIFEST_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tagmanifest-([[:alnum:]]+)\.txt$").unwrap());

/// Basenames Windows refuses to create, rejected on every platform
pub static WINDOWS_RESERVED_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$").unwrap());

pub const BAGKIT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const BAGIT_1_0: BagItVersion = BagItVersion::new(1, 0);
pub const BAGIT_DEFAULT_VERSION: BagItVersion = BAGIT_1_0;

pub const DEFAULT_ALGORITHM: DigestAlgorithm = DigestAlgorithm::Sha512;

pub const UTF_8: &str = "UTF-8";

/// Character sets accepted for `Tag-File-Character-Encoding`, by IANA MIME name
pub const CHARACTER_SETS: [&str; 26] = [
    "UTF-8",
    "UTF-16",
    "US-ASCII",
    "ISO-8859-1",
    "ISO-8859-2",
    "ISO-8859-3",
    "ISO-8859-4",
    "ISO-8859-5",
    "ISO-8859-6",
    "ISO-8859-7",
    "ISO-8859-8",
    "ISO-8859-9",
    "ISO-8859-10",
    "Shift_JIS",
    "EUC-JP",
    "ISO-2022-KR",
    "EUC-KR",
    "ISO-2022-JP",
    "ISO-2022-JP-2",
    "ISO-8859-6-E",
    "ISO-8859-6-I",
    "ISO-8859-8-E",
    "ISO-8859-8-I",
    "GB2312",
    "Big5",
    "KOI8-R",
];

pub const CR: char = '\r';
pub const LF: char = '\n';
pub const TAB: char = '\t';
pub const SPACE: char = ' ';
pub const CR_B: u8 = b'\r';
pub const LF_B: u8 = b'\n';
pub const BUF_SIZE: usize = 8 * 1024;

#[cfg(target_os = "windows")]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(target_os = "windows"))]
pub const LINE_ENDING: &str = "\n";

// Filenames
pub const BAGIT_TXT: &str = "bagit.txt";
pub const BAG_INFO_TXT: &str = "bag-info.txt";
pub const FETCH_TXT: &str = "fetch.txt";
pub const DATA: &str = "data";
pub const PAYLOAD_MANIFEST_PREFIX: &str = "manifest";
pub const TAG_MANIFEST_PREFIX: &str = "tagmanifest";

// bagit.txt tag labels
pub const LABEL_BAGIT_VERSION: &str = "BagIt-Version";
pub const LABEL_FILE_ENCODING: &str = "Tag-File-Character-Encoding";

// bag-info.txt reserved labels
pub const LABEL_BAGGING_DATE: &str = "Bagging-Date";
pub const LABEL_PAYLOAD_OXUM: &str = "Payload-Oxum";
pub const LABEL_BAG_SIZE: &str = "Bag-Size";
pub const LABEL_BAG_GROUP_IDENTIFIER: &str = "Bag-Group-Identifier";
pub const LABEL_BAG_COUNT: &str = "Bag-Count";

/// Labels written by `update()` and rejected when set by callers
pub const GENERATED_LABELS: [&str; 3] = [LABEL_PAYLOAD_OXUM, LABEL_BAG_SIZE, LABEL_BAGGING_DATE];

/// Labels that MUST not appear more than once in bag-info.txt
pub const MUST_NOT_REPEAT_LABELS: [&str; 1] = [LABEL_PAYLOAD_OXUM];

/// Labels that SHOULD not appear more than once in bag-info.txt
pub const SHOULD_NOT_REPEAT_LABELS: [&str; 4] = [
    LABEL_BAGGING_DATE,
    LABEL_BAG_SIZE,
    LABEL_BAG_GROUP_IDENTIFIER,
    LABEL_BAG_COUNT,
];

/// Physical lines at least this long are assumed to have been auto-wrapped by
/// the tool that authored the file, making their terminators insignificant.
pub const BAGINFO_AUTOWRAP_GUESS_LENGTH: usize = 70;

/// Maximum length bag-info.txt lines are folded at on write
pub const BAGINFO_WRAP_LENGTH: usize = 77;

// Fetch limits
pub const MAX_CONCURRENT_DOWNLOADS: usize = 10;
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A transfer is aborted once it exceeds its declared size by this factor
pub const DOWNLOAD_OVERAGE_FACTOR: f64 = 1.05;

/// Sentinel used in fetch.txt when the size of a resource is unknown
pub const FETCH_SIZE_UNKNOWN: &str = "-";
