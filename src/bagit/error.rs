use snafu::prelude::*;
use std::path::PathBuf;
use std::string::FromUtf8Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("IO error: {}", source))]
    IoGeneral { source: std::io::Error },
    #[snafu(display("Error creating file {}: {}", path.display(), source))]
    IoCreate {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error writing to file {}: {}", path.display(), source))]
    IoWrite {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error reading file {}: {}", path.display(), source))]
    IoRead {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error reading directory {}: {}", path.display(), source))]
    IoReadDir {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to copy {} to {}: {}", from.display(), to.display(), source))]
    IoCopy {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },
    #[snafu(display("Failed to delete {}: {}", path.display(), source))]
    IoDelete {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to stat {}: {}", path.display(), source))]
    IoStat {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error walking files: {}", source))]
    WalkFile { source: walkdir::Error },
    #[snafu(display("Path {} is not valid UTF-8", path.display()))]
    InvalidUtf8Path { path: PathBuf },

    #[snafu(display("Invalid tag with label '{label}': {details}"))]
    InvalidTag { label: String, details: String },
    #[snafu(display("Tag {label} is generated and cannot be set directly"))]
    GeneratedTag { label: String },
    #[snafu(display("Invalid BagIt version: {value}"))]
    InvalidBagItVersion { value: String },
    #[snafu(display("Unsupported tag file encoding {encoding}"))]
    UnsupportedEncoding { encoding: String },
    #[snafu(display("Failed to decode text as {charset}"))]
    DecodeText { charset: String },
    #[snafu(display("Failed to encode text as {charset}"))]
    EncodeText { charset: String },
    #[snafu(display("Failed to decode string: {source}"))]
    InvalidString { source: FromUtf8Error },
    #[snafu(display("Invalid percent encoding in {value}"))]
    InvalidPercentEncoding { value: String },

    #[snafu(display("Unsupported digest algorithm: {name}"))]
    UnsupportedAlgorithm { name: String },
    #[snafu(display("Cannot remove last {kind} algorithm from the bag"))]
    LastAlgorithm { kind: String },

    #[snafu(display("Path {path} resolves outside of the bag"))]
    PathOutsideBag { path: String },
    #[snafu(display("Filename {path} is reserved and cannot be used"))]
    ReservedFilename { path: String },
    #[snafu(display("File {path} already exists in the bag"))]
    FileAlreadyExists { path: String },
    #[snafu(display("File {path} does not exist in the bag"))]
    FileNotInBag { path: String },
    #[snafu(display("Source file {} does not exist", path.display()))]
    MissingSourceFile { path: PathBuf },

    #[snafu(display("Fetch URL {url} is already present in the bag"))]
    DuplicateFetchUrl { url: String },
    #[snafu(display("Fetch destination {path} is already present in the bag"))]
    DuplicateFetchDestination { path: String },
    #[snafu(display("Destination {path} is reserved by a fetch entry"))]
    ReservedByFetch { path: String },
    #[snafu(display("Invalid fetch URL {url}: {details}"))]
    InvalidFetchUrl { url: String, details: String },
    #[snafu(display("Failed to fetch URL {url}: {details}"))]
    FetchFailed { url: String, details: String },
    #[snafu(display("Failed to initialize HTTP client: {details}"))]
    HttpClient { details: String },

    #[snafu(display("Cannot upgrade bag: {details}"))]
    UpgradeNotAllowed { details: String },

    #[snafu(display("Unrecognized archive format: {}", path.display()))]
    UnsupportedSerialization { path: PathBuf },
    #[snafu(display("Invalid archive {}: {details}", path.display()))]
    InvalidArchive { path: PathBuf, details: String },
    #[snafu(display("Error reading zip archive {}: {}", path.display(), source))]
    ZipRead {
        source: zip::result::ZipError,
        path: PathBuf,
    },
    #[snafu(display("Error writing zip archive {}: {}", path.display(), source))]
    ZipWrite {
        source: zip::result::ZipError,
        path: PathBuf,
    },
}
