pub use crate::bagit::bag::{Bag, BagContext, BagItVersion};
pub use crate::bagit::digest::{DigestAlgorithm, HexDigest, MultiDigestWriter};
pub use crate::bagit::download::{DownloadRequest, Downloader};
pub use crate::bagit::encoding::TagEncoding;
pub use crate::bagit::error::*;
pub use crate::bagit::fetch::{FetchRow, FetchTable};
pub use crate::bagit::manifest::{ManifestFile, ManifestKind};
pub use crate::bagit::serialize::SerializationFormat;
pub use crate::bagit::tag::{BagDeclaration, BagInfo, Tag, TagList};
pub use crate::bagit::validate::{Issue, IssueLog};

mod bag;
pub mod consts;
mod digest;
mod download;
mod encoding;
mod error;
mod fetch;
mod io;
mod manifest;
pub mod paths;
mod serialize;
mod tag;
mod validate;
