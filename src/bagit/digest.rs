use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};
use snafu::ResultExt;
use strum_macros::EnumIter;

use crate::bagit::error::*;

/// Digest algorithms from the BagIt algorithm registry. The `Display` form is
/// the canonical manifest filename form: lowercase with dashes removed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, EnumIter)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

/// A lowercase hex encoded digest
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HexDigest(String);

/// Writer wrapper that feeds everything written through it to a digest per
/// algorithm, so that a file only needs to be read once regardless of how
/// many manifests it appears in.
pub struct MultiDigestWriter<W: Write> {
    digests: Vec<(DigestAlgorithm, Box<dyn DynDigest>)>,
    inner: W,
}

impl DigestAlgorithm {
    fn new_digest(&self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Md5 => Box::<Md5>::default(),
            DigestAlgorithm::Sha1 => Box::<Sha1>::default(),
            DigestAlgorithm::Sha224 => Box::<Sha224>::default(),
            DigestAlgorithm::Sha256 => Box::<Sha256>::default(),
            DigestAlgorithm::Sha384 => Box::<Sha384>::default(),
            DigestAlgorithm::Sha512 => Box::<Sha512>::default(),
            DigestAlgorithm::Sha3_224 => Box::<Sha3_224>::default(),
            DigestAlgorithm::Sha3_256 => Box::<Sha3_256>::default(),
            DigestAlgorithm::Sha3_384 => Box::<Sha3_384>::default(),
            DigestAlgorithm::Sha3_512 => Box::<Sha3_512>::default(),
        }
    }

    /// Computes the digest of the file at `path`
    pub fn hash_file<P: AsRef<Path>>(&self, path: P) -> Result<HexDigest> {
        let path = path.as_ref();
        let mut digest = self.new_digest();
        let mut reader = File::open(path).context(IoReadSnafu { path })?;
        let mut buf = [0; crate::bagit::consts::BUF_SIZE];

        loop {
            let read = reader.read(&mut buf).context(IoReadSnafu { path })?;
            if read == 0 {
                break;
            }
            digest.update(&buf[..read]);
        }

        Ok(HexDigest::from_bytes(&digest.finalize()))
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha224 => "sha224",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha3_224 => "sha3224",
            DigestAlgorithm::Sha3_256 => "sha3256",
            DigestAlgorithm::Sha3_384 => "sha3384",
            DigestAlgorithm::Sha3_512 => "sha3512",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<&str> for DigestAlgorithm {
    type Error = Error;

    /// Algorithm names are matched case-insensitively and with dashes removed,
    /// so `SHA3-512`, `sha3-512`, and `sha3512` all name the same algorithm.
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        let normalized = value.to_lowercase().replace('-', "");
        match normalized.as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha224" => Ok(DigestAlgorithm::Sha224),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            "sha3224" => Ok(DigestAlgorithm::Sha3_224),
            "sha3256" => Ok(DigestAlgorithm::Sha3_256),
            "sha3384" => Ok(DigestAlgorithm::Sha3_384),
            "sha3512" => Ok(DigestAlgorithm::Sha3_512),
            _ => Err(Error::UnsupportedAlgorithm { name: value.into() }),
        }
    }
}

impl HexDigest {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HexDigest {
    fn from(value: &str) -> Self {
        Self(value.to_lowercase())
    }
}

impl Display for HexDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<W: Write> MultiDigestWriter<W> {
    pub fn new(algorithms: &[DigestAlgorithm], inner: W) -> Self {
        Self {
            digests: algorithms
                .iter()
                .map(|algorithm| (*algorithm, algorithm.new_digest()))
                .collect(),
            inner,
        }
    }

    pub fn finalize_hex(self) -> HashMap<DigestAlgorithm, HexDigest> {
        self.digests
            .into_iter()
            .map(|(algorithm, digest)| (algorithm, HexDigest::from_bytes(&digest.finalize())))
            .collect()
    }
}

impl<W: Write> Write for MultiDigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        for (_, digest) in self.digests.iter_mut() {
            digest.update(&buf[..written]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
