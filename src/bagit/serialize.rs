use log::info;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use snafu::ResultExt;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::bagit::error::*;

/// The archive formats a bag can be packaged into or loaded from
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SerializationFormat {
    Tar,
    TarGz,
    TarBz2,
    Zip,
}

impl SerializationFormat {
    /// Matches a filename against the recognized archive extensions
    pub fn detect<P: AsRef<Path>>(path: P) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?.to_lowercase();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(SerializationFormat::TarGz)
        } else if name.ends_with(".tar.bz2") {
            Some(SerializationFormat::TarBz2)
        } else if name.ends_with(".tar") {
            Some(SerializationFormat::Tar)
        } else if name.ends_with(".zip") {
            Some(SerializationFormat::Zip)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            SerializationFormat::Tar => "application/x-tar",
            SerializationFormat::TarGz => "application/gzip",
            SerializationFormat::TarBz2 => "application/x-bzip2",
            SerializationFormat::Zip => "application/zip",
        }
    }

    /// Packages the directory into an archive with the directory's name as
    /// the single top-level entry.
    pub fn pack<S: AsRef<Path>, D: AsRef<Path>>(&self, src_dir: S, dst_file: D) -> Result<()> {
        let src_dir = src_dir.as_ref();
        let dst_file = dst_file.as_ref();

        info!("Packaging {} as {}", src_dir.display(), dst_file.display());

        let base_name = src_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidArchive {
                path: dst_file.into(),
                details: "bag directory does not have a usable name".into(),
            })?;

        let file = File::create(dst_file).context(IoCreateSnafu { path: dst_file })?;

        match self {
            SerializationFormat::Tar => {
                let mut builder = tar::Builder::new(BufWriter::new(file));
                builder
                    .append_dir_all(base_name, src_dir)
                    .context(IoWriteSnafu { path: dst_file })?;
                builder.finish().context(IoWriteSnafu { path: dst_file })?;
            }
            SerializationFormat::TarGz => {
                let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
                let mut builder = tar::Builder::new(encoder);
                builder
                    .append_dir_all(base_name, src_dir)
                    .context(IoWriteSnafu { path: dst_file })?;
                builder
                    .into_inner()
                    .context(IoWriteSnafu { path: dst_file })?
                    .finish()
                    .context(IoWriteSnafu { path: dst_file })?;
            }
            SerializationFormat::TarBz2 => {
                let encoder = BzEncoder::new(BufWriter::new(file), bzip2::Compression::default());
                let mut builder = tar::Builder::new(encoder);
                builder
                    .append_dir_all(base_name, src_dir)
                    .context(IoWriteSnafu { path: dst_file })?;
                builder
                    .into_inner()
                    .context(IoWriteSnafu { path: dst_file })?
                    .finish()
                    .context(IoWriteSnafu { path: dst_file })?;
            }
            SerializationFormat::Zip => {
                write_zip(base_name, src_dir, dst_file, file)?;
            }
        }

        Ok(())
    }

    /// Unpacks the archive into the destination directory
    pub fn unpack<A: AsRef<Path>, D: AsRef<Path>>(&self, archive: A, dst_dir: D) -> Result<()> {
        let archive = archive.as_ref();
        let dst_dir = dst_dir.as_ref();

        info!("Unpacking {} to {}", archive.display(), dst_dir.display());

        let file = File::open(archive).context(IoReadSnafu { path: archive })?;

        match self {
            SerializationFormat::Tar => {
                tar::Archive::new(BufReader::new(file))
                    .unpack(dst_dir)
                    .context(IoReadSnafu { path: archive })?;
            }
            SerializationFormat::TarGz => {
                tar::Archive::new(GzDecoder::new(BufReader::new(file)))
                    .unpack(dst_dir)
                    .context(IoReadSnafu { path: archive })?;
            }
            SerializationFormat::TarBz2 => {
                tar::Archive::new(BzDecoder::new(BufReader::new(file)))
                    .unpack(dst_dir)
                    .context(IoReadSnafu { path: archive })?;
            }
            SerializationFormat::Zip => {
                ZipArchive::new(file)
                    .context(ZipReadSnafu { path: archive })?
                    .extract(dst_dir)
                    .context(ZipReadSnafu { path: archive })?;
            }
        }

        Ok(())
    }
}

fn write_zip(base_name: &str, src_dir: &Path, dst_file: &Path, file: File) -> Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(src_dir).min_depth(1) {
        let entry = entry.context(WalkFileSnafu {})?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .expect("walked file must be under the walk root");
        let name = format!(
            "{base_name}/{}",
            relative.to_string_lossy().replace('\\', "/")
        );

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)
                .context(ZipWriteSnafu { path: dst_file })?;
        } else {
            zip.start_file(name, options)
                .context(ZipWriteSnafu { path: dst_file })?;
            let mut reader =
                File::open(entry.path()).context(IoReadSnafu { path: entry.path() })?;
            io::copy(&mut reader, &mut zip).context(IoWriteSnafu { path: dst_file })?;
        }
    }

    zip.finish().context(ZipWriteSnafu { path: dst_file })?;
    Ok(())
}

/// Locates the bag base directory inside an unpacked archive. The archive
/// must contain exactly one top-level directory.
pub fn find_unpacked_bag<P: AsRef<Path>>(unpack_dir: P) -> Result<PathBuf> {
    let unpack_dir = unpack_dir.as_ref();
    let mut entries = Vec::new();

    for entry in fs::read_dir(unpack_dir).context(IoReadDirSnafu { path: unpack_dir })? {
        let entry = entry.context(IoReadDirSnafu { path: unpack_dir })?;
        entries.push(entry.path());
    }

    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Err(Error::InvalidArchive {
            path: unpack_dir.into(),
            details: format!(
                "expected exactly one top-level directory, found {} entries",
                entries.len()
            ),
        }),
    }
}
