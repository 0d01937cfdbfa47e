use log::info;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;

use url::Url;

use crate::bagit::bag::BagContext;
use crate::bagit::consts::*;
use crate::bagit::download::{DownloadRequest, Downloader};
use crate::bagit::encoding::{percent_decode, percent_encode};
use crate::bagit::error::*;
use crate::bagit::io::{delete_file_quietly, is_space_or_tab, replace_file, LineReader};
use crate::bagit::paths;
use crate::bagit::validate::{Issue, IssueLog};

/// One fetch.txt record: a resource that is part of the payload but is
/// retrieved on demand rather than stored in the bag.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FetchRow {
    url: String,
    size: Option<u64>,
    destination: String,
}

/// The parsed contents of fetch.txt and the download orchestration around it
#[derive(Debug, Clone, Default)]
pub struct FetchTable {
    rows: Vec<FetchRow>,
    load_errors: Vec<Issue>,
}

impl FetchRow {
    pub fn new<U: AsRef<str>, D: AsRef<str>>(url: U, size: Option<u64>, destination: D) -> Self {
        Self {
            url: url.as_ref().into(),
            size,
            destination: paths::standardize(destination),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Checks the row against the fetch contract: an http(s) URL with a
    /// host, and a destination strictly below `data/`.
    fn problems(&self, ctx: &BagContext) -> Vec<String> {
        let mut problems = Vec::new();

        match Url::parse(&self.url) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    problems.push(format!(
                        "URL {} scheme must be http or https",
                        self.url
                    ));
                } else if url.host_str().unwrap_or("").is_empty() {
                    problems.push(format!("URL {} does not have a host", self.url));
                }
            }
            Err(e) => problems.push(format!("URL {} is invalid: {e}", self.url)),
        }

        let destination = paths::canonicalize(paths::base_in_data(&self.destination));
        let absolute = ctx.make_absolute(&destination);
        let relative = ctx.make_relative(&absolute);

        if relative == DATA || !relative.starts_with("data/") {
            problems.push(format!(
                "Destination {} resolves to a path outside of the data/ directory",
                self.destination
            ));
        }

        problems
    }
}

impl FetchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[FetchRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True if a row claims this destination, compared case-insensitively
    pub fn reserves<S: AsRef<str>>(&self, destination: S) -> bool {
        let destination = paths::standardize(destination);
        self.rows
            .iter()
            .any(|r| r.destination.eq_ignore_ascii_case(&destination))
    }

    /// Parses fetch.txt. Unparsable lines are recorded as load errors and
    /// surfaced when the table is downloaded; they do not fail the load.
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let path = base_dir.as_ref().join(FETCH_TXT);
        let mut table = Self::new();

        info!("Reading fetch file {}", path.display());

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(table),
            Err(e) => return Err(Error::IoRead { source: e, path }),
        };

        let mut num = 0;

        for line in LineReader::new(BufReader::new(file)) {
            let line = line?;
            num += 1;

            if line.trim().is_empty() {
                continue;
            }

            let (url, size, raw_path) = match split_fetch_line(&line) {
                Some(parts) => parts,
                None => {
                    table.load_errors.push(Issue::new(
                        FETCH_TXT,
                        format!("Line {num} is not of the form 'url size path'"),
                    ));
                    continue;
                }
            };

            let size = if size == FETCH_SIZE_UNKNOWN {
                None
            } else {
                match size.parse::<u64>() {
                    Ok(size) => Some(size),
                    Err(_) => {
                        table.load_errors.push(Issue::new(
                            FETCH_TXT,
                            format!("Line {num}: size must be '-' or a non-negative integer"),
                        ));
                        continue;
                    }
                }
            };

            let destination = match percent_decode(raw_path) {
                Ok(decoded) => paths::standardize(decoded),
                Err(e) => {
                    table
                        .load_errors
                        .push(Issue::new(FETCH_TXT, format!("Line {num}: {e}")));
                    continue;
                }
            };

            table.rows.push(FetchRow::new(url, size, destination));
        }

        Ok(table)
    }

    /// Adds a row and eagerly downloads its resource so that the next
    /// manifest update observes the file content.
    pub fn add(
        &mut self,
        ctx: &BagContext,
        url: &str,
        destination: &str,
        size: Option<u64>,
        downloader: &Downloader,
    ) -> Result<()> {
        let destination = paths::canonicalize(paths::base_in_data(paths::standardize(destination)));

        if self.rows.iter().any(|r| r.url.eq_ignore_ascii_case(url)) {
            return Err(Error::DuplicateFetchUrl { url: url.into() });
        }
        if self.reserves(&destination) {
            return Err(Error::DuplicateFetchDestination {
                path: destination,
            });
        }

        let row = FetchRow::new(url, size, destination);
        let problems = row.problems(ctx);
        if let Some(problem) = problems.first() {
            return Err(Error::InvalidFetchUrl {
                url: url.into(),
                details: problem.clone(),
            });
        }

        let absolute = ctx.make_absolute(row.destination());
        if absolute.exists() {
            return Err(Error::FileAlreadyExists {
                path: row.destination().into(),
            });
        }

        downloader.fetch_one(&DownloadRequest {
            url: row.url().into(),
            destination: absolute,
            size: row.size(),
        })?;

        self.rows.push(row);
        Ok(())
    }

    /// Removes the row for the URL and deletes its local file if present
    pub fn remove(&mut self, ctx: &BagContext, url: &str) -> Result<()> {
        let index = self
            .rows
            .iter()
            .position(|r| r.url.eq_ignore_ascii_case(url));

        match index {
            Some(index) => {
                let row = self.rows.remove(index);
                self.delete_destination(ctx, &row)
            }
            None => Err(Error::InvalidFetchUrl {
                url: url.into(),
                details: "URL is not present in the fetch file".into(),
            }),
        }
    }

    /// Downloads every row that is not already materialized on disk. Invalid
    /// rows and failed transfers produce errors; they do not stop the rest
    /// of the batch.
    pub fn download_all(&self, ctx: &BagContext, downloader: &Downloader) -> Result<IssueLog> {
        let mut issues = IssueLog::new();

        for error in &self.load_errors {
            issues.add_error(error.clone());
        }

        let mut requests = Vec::new();

        for row in &self.rows {
            let problems = row.problems(ctx);
            if !problems.is_empty() {
                for problem in problems {
                    issues.error(FETCH_TXT, problem);
                }
                continue;
            }

            let absolute = ctx.make_absolute(&paths::base_in_data(row.destination()));
            if absolute.exists() {
                continue;
            }

            requests.push(DownloadRequest {
                url: row.url().into(),
                destination: absolute,
                size: row.size(),
            });
        }

        for (_, result) in downloader.fetch_many(requests) {
            match result {
                Ok(()) => (),
                Err(e @ Error::FetchFailed { .. }) => issues.error(FETCH_TXT, e.to_string()),
                Err(e) => return Err(e),
            }
        }

        Ok(issues)
    }

    /// Deletes all local copies of fetched files, leaving the table intact
    pub fn cleanup(&self, ctx: &BagContext) -> Result<()> {
        for row in &self.rows {
            self.delete_destination(ctx, row)?;
        }
        Ok(())
    }

    /// Deletes local copies, empties the table, and removes fetch.txt
    pub fn clear_data(&mut self, ctx: &BagContext) -> Result<()> {
        self.cleanup(ctx)?;
        self.rows.clear();
        self.load_errors.clear();
        delete_file_quietly(ctx.root().join(FETCH_TXT))
    }

    fn delete_destination(&self, ctx: &BagContext, row: &FetchRow) -> Result<()> {
        let absolute = ctx.make_absolute(&paths::base_in_data(row.destination()));
        delete_file_quietly(&absolute)?;

        if let Some(parent) = absolute.parent() {
            crate::bagit::io::prune_empty_dirs(parent, ctx.root().join(DATA))?;
        }

        Ok(())
    }

    /// Deletes any existing fetch.txt, then writes the rows back out when
    /// the table is non-empty.
    pub fn write<P: AsRef<Path>>(&self, base_dir: P) -> Result<()> {
        let path = base_dir.as_ref().join(FETCH_TXT);

        if self.rows.is_empty() {
            return delete_file_quietly(path);
        }

        info!("Writing fetch file {}", path.display());

        let mut content = String::new();

        for row in &self.rows {
            let size = match row.size {
                Some(size) => size.to_string(),
                None => FETCH_SIZE_UNKNOWN.into(),
            };
            let encoded = percent_encode(&row.destination);
            content.push_str(&format!("{} {size} {encoded}{LINE_ENDING}", row.url));
        }

        replace_file(path, content.as_bytes())
    }
}

/// Splits `<url> <size> <path>` on the first two runs of spaces or tabs
fn split_fetch_line(line: &str) -> Option<(&str, &str, &str)> {
    let line = line.trim();

    let i = line.find(is_space_or_tab)?;
    let url = &line[..i];
    let rest = line[i..].trim_start_matches(is_space_or_tab);

    let j = rest.find(is_space_or_tab)?;
    let size = &rest[..j];
    let path = rest[j..].trim_start_matches(is_space_or_tab);

    if url.is_empty() || size.is_empty() || path.is_empty() {
        return None;
    }

    Some((url, size, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bagit::encoding::TagEncoding;
    use std::fs;
    use tempfile::TempDir;

    fn load_from(content: &str) -> FetchTable {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(FETCH_TXT), content).unwrap();
        FetchTable::load(temp.path()).unwrap()
    }

    #[test]
    fn parses_sizes_and_encoded_destinations() {
        let table = load_from(
            "http://example.org/a.bin 42 data/a.bin\n\
             https://example.org/b.bin - data/sub/b%0A.bin\n",
        );

        assert!(table.load_errors.is_empty());
        assert_eq!(2, table.rows().len());
        assert_eq!(Some(42), table.rows()[0].size());
        assert_eq!(None, table.rows()[1].size());
        assert_eq!("data/sub/b\n.bin", table.rows()[1].destination());
    }

    #[test]
    fn malformed_lines_are_load_errors() {
        let table = load_from(
            "http://example.org/a.bin\n\
             http://example.org/b.bin forty data/b.bin\n\
             http://example.org/c.bin -42 data/c.bin\n",
        );

        assert!(table.rows().is_empty());
        assert_eq!(3, table.load_errors.len());
    }

    #[test]
    fn row_problems_flag_bad_urls_and_escaping_destinations() {
        let temp = TempDir::new().unwrap();
        let encoding = TagEncoding::default();
        let ctx = BagContext::new(temp.path(), &encoding);

        let bad_scheme = FetchRow::new("ftp://example.org/a", None, "data/a");
        assert_eq!(1, bad_scheme.problems(&ctx).len());

        let no_host = FetchRow::new("http:///a", None, "data/a");
        assert_eq!(1, no_host.problems(&ctx).len());

        let escaping = FetchRow::new("http://example.org/a", None, "../a");
        assert_eq!(1, escaping.problems(&ctx).len());

        let above_data = FetchRow::new("http://example.org/a", None, "data/../tag.txt");
        assert_eq!(1, above_data.problems(&ctx).len());

        let fine = FetchRow::new("https://example.org/a", Some(1), "sub/a.bin");
        assert!(fine.problems(&ctx).is_empty());
    }

    #[test]
    fn add_rejects_duplicates_before_downloading() {
        let temp = TempDir::new().unwrap();
        let encoding = TagEncoding::default();
        let ctx = BagContext::new(temp.path(), &encoding);
        let downloader = Downloader::new().unwrap();

        let mut table = FetchTable::new();
        table
            .rows
            .push(FetchRow::new("http://example.org/a", None, "data/a.bin"));

        let result = table.add(&ctx, "HTTP://EXAMPLE.ORG/A", "data/other.bin", None, &downloader);
        assert!(matches!(result, Err(Error::DuplicateFetchUrl { .. })));

        let result = table.add(&ctx, "http://example.org/b", "data/A.BIN", None, &downloader);
        assert!(matches!(
            result,
            Err(Error::DuplicateFetchDestination { .. })
        ));
    }

    #[test]
    fn add_rejects_destinations_that_already_exist() {
        let temp = TempDir::new().unwrap();
        let encoding = TagEncoding::default();
        let ctx = BagContext::new(temp.path(), &encoding);
        let downloader = Downloader::new().unwrap();

        fs::create_dir_all(temp.path().join("data")).unwrap();
        fs::write(temp.path().join("data/a.bin"), "present").unwrap();

        let mut table = FetchTable::new();
        let result = table.add(&ctx, "http://example.org/a", "a.bin", None, &downloader);
        assert!(matches!(result, Err(Error::FileAlreadyExists { .. })));
    }

    #[test]
    fn write_then_load_round_trips_rows() {
        let temp = TempDir::new().unwrap();
        let mut table = FetchTable::new();
        table
            .rows
            .push(FetchRow::new("http://example.org/a", Some(42), "data/a.bin"));
        table
            .rows
            .push(FetchRow::new("http://example.org/b", None, "data/b\n.bin"));

        table.write(temp.path()).unwrap();

        let written = fs::read_to_string(temp.path().join(FETCH_TXT)).unwrap();
        assert!(written.contains("http://example.org/a 42 data/a.bin"));
        assert!(written.contains("http://example.org/b - data/b%0A.bin"));

        let reloaded = FetchTable::load(temp.path()).unwrap();
        assert_eq!(table.rows(), reloaded.rows());
    }

    #[test]
    fn empty_table_removes_fetch_txt_on_write() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(FETCH_TXT), "stale").unwrap();

        FetchTable::new().write(temp.path()).unwrap();

        assert!(!temp.path().join(FETCH_TXT).exists());
    }

    #[test]
    fn cleanup_removes_files_and_prunes_directories() {
        let temp = TempDir::new().unwrap();
        let encoding = TagEncoding::default();
        let ctx = BagContext::new(temp.path(), &encoding);

        fs::create_dir_all(temp.path().join("data/sub/deep")).unwrap();
        fs::write(temp.path().join("data/sub/deep/a.bin"), "x").unwrap();
        fs::write(temp.path().join("data/keep.txt"), "y").unwrap();

        let mut table = FetchTable::new();
        table.rows.push(FetchRow::new(
            "http://example.org/a",
            None,
            "data/sub/deep/a.bin",
        ));

        table.cleanup(&ctx).unwrap();

        assert!(!temp.path().join("data/sub").exists());
        assert!(temp.path().join("data").exists());
        assert!(temp.path().join("data/keep.txt").exists());
        assert_eq!(1, table.rows().len());
    }
}
