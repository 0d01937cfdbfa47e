use log::info;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::slice::Iter;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::bagit::bag::{BagContext, BagItVersion};
use crate::bagit::consts::*;
use crate::bagit::encoding::TagEncoding;
use crate::bagit::error::*;
use crate::bagit::io::{is_space_or_tab, replace_file, LineReader};
use crate::bagit::validate::IssueLog;

static BAGIT_VERSION_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BagIt-Version: (\d+)\.(\d+)$").unwrap());
static FILE_ENCODING_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Tag-File-Character-Encoding: (.+)$").unwrap());
static NEWLINE_RUN_MATCHER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\n]+").unwrap());

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tag {
    label: String,
    value: String,
}

/// Ordered list of tags. Labels are compared case-insensitively and may
/// repeat.
#[derive(Debug, Clone, Default)]
pub struct TagList {
    tags: Vec<Tag>,
}

/// The `bagit.txt` declaration. It is always written as UTF-8, no matter
/// what `Tag-File-Character-Encoding` declares for the other tag files.
#[derive(Debug, Clone)]
pub struct BagDeclaration {
    version: BagItVersion,
    encoding: TagEncoding,
}

/// The contents of `bag-info.txt`
#[derive(Debug, Clone, Default)]
pub struct BagInfo {
    tags: TagList,
}

impl Tag {
    pub fn new<L: AsRef<str>, V: AsRef<str>>(label: L, value: V) -> Result<Self> {
        let label = label.as_ref();

        if label.is_empty() {
            return Err(Error::InvalidTag {
                label: label.into(),
                details: "labels cannot be empty".into(),
            });
        } else if label.contains(':') {
            return Err(Error::InvalidTag {
                label: label.into(),
                details: "labels cannot contain colons".into(),
            });
        } else if label.starts_with(is_space_or_tab) || label.ends_with(is_space_or_tab) {
            return Err(Error::InvalidTag {
                label: label.into(),
                details: "labels cannot begin or end with whitespace".into(),
            });
        }

        Ok(Self::new_unchecked(label, value))
    }

    fn new_unchecked<L: AsRef<str>, V: AsRef<str>>(label: L, value: V) -> Self {
        Self {
            label: label.as_ref().into(),
            value: value.as_ref().into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl TagList {
    pub fn new() -> Self {
        Self { tags: Vec::new() }
    }

    pub fn add_tag<L: AsRef<str>, V: AsRef<str>>(&mut self, label: L, value: V) -> Result<()> {
        self.tags.push(Tag::new(label, value)?);
        Ok(())
    }

    fn push(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    /// Removes all tags with the label, compared case-insensitively
    pub fn remove_tags<S: AsRef<str>>(&mut self, label: S) {
        let label = label.as_ref();
        self.tags.retain(|t| !t.label.eq_ignore_ascii_case(label));
    }

    /// Removes the nth value of the label, counting from zero across only the
    /// tags with that label.
    pub fn remove_tag_at<S: AsRef<str>>(&mut self, label: S, index: usize) -> Result<()> {
        let label = label.as_ref();
        let mut seen = 0;

        for i in 0..self.tags.len() {
            if self.tags[i].label.eq_ignore_ascii_case(label) {
                if seen == index {
                    self.tags.remove(i);
                    return Ok(());
                }
                seen += 1;
            }
        }

        Err(Error::InvalidTag {
            label: label.into(),
            details: format!("tag has no value at index {index}"),
        })
    }

    /// Removes every tag with the label whose value matches `value`
    pub fn remove_tag_value<S: AsRef<str>, V: AsRef<str>>(
        &mut self,
        label: S,
        value: V,
        case_sensitive: bool,
    ) {
        let label = label.as_ref();
        let value = value.as_ref();
        self.tags.retain(|t| {
            if !t.label.eq_ignore_ascii_case(label) {
                return true;
            }
            if case_sensitive {
                t.value != value
            } else {
                !t.value.eq_ignore_ascii_case(value)
            }
        });
    }

    /// All values for the label, in file order, compared case-insensitively
    pub fn get_values<S: AsRef<str>>(&self, label: S) -> Vec<&str> {
        let label = label.as_ref();
        self.tags
            .iter()
            .filter(|t| t.label.eq_ignore_ascii_case(label))
            .map(|t| t.value.as_str())
            .collect()
    }

    pub fn has_tag<S: AsRef<str>>(&self, label: S) -> bool {
        let label = label.as_ref();
        self.tags
            .iter()
            .any(|t| t.label.eq_ignore_ascii_case(label))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl<'a> IntoIterator for &'a TagList {
    type Item = &'a Tag;
    type IntoIter = Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

impl BagDeclaration {
    pub fn new() -> Self {
        Self {
            version: BAGIT_DEFAULT_VERSION,
            encoding: TagEncoding::default(),
        }
    }

    pub fn with_values(version: BagItVersion, encoding: TagEncoding) -> Self {
        Self { version, encoding }
    }

    pub fn version(&self) -> BagItVersion {
        self.version
    }

    pub fn encoding(&self) -> &TagEncoding {
        &self.encoding
    }

    pub fn set_version(&mut self, version: BagItVersion) {
        self.version = version;
    }

    pub fn set_encoding(&mut self, encoding: TagEncoding) {
        self.encoding = encoding;
    }
}

impl Default for BagDeclaration {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `bagit.txt`. Format problems are reported in the issue log and
/// substituted with defaults so that loading can continue; only IO failures
/// are returned as errors.
pub fn read_bag_declaration<P: AsRef<Path>>(base_dir: P) -> Result<(BagDeclaration, IssueLog)> {
    let path = base_dir.as_ref().join(BAGIT_TXT);
    let mut issues = IssueLog::new();

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            issues.error(BAGIT_TXT, format!("{BAGIT_TXT} does not exist"));
            return Ok((BagDeclaration::new(), issues));
        }
        Err(e) => return Err(Error::IoRead { source: e, path }),
    };

    let mut lines = Vec::new();
    for line in LineReader::new(BufReader::new(file)) {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }

    if lines.len() != 2 {
        issues.error(
            BAGIT_TXT,
            format!(
                "{BAGIT_TXT} MUST contain exactly 2 lines, found {}",
                lines.len()
            ),
        );
        return Ok((BagDeclaration::new(), issues));
    }

    let version = match BAGIT_VERSION_MATCHER.captures(&lines[0]) {
        Some(captures) => {
            let value = format!("{}.{}", &captures[1], &captures[2]);
            match BagItVersion::try_from(value.as_str()) {
                Ok(version) => version,
                Err(_) => {
                    issues.error(
                        BAGIT_TXT,
                        format!("{BAGIT_TXT} contains an invalid {LABEL_BAGIT_VERSION}: {value}"),
                    );
                    BAGIT_DEFAULT_VERSION
                }
            }
        }
        None => {
            issues.error(
                BAGIT_TXT,
                format!("First line must be of the form '{LABEL_BAGIT_VERSION}: M.N'"),
            );
            BAGIT_DEFAULT_VERSION
        }
    };

    let encoding = match FILE_ENCODING_MATCHER.captures(&lines[1]) {
        Some(captures) => TagEncoding::lenient(&captures[1]),
        None => {
            issues.error(
                BAGIT_TXT,
                format!("Second line must be of the form '{LABEL_FILE_ENCODING}: CHARSET'"),
            );
            TagEncoding::default()
        }
    };

    Ok((BagDeclaration::with_values(version, encoding), issues))
}

/// Writes `bagit.txt`, always UTF-8 and always LF terminated
pub fn write_bag_declaration<P: AsRef<Path>>(
    declaration: &BagDeclaration,
    base_dir: P,
) -> Result<()> {
    let path = base_dir.as_ref().join(BAGIT_TXT);
    info!("Writing bag declaration {}", path.display());

    let content = format!(
        "{LABEL_BAGIT_VERSION}: {}\n{LABEL_FILE_ENCODING}: {}\n",
        declaration.version,
        declaration.encoding.name()
    );

    replace_file(path, content.as_bytes())
}

impl BagInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag, rejecting labels that are generated on update
    pub fn add<L: AsRef<str>, V: AsRef<str>>(&mut self, label: L, value: V) -> Result<()> {
        let label = label.as_ref();
        if is_generated_label(label) {
            return Err(Error::GeneratedTag {
                label: label.into(),
            });
        }
        self.tags.add_tag(label, value)
    }

    pub(crate) fn add_generated<L: AsRef<str>, V: AsRef<str>>(&mut self, label: L, value: V) {
        self.tags.push(Tag::new_unchecked(label, value));
    }

    /// Removes any caller-supplied copies of the generated tags
    pub(crate) fn remove_generated(&mut self) {
        for label in GENERATED_LABELS {
            self.tags.remove_tags(label);
        }
    }

    pub fn remove<S: AsRef<str>>(&mut self, label: S) {
        self.tags.remove_tags(label);
    }

    pub fn remove_at<S: AsRef<str>>(&mut self, label: S, index: usize) -> Result<()> {
        self.tags.remove_tag_at(label, index)
    }

    pub fn remove_value<S: AsRef<str>, V: AsRef<str>>(
        &mut self,
        label: S,
        value: V,
        case_sensitive: bool,
    ) {
        self.tags.remove_tag_value(label, value, case_sensitive);
    }

    pub fn get_values<S: AsRef<str>>(&self, label: S) -> Vec<&str> {
        self.tags.get_values(label)
    }

    pub fn has_tag<S: AsRef<str>>(&self, label: S) -> bool {
        self.tags.has_tag(label)
    }

    pub fn tags(&self) -> &TagList {
        &self.tags
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

fn is_generated_label(label: &str) -> bool {
    GENERATED_LABELS
        .iter()
        .any(|g| g.eq_ignore_ascii_case(label))
}

/// Reads `bag-info.txt`, decoding it with the bag's tag file encoding.
/// A missing file yields an empty BagInfo. Malformed lines and repeated
/// reserved tags are reported in the issue log.
pub fn read_bag_info(ctx: &BagContext, version: BagItVersion) -> Result<(BagInfo, IssueLog)> {
    let path = ctx.root().join(BAG_INFO_TXT);
    let mut issues = IssueLog::new();
    let mut info = BagInfo::new();

    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((info, issues)),
        Err(e) => return Err(Error::IoRead { source: e, path }),
    };

    let text = match ctx.decode_text(&bytes) {
        Ok(text) => text,
        Err(e) => {
            issues.error(BAG_INFO_TXT, e.to_string());
            return Ok((info, issues));
        }
    };

    // Length of the previous physical line, which decides whether the line
    // break preceding a continuation was an auto-wrap or is significant.
    let mut prev_len = 0;
    let mut num = 0;

    for line in LineReader::new(text.as_bytes()) {
        let line = line?;
        num += 1;

        if line.trim().is_empty() {
            prev_len = line.len();
            continue;
        }

        if line.starts_with(is_space_or_tab) {
            match info.tags.tags.last_mut() {
                Some(last) => {
                    if prev_len < BAGINFO_AUTOWRAP_GUESS_LENGTH {
                        last.value.push(LF);
                    }
                    if !last.value.ends_with(|c| c == CR || c == LF) {
                        last.value.push(SPACE);
                    }
                    last.value.push_str(line.trim());
                }
                None => {
                    issues.error(
                        BAG_INFO_TXT,
                        format!("Line {num} is a continuation of a tag that does not exist"),
                    );
                }
            }
            prev_len = line.len();
            continue;
        }

        match line.split_once(':') {
            Some((raw_label, raw_value)) => {
                let label = raw_label.trim();

                if label != raw_label && version >= BAGIT_1_0 {
                    issues.error(
                        BAG_INFO_TXT,
                        format!("Line {num}: labels cannot begin or end with whitespace"),
                    );
                    prev_len = line.len();
                    continue;
                }

                if must_not_repeat(label) && info.has_tag(label) {
                    issues.error(BAG_INFO_TXT, format!("Tag {label} MUST not be repeated."));
                    prev_len = line.len();
                    continue;
                } else if should_not_repeat(label) && info.has_tag(label) {
                    issues.warn(BAG_INFO_TXT, format!("Tag {label} SHOULD not be repeated."));
                }

                info.tags.push(Tag::new_unchecked(label, raw_value.trim()));
            }
            None => {
                issues.error(BAG_INFO_TXT, format!("Line {num} is not a valid tag line"));
            }
        }

        prev_len = line.len();
    }

    Ok((info, issues))
}

/// Writes `bag-info.txt`, folding long lines and encoding the result with
/// the bag's tag file encoding.
pub fn write_bag_info(info: &BagInfo, ctx: &BagContext) -> Result<()> {
    let path = ctx.root().join(BAG_INFO_TXT);
    info!("Writing bag info {}", path.display());

    let mut content = String::new();

    for tag in info.tags() {
        let value = NEWLINE_RUN_MATCHER.replace_all(tag.value(), " ");
        let line = format!("{}: {}", tag.label(), value);

        for (i, part) in fold_tag_line(&line).iter().enumerate() {
            if i > 0 {
                content.push_str("  ");
            }
            content.push_str(part);
            content.push_str(LINE_ENDING);
        }
    }

    let bytes = ctx.encode_text(&content)?;
    replace_file(path, &bytes)
}

/// Word-wraps a tag line at the largest width that keeps every written line
/// under the fold length, counting the two-space prefix continuation lines
/// carry. A line containing a word too long to ever fit is wrapped at the
/// fold length with the word broken.
fn fold_tag_line(line: &str) -> Vec<String> {
    if line.len() < BAGINFO_WRAP_LENGTH {
        return vec![line.into()];
    }

    for width in (1..=BAGINFO_WRAP_LENGTH).rev() {
        let wrapped = word_wrap(line, width);
        let fits = wrapped
            .iter()
            .enumerate()
            .all(|(i, l)| l.len() + continuation_prefix_len(i) < BAGINFO_WRAP_LENGTH);
        if fits {
            return wrapped;
        }
    }

    word_wrap_breaking(line, BAGINFO_WRAP_LENGTH)
}

fn continuation_prefix_len(part_index: usize) -> usize {
    if part_index > 0 {
        2
    } else {
        0
    }
}

fn word_wrap(line: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in line.split(' ') {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= width {
            current.push(SPACE);
            current.push_str(word);
        } else {
            lines.push(current);
            current = word.into();
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }

    lines
}

/// Hard-wraps the line at the width, breaking words where necessary. Every
/// chunk after the first has its budget reduced by the continuation prefix
/// it will be written with.
fn word_wrap_breaking(line: &str, width: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();

    for part in word_wrap(line, width) {
        let mut start = 0;
        let indices: Vec<usize> = part
            .char_indices()
            .map(|(i, _)| i)
            .chain([part.len()])
            .collect();

        let mut chunk_end = 0;
        for &i in &indices {
            let budget = width - continuation_prefix_len(lines.len());
            if i - start > budget {
                lines.push(part[start..chunk_end].into());
                start = chunk_end;
            }
            chunk_end = i;
        }
        lines.push(part[start..].into());
    }

    lines
}

/// Builds the value of the Payload-Oxum tag
pub fn build_payload_oxum(total_bytes: u64, file_count: u64) -> String {
    format!("{total_bytes}.{file_count}")
}

/// Formats a byte count the way Bag-Size reports it, for example `24.38 KB`
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".into();
    }

    let digits = bytes.to_string().len();
    let factor = ((digits - 1) / 3).min(UNITS.len() - 1);
    let scaled = bytes as f64 / 1024f64.powi(factor as i32);

    format!("{:.2} {}", scaled, UNITS[factor])
}

fn must_not_repeat(label: &str) -> bool {
    MUST_NOT_REPEAT_LABELS
        .iter()
        .any(|l| l.eq_ignore_ascii_case(label))
}

fn should_not_repeat(label: &str) -> bool {
    SHOULD_NOT_REPEAT_LABELS
        .iter()
        .any(|l| l.eq_ignore_ascii_case(label))
}
