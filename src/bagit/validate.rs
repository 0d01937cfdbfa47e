use std::fmt::{self, Display, Formatter};

/// A problem detected while loading or validating a bag, keyed to the file
/// it was found in.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Issue {
    file: String,
    message: String,
}

/// Errors and warnings accumulated by operations that must report every
/// problem they find rather than stopping at the first.
#[derive(Debug, Clone, Default)]
pub struct IssueLog {
    errors: Vec<Issue>,
    warnings: Vec<Issue>,
}

impl Issue {
    pub fn new<F: AsRef<str>, M: AsRef<str>>(file: F, message: M) -> Self {
        Self {
            file: file.as_ref().into(),
            message: message.as_ref().into(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Issue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error<F: AsRef<str>, M: AsRef<str>>(&mut self, file: F, message: M) {
        self.errors.push(Issue::new(file, message));
    }

    pub fn warn<F: AsRef<str>, M: AsRef<str>>(&mut self, file: F, message: M) {
        self.warnings.push(Issue::new(file, message));
    }

    pub fn add_error(&mut self, issue: Issue) {
        self.errors.push(issue);
    }

    pub fn errors(&self) -> &[Issue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Issue] {
        &self.warnings
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn merge(&mut self, other: IssueLog) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn clear(&mut self) {
        self.errors.clear();
        self.warnings.clear();
    }
}
