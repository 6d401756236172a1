use serde::Serialize;
use std::fmt;

/// Category of a problem recorded during a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A relative path failed validation.
    InvalidName,
    /// The source is neither in the store nor on the local filesystem.
    SourceNotFound,
    /// The destination exists and overwriting was not requested.
    AlreadyExists,
    /// The archive slot for the current occupant of a destination is taken.
    ArchiveSlotOccupied,
    /// A put, copy, get or delete against the store failed.
    StorageIo,
    /// An append could not read the existing object or the chunk.
    AppendRead,
    /// An append could not write the combined object.
    AppendWrite,
    /// Two keys of one batch collide: an item reads and writes the same key,
    /// or repeats the source of an earlier item.
    KeyConflict,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::InvalidName => "invalid-name",
            IssueKind::SourceNotFound => "source-not-found",
            IssueKind::AlreadyExists => "already-exists",
            IssueKind::ArchiveSlotOccupied => "archive-slot-occupied",
            IssueKind::StorageIo => "storage-io",
            IssueKind::AppendRead => "append-read",
            IssueKind::AppendWrite => "append-write",
            IssueKind::KeyConflict => "key-conflict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One structured error or warning, with the paths it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Issue {
    pub fn new<I, P>(kind: IssueKind, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            kind,
            severity: Severity::Error,
            paths: paths.into_iter().map(Into::into).collect(),
            detail: None,
        }
    }

    pub fn detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.paths.join(", "))?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Aggregated result of a batch.
///
/// `ok` is cleared only by [`fatal`](Status::fatal), which is what pre-flight
/// problems use. Execution problems go through [`error`](Status::error) and
/// the failure counter, so a batch that ran still reports `ok` and the caller
/// decides from `fail_count` which subset to commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status<V = ()> {
    pub ok: bool,
    pub success_count: usize,
    pub fail_count: usize,
    pub issues: Vec<Issue>,
    pub value: Option<V>,
}

impl<V> Default for Status<V> {
    fn default() -> Self {
        Self {
            ok: true,
            success_count: 0,
            fail_count: 0,
            issues: Vec::new(),
            value: None,
        }
    }
}

impl<V> Status<V> {
    pub fn new_good() -> Self {
        Self::default()
    }

    pub fn new_good_with(value: V) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Records an error that makes the whole operation unusable.
    pub fn fatal(&mut self, issue: Issue) {
        self.ok = false;
        self.issues.push(issue);
    }

    /// Records an error without clearing `ok`.
    pub fn error(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn warning(&mut self, mut issue: Issue) {
        issue.severity = Severity::Warning;
        self.issues.push(issue);
    }

    pub fn succeed(&mut self) {
        self.success_count += 1;
    }

    pub fn fail(&mut self) {
        self.fail_count += 1;
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// True when the operation is ok and nothing at all was reported.
    pub fn is_good(&self) -> bool {
        self.ok && self.issues.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    /// Folds another status into this one, keeping this one's value.
    pub fn merge<W>(&mut self, other: Status<W>) {
        self.ok &= other.ok;
        self.success_count += other.success_count;
        self.fail_count += other.fail_count;
        self.issues.extend(other.issues);
    }

    /// Human readable issue lines, with paths passed through `scrub`.
    pub fn messages<F>(&self, scrub: F) -> Vec<String>
    where
        F: Fn(&str) -> String,
    {
        self.issues.iter().map(|i| scrub(&i.to_string())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_vs_error() {
        let mut status: Status = Status::new_good();
        assert!(status.is_good());

        status.error(Issue::new(IssueKind::StorageIo, ["a", "b"]));
        status.fail();
        assert!(status.is_ok());
        assert!(!status.is_good());

        status.fatal(Issue::new(IssueKind::InvalidName, ["../x"]));
        assert!(!status.is_ok());
        assert_eq!(status.errors().count(), 2);
        assert_eq!(status.fail_count, 1);
    }

    #[test]
    fn test_warning_keeps_ok() {
        let mut status: Status<u8> = Status::new_good_with(7);
        status.warning(Issue::new(IssueKind::StorageIo, ["src"]).detail("delete failed"));
        status.succeed();
        assert!(status.is_ok());
        assert_eq!(status.warnings().count(), 1);
        assert_eq!(status.errors().count(), 0);
        assert_eq!(status.value, Some(7));
        assert_eq!(
            status.messages(|s| s.to_string()),
            vec!["storage-io: src (delete failed)".to_string()]
        );
    }

    #[test]
    fn test_merge_keeps_own_value() {
        let mut a: Status<u32> = Status::new_good_with(1);
        a.succeed();
        let mut b: Status<String> = Status::new_good_with("x".to_string());
        b.fail();
        b.fatal(Issue::new(IssueKind::AlreadyExists, ["k"]));
        a.merge(b);
        assert!(!a.ok);
        assert_eq!((a.success_count, a.fail_count), (1, 1));
        assert_eq!(a.value, Some(1));
    }
}
