use thiserror::Error;

use crate::config::FilenamePolicy;

/// Why a relative path was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidName {
    #[error("name is empty")]
    Empty,

    #[error("name is {len} bytes long, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("name contains a control character")]
    ControlCharacter,

    #[error("name contains illegal character {0:?}")]
    IllegalCharacter(char),

    #[error("name starts with '/'")]
    AbsolutePath,

    #[error("name contains an empty segment")]
    EmptySegment,

    #[error("name contains a '.' or '..' segment")]
    Traversal,
}

/// Checks relative paths before they are joined to a zone prefix.
///
/// This is the only thing standing between a caller supplied name and a key in
/// a sibling zone, so every destination goes through it.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: FilenamePolicy,
}

impl Validator {
    pub fn new(policy: FilenamePolicy) -> Self {
        Self { policy }
    }

    pub fn validate(&self, rel: &str) -> Result<(), InvalidName> {
        if rel.is_empty() {
            return Err(InvalidName::Empty);
        }
        if rel.len() > self.policy.max_path_bytes {
            return Err(InvalidName::TooLong {
                len: rel.len(),
                max: self.policy.max_path_bytes,
            });
        }
        // NUL included
        if rel.chars().any(char::is_control) {
            return Err(InvalidName::ControlCharacter);
        }
        if let Some(c) = rel.chars().find(|c| self.policy.illegal_chars.contains(*c)) {
            return Err(InvalidName::IllegalCharacter(c));
        }
        if rel.starts_with('/') {
            return Err(InvalidName::AbsolutePath);
        }
        for segment in rel.split('/') {
            if segment.is_empty() {
                return Err(InvalidName::EmptySegment);
            }
            if segment == "." || segment == ".." {
                return Err(InvalidName::Traversal);
            }
        }
        Ok(())
    }

    pub fn is_valid(&self, rel: &str) -> bool {
        self.validate(rel).is_ok()
    }
}
