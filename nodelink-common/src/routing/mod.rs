// Topic and service name validation
//
// Topics and services share the same naming rules. A name is checked once at
// the API boundary and carried around as a `TopicName` afterwards, so the
// registries never see an unvalidated string.

use std::fmt;
use thiserror::Error;

/// Why a topic or service name was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name [{0}] is not valid: a bare '/' is not a topic")]
    RootOnly(String),
    #[error("name [{0}] contains whitespace")]
    Whitespace(String),
    #[error("name [{name}] contains reserved character '{ch}'")]
    ReservedCharacter { name: String, ch: char },
    #[error("name [{0}] contains an empty segment ('//')")]
    EmptySegment(String),
}

const RESERVED: [char; 3] = ['~', '@', ':'];

/// A validated topic or service name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicName(String);

impl TopicName {
    /// Validate and wrap a name
    pub fn new(name: impl AsRef<str>) -> Result<Self, NameError> {
        let name = name.as_ref();
        validate(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for TopicName {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        TopicName::new(value)
    }
}

/// Check a topic or service name without allocating
pub fn validate(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name == "/" {
        return Err(NameError::RootOnly(name.to_string()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NameError::Whitespace(name.to_string()));
    }
    if let Some(ch) = name.chars().find(|c| RESERVED.contains(c)) {
        return Err(NameError::ReservedCharacter {
            name: name.to_string(),
            ch,
        });
    }
    if name.contains("//") {
        return Err(NameError::EmptySegment(name.to_string()));
    }
    Ok(())
}

pub fn is_valid(name: &str) -> bool {
    validate(name).is_ok()
}
