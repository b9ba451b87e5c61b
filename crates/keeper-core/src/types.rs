use std::fmt;

/// Authenticated user identity (the login name).
///
/// Only the identity layer constructs this from a validated token; handlers
/// read it back from the request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kinds of secret a user can store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    Password,
    Card,
    Note,
    Binary,
}

impl SecretKind {
    pub const ALL: [SecretKind; 4] = [Self::Password, Self::Card, Self::Note, Self::Binary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Card => "card",
            Self::Note => "note",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
