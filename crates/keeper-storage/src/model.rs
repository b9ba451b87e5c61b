//! Row types and per-kind field descriptors

use keeper_core::SecretKind;

/// Static description of one secret table: its name and the ordered list of
/// encrypted columns. Handlers and storage agree on field order through it.
#[derive(Debug)]
pub struct FieldSet {
    pub table: &'static str,
    pub kind: SecretKind,
    pub fields: &'static [&'static str],
}

pub static PASSWORDS: FieldSet = FieldSet {
    table: "passwords",
    kind: SecretKind::Password,
    fields: &["username", "password", "notes"],
};

pub static CARDS: FieldSet = FieldSet {
    table: "cards",
    kind: SecretKind::Card,
    fields: &["number", "pin", "notes"],
};

pub static NOTES: FieldSet = FieldSet {
    table: "notes",
    kind: SecretKind::Note,
    fields: &["notes"],
};

/// Binary metadata. Only `notes` is sealed; size and object id are plain.
pub static BINARIES: FieldSet = FieldSet {
    table: "binaries",
    kind: SecretKind::Binary,
    fields: &["notes"],
};

/// A registered account
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub passwd_hash: String,
}

/// One password, card or note row. `fields` holds ciphertext in
/// [`FieldSet::fields`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub fields: Vec<Vec<u8>>,
}

/// Binary metadata row. `bin_id` names the large object holding the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryRecord {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub size: i64,
    pub notes: Vec<u8>,
    pub bin_id: i64,
}

/// Bytes read from a large object together with the generation they belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChunk {
    pub generation: i64,
    pub bytes: Vec<u8>,
}

/// Per-kind record counts for one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub passwords: i64,
    pub cards: i64,
    pub notes: i64,
    pub binaries: i64,
}
