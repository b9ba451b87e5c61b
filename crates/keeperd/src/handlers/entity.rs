//! One CRUD handler for every field-set kind (passwords, cards, notes)
//!
//! A kind only describes how its request/response messages map onto the
//! ordered plaintext fields of its [`FieldSet`]; sealing, storage calls and
//! error mapping are shared.

use std::marker::PhantomData;
use std::sync::Arc;

use keeper_core::proto::{
    CardReadResponse, CardWriteRequest, NameList, NoteReadResponse, NoteWriteRequest,
    PasswordReadResponse, PasswordWriteRequest, WriteResponse,
};
use keeper_core::UserId;
use keeper_crypto::FieldCipher;
use keeper_storage::{FieldSet, SecretRecord, Storage, CARDS, NOTES, PASSWORDS};
use tracing::debug;

use super::AppContext;
use crate::error::ServiceError;

/// Maps a kind's wire messages onto plaintext fields in [`FieldSet`] order.
pub trait EntityKind: Send + Sync + 'static {
    type Write: Send;
    type Read: Send;

    fn field_set() -> &'static FieldSet;

    /// Split a write request into its name and plaintext field values.
    fn split(write: Self::Write) -> (String, Vec<String>);

    fn assemble(id: i64, name: String, fields: Vec<String>) -> Result<Self::Read, ServiceError>;
}

fn fixed<const N: usize>(fields: Vec<String>) -> Result<[String; N], ServiceError> {
    fields
        .try_into()
        .map_err(|v: Vec<String>| ServiceError::Internal(format!("expected {N} fields, got {}", v.len())))
}

pub struct Passwords;

impl EntityKind for Passwords {
    type Write = PasswordWriteRequest;
    type Read = PasswordReadResponse;

    fn field_set() -> &'static FieldSet {
        &PASSWORDS
    }

    fn split(w: PasswordWriteRequest) -> (String, Vec<String>) {
        (w.name, vec![w.username, w.password, w.notes])
    }

    fn assemble(id: i64, name: String, fields: Vec<String>) -> Result<PasswordReadResponse, ServiceError> {
        let [username, password, notes] = fixed(fields)?;
        Ok(PasswordReadResponse {
            id,
            name,
            username,
            password,
            notes,
        })
    }
}

pub struct Cards;

impl EntityKind for Cards {
    type Write = CardWriteRequest;
    type Read = CardReadResponse;

    fn field_set() -> &'static FieldSet {
        &CARDS
    }

    fn split(w: CardWriteRequest) -> (String, Vec<String>) {
        (w.name, vec![w.number, w.pin, w.notes])
    }

    fn assemble(id: i64, name: String, fields: Vec<String>) -> Result<CardReadResponse, ServiceError> {
        let [number, pin, notes] = fixed(fields)?;
        Ok(CardReadResponse {
            id,
            name,
            number,
            pin,
            notes,
        })
    }
}

pub struct Notes;

impl EntityKind for Notes {
    type Write = NoteWriteRequest;
    type Read = NoteReadResponse;

    fn field_set() -> &'static FieldSet {
        &NOTES
    }

    fn split(w: NoteWriteRequest) -> (String, Vec<String>) {
        (w.name, vec![w.notes])
    }

    fn assemble(id: i64, name: String, fields: Vec<String>) -> Result<NoteReadResponse, ServiceError> {
        let [notes] = fixed(fields)?;
        Ok(NoteReadResponse { id, name, notes })
    }
}

/// Seal every plaintext field individually.
pub(crate) fn seal_fields(cipher: &FieldCipher, fields: &[String]) -> Result<Vec<Vec<u8>>, ServiceError> {
    fields
        .iter()
        .map(|f| cipher.encrypt(f.as_bytes()).map_err(ServiceError::from))
        .collect()
}

/// Open one sealed field. Tampering and non-UTF-8 content are both internal errors.
pub(crate) fn open_field(cipher: &FieldCipher, sealed: &[u8]) -> Result<String, ServiceError> {
    let plain = cipher.decrypt(sealed)?;
    String::from_utf8(plain).map_err(|_| ServiceError::Internal("field is not valid UTF-8".into()))
}

pub struct EntityHandler<K, S> {
    ctx: Arc<AppContext<S>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind, S: Storage> EntityHandler<K, S> {
    pub fn new(ctx: Arc<AppContext<S>>) -> Self {
        Self {
            ctx,
            _kind: PhantomData,
        }
    }

    pub async fn list(&self, user: &UserId) -> Result<NameList, ServiceError> {
        let names = self.ctx.store.list(K::field_set(), user.as_str()).await?;
        Ok(NameList { names })
    }

    pub async fn write(&self, user: &UserId, write: K::Write) -> Result<WriteResponse, ServiceError> {
        let (name, plain) = K::split(write);
        let record = SecretRecord {
            id: 0,
            user_id: user.as_str().to_owned(),
            name,
            fields: seal_fields(&self.ctx.cipher, &plain)?,
        };
        let id = self.ctx.store.write(K::field_set(), &record).await?;
        debug!(user = %user, kind = %K::field_set().kind, id, "record created");
        Ok(WriteResponse { id })
    }

    pub async fn read(&self, user: &UserId, name: &str) -> Result<K::Read, ServiceError> {
        let record = self.ctx.store.read(K::field_set(), user.as_str(), name).await?;
        let fields = record
            .fields
            .iter()
            .map(|sealed| open_field(&self.ctx.cipher, sealed))
            .collect::<Result<Vec<_>, _>>()?;
        K::assemble(record.id, record.name, fields)
    }

    /// Replace the record `id` wholesale; the name may change.
    pub async fn update(&self, user: &UserId, id: i64, write: K::Write) -> Result<(), ServiceError> {
        let (name, plain) = K::split(write);
        let record = SecretRecord {
            id,
            user_id: user.as_str().to_owned(),
            name,
            fields: seal_fields(&self.ctx.cipher, &plain)?,
        };
        self.ctx.store.update(K::field_set(), &record).await?;
        debug!(user = %user, kind = %K::field_set().kind, id, "record updated");
        Ok(())
    }

    pub async fn delete(&self, user: &UserId, name: &str) -> Result<(), ServiceError> {
        self.ctx.store.delete(K::field_set(), user.as_str(), name).await?;
        debug!(user = %user, kind = %K::field_set().kind, "record deleted");
        Ok(())
    }
}
