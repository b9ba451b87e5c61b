//! Request validation, run before any handler logic

use keeper_core::proto::*;

use crate::error::ServiceError;

pub const MAX_NAME_CHARS: usize = 128;
pub const MAX_LOGIN_CHARS: usize = 64;

/// Shape checks on an inbound message. Failures are `InvalidArgument`.
pub trait Validate {
    fn validate(&self) -> Result<(), ServiceError>;
}

fn check_name(name: &str) -> Result<(), ServiceError> {
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_NAME_CHARS {
        return Err(ServiceError::invalid(format!(
            "name must be 1..={MAX_NAME_CHARS} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ServiceError::invalid("name must not contain control characters"));
    }
    Ok(())
}

fn check_id(field: &str, id: i64) -> Result<(), ServiceError> {
    if id <= 0 {
        return Err(ServiceError::invalid(format!("{field} must be positive")));
    }
    Ok(())
}

fn check_credentials(login: &str, password: &str) -> Result<(), ServiceError> {
    let chars = login.chars().count();
    if chars == 0 || chars > MAX_LOGIN_CHARS {
        return Err(ServiceError::invalid(format!(
            "login must be 1..={MAX_LOGIN_CHARS} characters"
        )));
    }
    if login.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ServiceError::invalid("login must not contain whitespace"));
    }
    if password.is_empty() {
        return Err(ServiceError::invalid("password must not be empty"));
    }
    Ok(())
}

impl Validate for Empty {
    fn validate(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_credentials(&self.login, &self.password)
    }
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_credentials(&self.login, &self.password)
    }
}

impl Validate for ReadRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_name(&self.name)
    }
}

impl Validate for DeleteRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_name(&self.name)
    }
}

impl Validate for PasswordWriteRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_name(&self.name)
    }
}

impl Validate for CardWriteRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_name(&self.name)?;
        if self.number.is_empty() || !self.number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::invalid("card number must be digits only"));
        }
        Ok(())
    }
}

impl Validate for NoteWriteRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_name(&self.name)
    }
}

impl Validate for BinaryWriteRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_name(&self.name)?;
        if self.size < 0 {
            return Err(ServiceError::invalid("size must not be negative"));
        }
        Ok(())
    }
}

/// Update requests wrap a write request; both parts are checked.
fn check_update<W: Validate>(id: i64, write: Option<&W>) -> Result<(), ServiceError> {
    check_id("id", id)?;
    write
        .ok_or_else(|| ServiceError::invalid("write is required"))?
        .validate()
}

impl Validate for PasswordUpdateRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_update(self.id, self.write.as_ref())
    }
}

impl Validate for CardUpdateRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_update(self.id, self.write.as_ref())
    }
}

impl Validate for NoteUpdateRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_update(self.id, self.write.as_ref())
    }
}

impl Validate for BinaryUpdateRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.bin_id < 0 {
            return Err(ServiceError::invalid("bin_id must not be negative"));
        }
        check_update(self.id, self.write.as_ref())
    }
}

impl Validate for BinaryUploadChunk {
    fn validate(&self) -> Result<(), ServiceError> {
        check_id("bin_id", self.bin_id)
    }
}

impl Validate for BinaryDownloadRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        check_id("bin_id", self.bin_id)
    }
}
