//! Input shape checks run before any I/O.
//!
//! Every violation in a request is collected so the client sees all of them
//! at once: `validation failed: field title is required, field email must be
//! a valid email address`.

use crate::errors::{AppError, AppResult};
use crate::models::{
    photo::{PhotoUpdateInput, PhotoUploadInput},
    user::{LoginRequest, RegisterRequest},
};

pub const MAX_UPLOAD_BYTES: i64 = 10 * 1024 * 1024;
pub const TITLE_MAX_LEN: usize = 255;
pub const DESCRIPTION_MAX_LEN: usize = 1000;
const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 50;
const PASSWORD_MIN_LEN: usize = 8;

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn push(&mut self, field: &str, problem: impl AsRef<str>) {
        self.0.push(format!("field {field} {}", problem.as_ref()));
    }

    fn required(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.push(field, "is required");
            return false;
        }
        true
    }

    fn max_len(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.push(field, format!("must be at most {max} characters long"));
        }
    }

    fn min_len(&mut self, field: &str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.push(field, format!("must be at least {min} characters long"));
        }
    }

    fn email(&mut self, field: &str, value: &str) {
        if !is_valid_email(value) {
            self.push(field, "must be a valid email address");
        }
    }

    fn finish(self) -> AppResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::bad_request(format!(
                "validation failed: {}",
                self.0.join(", ")
            )))
        }
    }
}

pub fn validate_registration(input: &RegisterRequest) -> AppResult<()> {
    let mut v = Violations::default();
    if v.required("username", &input.username) {
        v.min_len("username", &input.username, USERNAME_MIN_LEN);
        v.max_len("username", &input.username, USERNAME_MAX_LEN);
    }
    if v.required("email", &input.email) {
        v.email("email", &input.email);
    }
    if v.required("password", &input.password) {
        v.min_len("password", &input.password, PASSWORD_MIN_LEN);
    }
    v.finish()
}

pub fn validate_login(input: &LoginRequest) -> AppResult<()> {
    let mut v = Violations::default();
    if v.required("email", &input.email) {
        v.email("email", &input.email);
    }
    v.required("password", &input.password);
    v.finish()
}

pub fn validate_upload(input: &PhotoUploadInput) -> AppResult<()> {
    let mut v = Violations::default();
    if v.required("title", &input.title) {
        v.max_len("title", &input.title, TITLE_MAX_LEN);
    }
    if let Some(description) = &input.description {
        v.max_len("description", description, DESCRIPTION_MAX_LEN);
    }
    v.required("file_name", &input.file_name);
    v.required("content_type", &input.content_type);
    if input.file_size <= 0 {
        v.push("file_size", "is required");
    } else if input.file_size > MAX_UPLOAD_BYTES {
        v.push("file_size", format!("must be at most {MAX_UPLOAD_BYTES} bytes"));
    }
    v.finish()
}

pub fn validate_update(input: &PhotoUpdateInput) -> AppResult<()> {
    let mut v = Violations::default();
    if let Some(title) = &input.title {
        if v.required("title", title) {
            v.max_len("title", title, TITLE_MAX_LEN);
        }
    }
    if let Some(description) = &input.description {
        v.max_len("description", description, DESCRIPTION_MAX_LEN);
    }
    v.finish()
}

/// Structural check only: `local@domain.tld`, no whitespace, non-empty labels.
fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || !domain.contains('.') {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
