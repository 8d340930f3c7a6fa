//! # Multipart Module
//!
//! `multipart/form-data` bodies, parsed through the `multipart` crate's
//! server half. Entries carrying a filename become [`UploadedFile`]s; the
//! rest are plain text fields.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use multipart::server::Multipart;
use tracing::debug;

use crate::error::HandlerError;

/// A file entry from a multipart body, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// The form field name the file was sent under.
    pub field_name: String,
    /// Client-supplied filename, as sent. Sanitized only on save.
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    /// Write the file into `dir`, keeping only the final component of the
    /// client filename so an uploaded `../../etc/passwd` cannot escape.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf, HandlerError> {
        let name = Path::new(&self.filename)
            .file_name()
            .ok_or_else(|| HandlerError::Multipart(format!("bad filename: {}", self.filename)))?;
        std::fs::create_dir_all(dir)?;
        let dest = dir.join(name);
        std::fs::write(&dest, &self.data)?;
        debug!(path = %dest.display(), bytes = self.data.len(), "upload saved");
        Ok(dest)
    }
}

/// Parsed multipart form: text fields in order, plus uploaded files.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

impl MultipartForm {
    /// Parse a request body using the boundary from its `Content-Type`.
    pub fn parse(content_type: &str, body: &[u8]) -> Result<Self, HandlerError> {
        let boundary = extract_boundary(content_type).ok_or_else(|| {
            HandlerError::Multipart(format!("no boundary in content type: {content_type}"))
        })?;

        let mut form = MultipartForm::default();
        let mut reader = Multipart::with_body(Cursor::new(body), boundary);
        loop {
            let entry = reader
                .read_entry()
                .map_err(|e| HandlerError::Multipart(e.to_string()))?;
            let Some(mut entry) = entry else { break };

            let name = entry.headers.name.to_string();
            let mut data = Vec::new();
            entry
                .data
                .read_to_end(&mut data)
                .map_err(|e| HandlerError::Multipart(e.to_string()))?;

            match entry.headers.filename.clone() {
                Some(filename) => form.files.push(UploadedFile {
                    field_name: name,
                    filename,
                    data,
                }),
                None => {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    form.fields.push((name, value));
                }
            }
        }
        Ok(form)
    }

    /// First text field with the given name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First uploaded file sent under the given field name.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field_name == name)
    }
}

/// Pull the boundary parameter out of a `multipart/form-data` content type.
fn extract_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        let value = part.strip_prefix("boundary=")?;
        Some(value.trim_matches('"').to_string())
    })
}
