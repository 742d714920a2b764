//! Transport-neutral response for a generated derivative.
//!
//! A [`DerivativeResult`] is either bytes held in memory (placeholder renders)
//! or a file on disk. [`Response`] keeps that split but attaches the content
//! type, so an HTTP layer can map `Content` to a body and `File` to a
//! sendfile-style reply without inspecting anything else.

use crate::manager::DerivativeResult;
use std::borrow::Cow;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Content {
        body: Vec<u8>,
        content_type: &'static str,
    },
    File {
        path: PathBuf,
        content_type: &'static str,
    },
}

impl Response {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Content { content_type, .. } | Self::File { content_type, .. } => content_type,
        }
    }

    /// Response body, reading the file for [`Response::File`].
    pub fn body(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match self {
            Self::Content { body, .. } => Ok(Cow::Borrowed(body)),
            Self::File { path, .. } => Ok(Cow::Owned(std::fs::read(path)?)),
        }
    }
}

impl From<DerivativeResult> for Response {
    fn from(result: DerivativeResult) -> Self {
        match result {
            DerivativeResult::Encoded(encoded) => Self::Content {
                body: encoded.bytes,
                content_type: encoded.mime,
            },
            DerivativeResult::File { path, mime } => Self::File {
                path,
                content_type: mime,
            },
        }
    }
}
