//! Upload kinds and their limits.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Avatar image types accepted for upload.
const AVATAR_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// What a presigned upload URL is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    #[default]
    Video,
    Avatar,
}

/// Reason an upload request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejection {
    #[error("Invalid filename.")]
    InvalidFilename,
    #[error("Filename and content_type in body are required.")]
    MissingField,
    #[error("Unsupported avatar image type: {0}")]
    UnsupportedContentType(String),
}

impl UploadKind {
    /// Maximum object size in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        match self {
            UploadKind::Video => 50 * 1024 * 1024,
            UploadKind::Avatar => 5 * 1024 * 1024,
        }
    }

    /// Key prefix under which user uploads of this kind are stored.
    pub fn folder(&self) -> &'static str {
        match self {
            UploadKind::Video => "uploads/videos",
            UploadKind::Avatar => "uploads/avatars",
        }
    }

    /// Validate the filename and content type for this kind.
    pub fn validate(&self, filename: &str, content_type: &str) -> Result<(), UploadRejection> {
        if filename.trim().is_empty() || content_type.trim().is_empty() {
            return Err(UploadRejection::MissingField);
        }
        if filename.contains('/') || filename.contains('\\') {
            return Err(UploadRejection::InvalidFilename);
        }
        if *self == UploadKind::Avatar && !AVATAR_CONTENT_TYPES.contains(&content_type) {
            return Err(UploadRejection::UnsupportedContentType(content_type.to_string()));
        }
        Ok(())
    }

    /// Build the object key `{folder}/{user}/{object_id}{ext}`.
    ///
    /// The extension is taken from the original filename, including the dot.
    pub fn object_key(&self, user_id: &str, object_id: &str, filename: &str) -> String {
        format!(
            "{}/{}/{}{}",
            self.folder(),
            user_id,
            object_id,
            file_extension(filename)
        )
    }
}

fn file_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        // A leading dot is a hidden file name, not an extension.
        Some(0) | None => "",
        Some(idx) => &filename[idx..],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_content_types() {
        assert!(UploadKind::Avatar.validate("me.png", "image/png").is_ok());
        assert_eq!(
            UploadKind::Avatar.validate("me.bmp", "image/bmp"),
            Err(UploadRejection::UnsupportedContentType("image/bmp".into()))
        );
        // Video content types are not restricted
        assert!(UploadKind::Video.validate("clip.mkv", "video/x-matroska").is_ok());
    }

    #[test]
    fn test_rejects_path_separators() {
        assert_eq!(
            UploadKind::Video.validate("../clip.mp4", "video/mp4"),
            Err(UploadRejection::InvalidFilename)
        );
        assert_eq!(
            UploadKind::Video.validate("a\\b.mp4", "video/mp4"),
            Err(UploadRejection::InvalidFilename)
        );
    }

    #[test]
    fn test_object_key_keeps_extension() {
        assert_eq!(
            UploadKind::Video.object_key("u1", "abc", "funny.cat.mp4"),
            "uploads/videos/u1/abc.mp4"
        );
        assert_eq!(
            UploadKind::Avatar.object_key("u1", "abc", ".hidden"),
            "uploads/avatars/u1/abc"
        );
    }

    #[test]
    fn test_size_limits() {
        assert_eq!(UploadKind::Video.max_size_bytes(), 52_428_800);
        assert_eq!(UploadKind::Avatar.max_size_bytes(), 5_242_880);
    }
}
