//! Blob storage layout.
//!
//! Blobs use the files-and-chunks pattern: one metadata document per blob
//! in [`FILES_COLLECTION`], and its bytes split into fixed-size chunk
//! documents in [`CHUNKS_COLLECTION`]. A chunk's `_id` is the document
//! `{"f": <blob id>, "n": <index>}`.

use chrono::Utc;
use ldx_types::{doc, Document, Value};

/// Collection holding blob metadata documents.
pub const FILES_COLLECTION: &str = "_files";

/// Collection holding blob chunks. Never shown to users.
pub const CHUNKS_COLLECTION: &str = "_chunks";

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Identity value of chunk `index` of blob `id`.
pub fn chunk_id(id: &str, index: usize) -> Value {
    Value::Document(doc! { "f" => id, "n" => index as i32 })
}

/// Metadata document for a freshly uploaded blob.
pub fn metadata(id: &str, filename: &str, length: usize, chunks: usize) -> Document {
    doc! {
        "_id" => id,
        "filename" => filename,
        "mimeType" => mime_type(filename),
        "length" => length as i64,
        "chunks" => chunks as i32,
        "uploadDate" => Utc::now(),
        "metadata" => Document::new(),
    }
}

/// Guess a MIME type from the file extension.
pub fn mime_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_type("photo.JPG"), "image/jpeg");
        assert_eq!(mime_type("notes.txt"), "text/plain");
        assert_eq!(mime_type("noext"), "application/octet-stream");
    }

    #[test]
    fn metadata_fields() {
        let meta = metadata("logo", "logo.png", 10, 1);
        assert_eq!(meta.get("_id"), Some(&Value::from("logo")));
        assert_eq!(meta.get("mimeType"), Some(&Value::from("image/png")));
        assert_eq!(meta.get("length"), Some(&Value::Int64(10)));
        assert_eq!(meta.get("chunks"), Some(&Value::Int32(1)));
    }

    #[test]
    fn chunk_ids_differ_by_index() {
        assert_ne!(chunk_id("a", 0), chunk_id("a", 1));
    }
}
