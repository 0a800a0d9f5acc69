//! Loading already-extracted document text from disk.

use std::path::Path;

use serde_json::json;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::Document;

const EXTENSIONS: &[&str] = &["txt", "md"];

/// Page separator left by PDF text extraction.
const FORM_FEED: char = '\u{000C}';

/// Walk `dir` for `.txt` / `.md` files, sorted by path.
///
/// `source` is the file name. Unreadable or non-UTF-8 files are logged
/// and skipped. A missing directory yields no documents.
pub fn load_documents(dir: &Path) -> Vec<Document> {
    if !dir.is_dir() {
        warn!("Documents directory {} does not exist", dir.display());
        return Vec::new();
    }

    let mut documents = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !has_supported_extension(path) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                continue;
            }
        };

        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut document = Document::new(source, text);
        let pages = count_pages(&document.text);
        document
            .metadata
            .extra
            .insert("pages".to_string(), json!(pages));
        document.metadata.extra.insert(
            "path".to_string(),
            json!(path.strip_prefix(dir).unwrap_or(path).display().to_string()),
        );
        documents.push(document);
    }

    info!("Loaded {} documents from {}", documents.len(), dir.display());
    documents
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn count_pages(text: &str) -> usize {
    text.split(FORM_FEED)
        .filter(|page| !page.trim().is_empty())
        .count()
        .max(1)
}
