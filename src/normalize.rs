//! Turns dropped or picked files into prompt text.

use anyhow::Context;
use base64::Engine;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::progress::{self, Kind};

pub const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Pdf,
    Presentation,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" | "image/png" | "image/gif" => Some(MediaKind::Image),
            "application/pdf" => Some(MediaKind::Pdf),
            PPTX_MIME => Some(MediaKind::Presentation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileInput {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FileInput {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, mime.essence_str(), bytes))
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime)
    }
}

/// Keeps the supported files. Fails when none are left, so nothing is forwarded.
pub fn accept(files: Vec<FileInput>) -> Result<Vec<FileInput>, ChatError> {
    let (accepted, rejected): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| f.kind().is_some());

    for file in &rejected {
        warn!("Dropping {} ({}): unsupported type", file.name, file.mime);
    }

    if accepted.is_empty() {
        let types: Vec<&str> = rejected.iter().map(|f| f.mime.as_str()).collect();
        return Err(ChatError::UnsupportedFileType(types.join(", ")));
    }
    Ok(accepted)
}

pub async fn normalize(file: &FileInput) -> Result<String, ChatError> {
    let prompt = match file.kind() {
        Some(MediaKind::Image) => image_prompt(file)?,
        Some(MediaKind::Pdf) => pdf_prompt(file).await?,
        Some(MediaKind::Presentation) => raw_text_prompt(file),
        None => return Err(ChatError::UnsupportedFileType(file.mime.clone())),
    };
    progress::log_with(Kind::Extract, format!("Read {} ({} bytes)", file.name, file.bytes.len()));
    Ok(prompt)
}

/// Normalizes every file in order and joins the prompts with a blank line.
/// The first failure aborts the whole batch.
pub async fn normalize_all(files: &[FileInput]) -> Result<String, ChatError> {
    let mut prompts = Vec::with_capacity(files.len());
    for file in files {
        prompts.push(normalize(file).await?);
    }
    Ok(prompts.join("\n\n"))
}

/// The data URI carries the format found in the bytes, so a misnamed
/// extension still embeds correctly.
fn image_prompt(file: &FileInput) -> Result<String, ChatError> {
    use image::ImageFormat;

    let detected = image::guess_format(&file.bytes).map_err(|e| extraction(file, e.to_string()))?;
    if !matches!(detected, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif) {
        return Err(extraction(file, format!("content is {:?}, not JPEG, PNG or GIF", detected)));
    }
    let mime = detected.to_mime_type();
    if mime != file.mime {
        debug!("{} is declared {} but contains {}", file.name, file.mime, mime);
    }

    let encoded = base64::engine::general_purpose::STANDARD.encode(&file.bytes);
    Ok(format!("Analyze this image: data:{};base64,{}", mime, encoded))
}

async fn pdf_prompt(file: &FileInput) -> Result<String, ChatError> {
    let bytes = file.bytes.clone();

    // pdf-extract is CPU bound and may panic on broken input
    let pages = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
    })
    .await
    .map_err(|e| extraction(file, e.to_string()))?
    .map_err(|e| extraction(file, e.to_string()))?;

    debug!("Extracted {} pages from {}", pages.len(), file.name);
    let pages: Vec<&str> = pages.iter().map(|page| page.trim()).collect();
    Ok(format!("Analyze this PDF content:\n{}", pages.join("\n")))
}

fn raw_text_prompt(file: &FileInput) -> String {
    let text = String::from_utf8_lossy(&file.bytes);
    format!("Analyze this {} content: {}", file.mime, text)
}

fn extraction(file: &FileInput, reason: String) -> ChatError {
    ChatError::Extraction {
        mime: file.mime.clone(),
        reason,
    }
}
