//! Per-recipient message construction.
//!
//! A `ComposedMessage` is built fresh for every attempt: the template is
//! personalised, each configured image is embedded inline under a content-id
//! equal to its file stem, and every regular file currently in the
//! attachments directory is attached. The directory is re-scanned each time,
//! so files added mid-run are picked up by later recipients.

use crate::error::DispatchError;
use crate::template::MessageTemplate;
use crate::types::Recipient;
use anyhow::{Context, Result};
use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use std::path::{Path, PathBuf};

/// Used when an image extension is not recognised.
const DEFAULT_IMAGE_TYPE: &str = "image/png";
const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub content_id: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A fully-formed message for exactly one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub inline_images: Vec<InlineImage>,
    pub attachments: Vec<FileAttachment>,
}

impl ComposedMessage {
    /// Assemble the MIME tree:
    /// `mixed( related( html, inline images… ), attachments… )`.
    /// The `mixed` wrapper is omitted when there are no attachments.
    pub fn to_message(&self) -> Result<Message> {
        let from: Mailbox = self.from.parse().map_err(|e| {
            DispatchError::MessageBuild(format!("sender {:?}: {}", self.from, e))
        })?;
        let to = recipient_mailbox(&self.to)?;

        let mut related = MultiPart::related().singlepart(SinglePart::html(self.html_body.clone()));
        for image in &self.inline_images {
            let content_type = parse_content_type(&image.content_type)?;
            related = related.singlepart(
                Attachment::new_inline(image.content_id.clone())
                    .body(image.data.clone(), content_type),
            );
        }

        let body = if self.attachments.is_empty() {
            related
        } else {
            let mut mixed = MultiPart::mixed().multipart(related);
            for attachment in &self.attachments {
                let content_type = parse_content_type(&attachment.content_type)?;
                mixed = mixed.singlepart(
                    Attachment::new(attachment.file_name.clone())
                        .body(attachment.data.clone(), content_type),
                );
            }
            mixed
        };

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .multipart(body)
            .map_err(|e| DispatchError::MessageBuild(e.to_string()))?;
        Ok(message)
    }
}

/// Parse a bare recipient address the way the message header will.
///
/// Display-name forms such as `Ana <ana@example.com>` are rejected.
pub(crate) fn recipient_mailbox(address: &str) -> Result<Mailbox, DispatchError> {
    match address.parse::<Mailbox>() {
        Ok(mailbox) if mailbox.name.is_none() => Ok(mailbox),
        _ => Err(DispatchError::InvalidRecipient(address.to_string())),
    }
}

fn parse_content_type(raw: &str) -> Result<ContentType> {
    let content_type = ContentType::parse(raw)
        .map_err(|e| DispatchError::MessageBuild(format!("content type {:?}: {}", raw, e)))?;
    Ok(content_type)
}

/// Builds `ComposedMessage`s for a run. Holds only read-only inputs.
#[derive(Debug, Clone)]
pub struct Composer {
    template: MessageTemplate,
    sender: String,
    subject: String,
    image_paths: Vec<PathBuf>,
    attachments_dir: PathBuf,
}

impl Composer {
    pub fn new(
        template: MessageTemplate,
        sender: impl Into<String>,
        subject: impl Into<String>,
        image_paths: Vec<PathBuf>,
        attachments_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template,
            sender: sender.into(),
            subject: subject.into(),
            image_paths,
            attachments_dir: attachments_dir.into(),
        }
    }

    pub async fn compose(&self, recipient: &Recipient) -> Result<ComposedMessage> {
        let to = recipient.address();
        if to.is_empty() {
            return Err(DispatchError::InvalidRecipient(recipient.email.clone()).into());
        }

        let mut inline_images = Vec::with_capacity(self.image_paths.len());
        for path in &self.image_paths {
            inline_images.push(load_inline_image(path).await?);
        }

        Ok(ComposedMessage {
            from: self.sender.trim().to_string(),
            to: to.to_string(),
            subject: self.subject.clone(),
            html_body: self.template.render(recipient),
            inline_images,
            attachments: scan_attachments(&self.attachments_dir).await?,
        })
    }
}

async fn load_inline_image(path: &Path) -> Result<InlineImage> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| DispatchError::missing(path, e))?;

    Ok(InlineImage {
        content_id: file_stem(path),
        file_name: file_name(path),
        content_type: guess_content_type(path, DEFAULT_IMAGE_TYPE),
        data,
    })
}

/// Every regular file directly inside `dir`, sorted by name. A missing
/// directory means no attachments.
pub(crate) async fn scan_attachments(dir: &Path) -> Result<Vec<FileAttachment>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DispatchError::missing(dir, e).into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let path = entry.path();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| DispatchError::missing(&path, e))?;
        if metadata.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| DispatchError::missing(&path, e))?;
        attachments.push(FileAttachment {
            file_name: file_name(&path),
            content_type: guess_content_type(&path, DEFAULT_ATTACHMENT_TYPE),
            data,
        });
    }
    Ok(attachments)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn guess_content_type(path: &Path, fallback: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| fallback.to_string())
}
