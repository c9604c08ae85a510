//! Outbound message assembly.
//!
//! A [`Message`] is a value: recipient, subject, content, attachment
//! descriptors, and the generated `Message-ID` and `Date` headers, which
//! are fixed at construction and never change. The only fields that may be
//! set later are the `From` header (applied from driver configuration) and
//! the DKIM signature line.

pub mod attachment;
pub mod mime;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_common::address;

pub use attachment::{Attachment, AttachmentWarning, ResolvedAttachment};

/// Construction-time validation failures, surfaced before any I/O.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The recipient is not a syntactically valid mailbox.
    #[error(transparent)]
    RecipientInvalid(#[from] address::AddressError),

    /// The subject is empty.
    #[error("message subject must not be empty")]
    SubjectMissing,

    /// Serialisation was attempted before a `From` header was applied.
    #[error("message has no From header")]
    FromMissing,
}

/// The body's declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    #[default]
    Html,
    MultipartMixed,
    MultipartAlternative,
}

impl ContentKind {
    #[must_use]
    pub const fn as_mime(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Html => "text/html",
            Self::MultipartMixed => "multipart/mixed",
            Self::MultipartAlternative => "multipart/alternative",
        }
    }

    const fn is_multipart(self) -> bool {
        matches!(self, Self::MultipartMixed | Self::MultipartAlternative)
    }
}

/// A complete serialisation: the wire bytes plus any attachments that had
/// to be left out. Transports decide how severe the warnings are.
#[derive(Debug, Clone)]
pub struct SerializedMessage {
    pub data: String,
    pub warnings: Vec<AttachmentWarning>,
}

/// An outbound email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    to: String,
    from: Option<String>,
    subject: String,
    kind: ContentKind,
    content: String,
    attachments: Vec<Attachment>,
    message_id: String,
    date: String,
    dkim_signature: Option<String>,
}

impl Message {
    /// Builds a message, validating the recipient and subject.
    ///
    /// `Message-ID` and `Date` are generated here and never regenerated.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::RecipientInvalid`] or
    /// [`MessageError::SubjectMissing`] on validation failure.
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
        kind: ContentKind,
    ) -> Result<Self, MessageError> {
        let to = to.into();
        let subject = subject.into();

        address::validate_mailbox(&to)?;
        if subject.trim().is_empty() {
            return Err(MessageError::SubjectMissing);
        }

        let now = Utc::now();
        Ok(Self {
            to,
            from: None,
            subject,
            kind,
            content: content.into(),
            attachments: Vec::new(),
            message_id: generate_message_id(now),
            date: now.to_rfc2822(),
            dkim_signature: None,
        })
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    /// Applies the `From` header value. Transports refuse to serialise a
    /// message that never received one.
    pub fn set_from(&mut self, from: impl Into<String>) {
        self.from = Some(from.into());
    }

    /// Attaches the full `DKIM-Signature: …` line produced by the signer.
    pub fn set_dkim_signature(&mut self, line: impl Into<String>) {
        self.dkim_signature = Some(line.into());
    }

    #[must_use]
    pub fn to_address(&self) -> &str {
        &self.to
    }

    #[must_use]
    pub fn from_header(&self) -> Option<&str> {
        self.from.as_deref()
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub const fn kind(&self) -> ContentKind {
        self.kind
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn date(&self) -> &str {
        &self.date
    }

    #[must_use]
    pub fn dkim_signature(&self) -> Option<&str> {
        self.dkim_signature.as_deref()
    }

    /// The structural headers in emission order, excluding MIME framing.
    /// `From` is present only once applied.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(5);
        if let Some(from) = &self.from {
            headers.push(("From".to_string(), from.clone()));
        }
        headers.push(("To".to_string(), self.to.clone()));
        headers.push(("Subject".to_string(), self.subject.clone()));
        headers.push(("Date".to_string(), self.date.clone()));
        headers.push(("Message-ID".to_string(), self.message_id.clone()));
        headers
    }

    /// Serialises the complete RFC 5322 message.
    ///
    /// The DKIM signature, when present, is the very first header so that
    /// relays see it before any MIME framing. Attachments that cannot be
    /// read are reported in the result's warnings and left out of the
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::FromMissing`] when no `From` header has been
    /// applied.
    pub fn to_rfc5322(&self) -> Result<SerializedMessage, MessageError> {
        if self.from.is_none() {
            return Err(MessageError::FromMissing);
        }

        let mut out = String::with_capacity(self.content.len() + 512);
        let mut warnings = Vec::new();

        if let Some(signature) = &self.dkim_signature {
            out.push_str(signature);
            out.push_str("\r\n");
        }
        for (name, value) in self.headers() {
            out.push_str(&name);
            out.push_str(": ");
            out.push_str(&value);
            out.push_str("\r\n");
        }
        out.push_str("MIME-Version: 1.0\r\n");

        if self.attachments.is_empty() {
            if self.kind.is_multipart() {
                out.push_str(&format!("Content-Type: {}\r\n", self.kind.as_mime()));
            } else {
                out.push_str(&format!(
                    "Content-Type: {}; charset=UTF-8\r\n",
                    self.kind.as_mime()
                ));
            }
            out.push_str("\r\n");
            out.push_str(&normalize_crlf(&self.content));
        } else {
            let boundary = mime::boundary();
            out.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
            ));
            self.write_multipart_body(&boundary, &mut out, &mut warnings);
        }

        Ok(SerializedMessage { data: out, warnings })
    }

    fn write_multipart_body(
        &self,
        boundary: &str,
        out: &mut String,
        warnings: &mut Vec<AttachmentWarning>,
    ) {
        let body_mime = match self.kind {
            ContentKind::Text => "text/plain",
            _ => "text/html",
        };

        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str(&format!("Content-Type: {body_mime}; charset=UTF-8\r\n"));
        out.push_str("Content-Transfer-Encoding: 7bit\r\n\r\n");
        out.push_str(&normalize_crlf(&self.content));
        out.push_str("\r\n");

        for attachment in &self.attachments {
            let resolved = attachment.resolve();
            match resolved.read() {
                Ok(bytes) => {
                    out.push_str(&format!("--{boundary}\r\n"));
                    out.push_str(&format!("Content-Type: {}\r\n", resolved.mime_type));
                    out.push_str(&format!(
                        "Content-Disposition: attachment; filename=\"{}\"\r\n",
                        resolved.filename
                    ));
                    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
                    out.push_str(&mime::encode_base64_chunked(&bytes));
                }
                Err(warning) => {
                    tracing::warn!(
                        path = %warning.path.display(),
                        reason = %warning.reason,
                        "dropping unreadable attachment"
                    );
                    warnings.push(warning);
                }
            }
        }

        out.push_str(&format!("--{boundary}--\r\n"));
    }
}

/// `<token.timestamp@host>`, unique with overwhelming probability even for
/// messages constructed in the same millisecond.
fn generate_message_id(now: DateTime<Utc>) -> String {
    let mut token_bytes = [0_u8; 8];
    rand::thread_rng().fill_bytes(&mut token_bytes);
    let token: String = token_bytes.iter().map(|b| format!("{b:02x}")).collect();

    let host = gethostname::gethostname();
    let host = host.to_string_lossy();
    let host = if host.is_empty() {
        "localhost"
    } else {
        host.as_ref()
    };

    format!("<{token}.{}@{host}>", now.timestamp())
}

/// Converts bare LF (and stray CR) line endings to CRLF.
#[must_use]
pub fn normalize_crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                out.push_str("\r\n");
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\n' => out.push_str("\r\n"),
            other => out.push(other),
        }
    }
    out
}
