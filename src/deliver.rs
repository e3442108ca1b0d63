//! Renders unseen entries into mail messages and hands them to a
//! sendmail-compatible transport.
//!
//! The message shape is a user-owned template with `{{placeholder}}` markers;
//! rendering is plain substitution, no template engine. Transport is one
//! child process per message with the rendered mail on stdin — delivery
//! guarantees beyond the process exit status are out of scope.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::feed::Entry;

/// Errors that can occur while rendering or sending a message.
///
/// A delivery failure stops the current feed's delivery loop; the watermark
/// advances only through entries already delivered.
#[derive(Debug, Error)]
pub enum DeliverError {
    /// The mail template file could not be read.
    #[error("Failed to read mail template '{path}': {source}")]
    Template {
        path: String,
        source: std::io::Error,
    },
    /// The template is present but empty — nothing sensible to send.
    #[error("Mail template '{0}' is empty")]
    EmptyTemplate(String),
    /// The configured mail command has no program name.
    #[error("Mail command is empty")]
    EmptyCommand,
    /// The transport process could not be spawned.
    #[error("Failed to invoke mail command '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Writing the message to the transport's stdin failed.
    #[error("Failed to write message to mail command: {0}")]
    Pipe(std::io::Error),
    /// Waiting on the transport process failed.
    #[error("Failed to wait for mail command: {0}")]
    Wait(std::io::Error),
    /// The transport exited with a non-zero status.
    #[error("Mail command exited with status {0}")]
    Transport(i32),
}

/// Sends rendered entries through an external sendmail-compatible command.
pub struct Mailer {
    program: String,
    args: Vec<String>,
    template: String,
}

impl Mailer {
    /// Builds a mailer from a command line (e.g. `"sendmail -t"`) and the
    /// template text.
    pub fn new(command: &str, template: String) -> Result<Self, DeliverError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(DeliverError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
            template,
        })
    }

    /// Builds a mailer with the template loaded from `template_path`.
    pub fn from_template_file(command: &str, template_path: &Path) -> Result<Self, DeliverError> {
        let template =
            std::fs::read_to_string(template_path).map_err(|source| DeliverError::Template {
                path: template_path.display().to_string(),
                source,
            })?;
        if template.trim().is_empty() {
            return Err(DeliverError::EmptyTemplate(
                template_path.display().to_string(),
            ));
        }
        Self::new(command, template)
    }

    /// Renders one entry into a mail message.
    ///
    /// Substitutes `{{feed_title}}`, `{{article_title}}`, `{{article_url}}`,
    /// `{{article_description}}`, `{{content_type}}`, and `{{date}}`. Absent
    /// entry fields render as empty text.
    pub fn render(&self, feed_title: &str, entry: &Entry) -> String {
        let content_type = if entry.is_html {
            "text/html; charset=utf-8"
        } else {
            "text/plain; charset=utf-8"
        };

        let mut message = self.template.clone();
        replace_placeholder(&mut message, "{{feed_title}}", feed_title);
        replace_placeholder(
            &mut message,
            "{{article_title}}",
            entry.title.as_deref().unwrap_or(""),
        );
        replace_placeholder(
            &mut message,
            "{{article_url}}",
            entry.url.as_deref().unwrap_or(""),
        );
        replace_placeholder(
            &mut message,
            "{{article_description}}",
            entry.content.as_deref().unwrap_or(""),
        );
        replace_placeholder(&mut message, "{{content_type}}", content_type);
        replace_placeholder(&mut message, "{{date}}", &chrono::Utc::now().to_rfc2822());
        message
    }

    /// Renders and sends one entry, waiting for the transport to exit.
    pub async fn deliver(&self, feed_title: &str, entry: &Entry) -> Result<(), DeliverError> {
        let message = self.render(feed_title, entry);
        self.send(&message).await
    }

    async fn send(&self, message: &str) -> Result<(), DeliverError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| DeliverError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        // stdin is piped above, so take() cannot return None. A transport
        // that exits without draining stdin surfaces as BrokenPipe here; the
        // exit status below is the authoritative outcome, so that case is
        // not treated as a pipe failure.
        if let Some(mut stdin) = child.stdin.take() {
            let result = async {
                stdin.write_all(message.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await
            }
            .await;
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(DeliverError::Pipe(e)),
            }
        }

        let status = child.wait().await.map_err(DeliverError::Wait)?;
        if !status.success() {
            return Err(DeliverError::Transport(status.code().unwrap_or(-1)));
        }
        Ok(())
    }
}

// Scans forward past each substitution so marker-shaped text inside a
// feed's own content is never re-expanded.
fn replace_placeholder(text: &mut String, marker: &str, replacement: &str) {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(marker) {
        let index = search_from + offset;
        text.replace_range(index..index + marker.len(), replacement);
        search_from = index + replacement.len();
    }
}
