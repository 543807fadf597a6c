use crate::core::message::{Message, MessageKind};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Plain-text conversation log, appended one message at a time.
pub struct TranscriptLog {
    file_path: Option<PathBuf>,
    is_active: bool,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

impl TranscriptLog {
    pub fn new(log_file: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut log = TranscriptLog {
            file_path: None,
            is_active: false,
        };
        if let Some(path) = log_file {
            log.set_log_file(path)?;
        }
        Ok(log)
    }

    pub fn set_log_file(&mut self, path: PathBuf) -> Result<String, Box<dyn std::error::Error>> {
        // Fail early if the file cannot be opened for appending
        OpenOptions::new().create(true).append(true).open(&path)?;

        let message = format!("Logging enabled to: {}", path.display());
        self.file_path = Some(path);
        self.is_active = true;
        Ok(message)
    }

    pub fn toggle_logging(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        match &self.file_path {
            Some(path) => {
                if self.is_active {
                    self.write_block("## Logging paused")?;
                    self.is_active = false;
                    Ok(format!("Logging paused (file: {})", path.display()))
                } else {
                    self.is_active = true;
                    Ok(format!("Logging resumed to: {}", path.display()))
                }
            }
            None => Err("No log file specified. Use /log <filename> to enable logging first.".into()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn status(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", file_name(path)),
            (Some(path), false) => format!("paused ({})", file_name(path)),
        }
    }

    /// Append a settled message. Streaming bubbles are skipped; they are
    /// logged once they finish.
    pub fn log_message(&self, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
        if !self.is_active || message.is_streaming() {
            return Ok(());
        }
        self.write_block(&format_entry(message))
    }

    fn write_block(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_ref() else {
            return Ok(());
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::new(file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        // Blank line between entries
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

fn format_entry(message: &Message) -> String {
    match &message.kind {
        MessageKind::User => format!("You: {}", message.content),
        MessageKind::Coach(reply) => format!("{} {}: {}", reply.emoji, reply.coach, message.content),
        MessageKind::System { .. } => format!("## {}", message.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coach::default_coaches;
    use tempfile::TempDir;

    #[test]
    fn logs_settled_messages_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log");
        let log = TranscriptLog::new(Some(path.clone())).unwrap();
        assert!(log.is_active());

        let coach = &default_coaches()[2];
        let mut reply = Message::coach_placeholder(2, coach);
        log.log_message(&Message::user(1, "Push me")).unwrap();
        log.log_message(&reply).unwrap();
        reply.content = "Stay hard.\nNo excuses.".to_string();
        reply.coach_reply_mut().unwrap().is_streaming = false;
        log.log_message(&reply).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "You: Push me\n\n🔥 David Goggins: Stay hard.\nNo excuses.\n\n"
        );
    }

    #[test]
    fn toggle_pauses_and_resumes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log");

        let mut log = TranscriptLog::new(None).unwrap();
        assert_eq!(log.status(), "disabled");
        assert!(log.toggle_logging().is_err());

        log.set_log_file(path.clone()).unwrap();
        assert!(log.toggle_logging().unwrap().starts_with("Logging paused"));
        assert_eq!(log.status(), "paused (chat.log)");
        log.log_message(&Message::user(1, "hidden")).unwrap();

        log.toggle_logging().unwrap();
        assert_eq!(log.status(), "active (chat.log)");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "## Logging paused\n\n");
    }
}
