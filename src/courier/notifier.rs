//! Stage notifications over the parent IPC stream
//!
//! The sync subprocess reports which phase it is in as line-framed JSON
//! objects: `{"type":"stage","stage":"COLLECTION"}`. The parent filters on
//! the `type` field; messages with other types pass through silently.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A courier sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourierSyncStage {
    /// Collecting cargo from the courier
    Collection,
    /// Waiting between the phases
    Wait,
    /// Delivering cargo to the courier
    Delivery,
}

#[derive(Debug, Serialize, Deserialize)]
struct StageMessage<'a> {
    #[serde(rename = "type")]
    message_type: &'a str,
    stage: CourierSyncStage,
}

/// Writes stage events to the parent process stream.
pub struct StageNotifier<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> StageNotifier<W> {
    /// Wrap a writer (stdout in the subprocess).
    pub fn new(writer: W) -> StageNotifier<W> {
        StageNotifier { writer }
    }

    /// Emit one stage event.
    pub async fn notify(&mut self, stage: CourierSyncStage) -> std::io::Result<()> {
        let message = StageMessage {
            message_type: "stage",
            stage,
        };
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }
}

/// Parse one IPC line on the parent side. Returns the stage string for
/// `type == "stage"` messages and `None` for everything else (including
/// lines that are not JSON objects).
pub fn parse_stage_event(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    if value.get("type")?.as_str()? != "stage" {
        return None;
    }
    Some(value.get("stage")?.as_str()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_writes_json_lines() {
        let mut buffer = Vec::new();
        {
            let mut notifier = StageNotifier::new(&mut buffer);
            notifier.notify(CourierSyncStage::Collection).await.unwrap();
            notifier.notify(CourierSyncStage::Wait).await.unwrap();
            notifier.notify(CourierSyncStage::Delivery).await.unwrap();
        }

        let lines: Vec<&str> = std::str::from_utf8(&buffer)
            .unwrap()
            .lines()
            .collect();
        assert_eq!(
            lines,
            vec![
                r#"{"type":"stage","stage":"COLLECTION"}"#,
                r#"{"type":"stage","stage":"WAIT"}"#,
                r#"{"type":"stage","stage":"DELIVERY"}"#,
            ]
        );
    }

    #[test]
    fn test_parse_stage_event() {
        assert_eq!(
            parse_stage_event(r#"{"type":"stage","stage":"COLLECTION"}"#),
            Some("COLLECTION".to_string())
        );
    }

    #[test]
    fn test_parse_ignores_other_types() {
        assert_eq!(parse_stage_event(r#"{"type":"log","message":"hi"}"#), None);
        assert_eq!(parse_stage_event("not json"), None);
        assert_eq!(parse_stage_event(r#"{"stage":"WAIT"}"#), None);
    }

    #[test]
    fn test_stage_serialization_values() {
        assert_eq!(
            serde_json::to_string(&CourierSyncStage::Collection).unwrap(),
            "\"COLLECTION\""
        );
        assert_eq!(
            serde_json::to_string(&CourierSyncStage::Wait).unwrap(),
            "\"WAIT\""
        );
        assert_eq!(
            serde_json::to_string(&CourierSyncStage::Delivery).unwrap(),
            "\"DELIVERY\""
        );
    }
}
