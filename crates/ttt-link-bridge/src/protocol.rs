//! Wire protocol for host <-> device communication
//!
//! Every frame is one compact JSON object followed by `\n`.
//!
//! Host -> device frames carry a `command` discriminator:
//! `{"command":"MOVE","row":0,"col":2}`, `{"command":"MODE","mode":1}`, `{"command":"RESET"}`.
//!
//! Device -> host frames are either a board snapshot `{"board":[[..],[..],[..]]}`
//! or a message with a `type` of `game_status`, `win_status` or `game_mode`.

use serde::Deserialize;
use serde_json::json;
use ttt_link_core::{BoardView, DecodeError, GameMode, InboundEvent, OutboundCommand};

/// Frame delimiter
pub const DELIMITER: u8 = b'\n';

/// Inbound record before it is classified
#[derive(Debug, Deserialize)]
struct DeviceRecord {
    #[serde(default)]
    board: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    mode: Option<serde_json::Value>,
}

/// Serialize a command to a delimited wire frame
pub fn encode(command: &OutboundCommand) -> Vec<u8> {
    let object = match command {
        OutboundCommand::Move { row, col } => json!({
            "command": command.name(),
            "row": row.get(),
            "col": col.get(),
        }),
        OutboundCommand::SetMode { mode } => json!({
            "command": command.name(),
            "mode": mode.as_u8(),
        }),
        OutboundCommand::Reset => json!({ "command": command.name() }),
    };

    let mut frame = object.to_string().into_bytes();
    frame.push(DELIMITER);
    frame
}

/// Decode one frame into an event
///
/// Surrounding whitespace and the delimiter are ignored.
pub fn decode(line: &[u8]) -> Result<InboundEvent, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim();

    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(DecodeError::MalformedSyntax(format!(
            "expected a JSON object, got {}",
            preview(text)
        )));
    }
    let record: DeviceRecord = serde_json::from_value(value)?;

    if let Some(board) = record.board {
        return decode_board(board);
    }

    match (record.kind.as_deref(), record.message) {
        (Some("game_status"), Some(text)) | (None, Some(text)) => {
            Ok(InboundEvent::StatusMessage { text })
        }
        (Some("win_status"), Some(text)) => Ok(InboundEvent::WinStatus { text }),
        (Some("game_mode"), Some(text)) => Ok(InboundEvent::ModeAck {
            mode: record.mode.as_ref().and_then(mode_from_value),
            text,
        }),
        (Some(kind @ ("game_status" | "win_status" | "game_mode")), None) => Err(
            DecodeError::ShapeViolation(format!("{} record has no message", kind)),
        ),
        (Some(kind), _) => Err(DecodeError::UnknownDiscriminator(kind.to_string())),
        (None, None) => Err(DecodeError::UnknownDiscriminator(
            "record has neither board nor type".into(),
        )),
    }
}

/// Decode a frame, folding failures into a `ProtocolError` event
pub fn decode_lossy(line: &[u8]) -> InboundEvent {
    decode(line).unwrap_or_else(InboundEvent::from)
}

fn decode_board(board: serde_json::Value) -> Result<InboundEvent, DecodeError> {
    let rows: Vec<Vec<String>> = serde_json::from_value(board)
        .map_err(|e| DecodeError::ShapeViolation(format!("board is not a grid of strings: {}", e)))?;
    let cells = BoardView::from_rows(&rows)?;
    Ok(InboundEvent::BoardUpdate { cells })
}

fn mode_from_value(value: &serde_json::Value) -> Option<GameMode> {
    let raw = u8::try_from(value.as_u64()?).ok()?;
    GameMode::try_from(raw).ok()
}

/// First 200 characters of a frame, for logs and error text
pub fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
