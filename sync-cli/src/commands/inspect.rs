//! Decode a wire frame.

use anyhow::{Context, Result};
use wist_sync_types::Frame;

/// Run the inspect command.
pub fn run(frame_hex: &str) -> Result<()> {
    let bytes = hex::decode(frame_hex.trim()).context("Frame is not valid hex")?;
    let view = describe(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

/// JSON view of a frame: the raw fields plus the decoded kind and sender.
fn describe(bytes: &[u8]) -> Result<serde_json::Value> {
    let frame = Frame::from_bytes(bytes).context("Not a WIST frame")?;
    let payload = frame.payload().context("Frame payload is malformed")?;

    let mut view = serde_json::to_value(&frame)?;
    if let Some(fields) = view.as_object_mut() {
        fields.insert(
            "sender".to_string(),
            serde_json::Value::String(frame.sender_id.to_string()),
        );
        fields.insert(
            "kind_name".to_string(),
            serde_json::Value::String(format!("{:?}", payload.kind())),
        );
        fields.insert("bytes".to_string(), serde_json::Value::from(bytes.len()));
    }
    Ok(view)
}
