//! Built-in tools shipped with Carnet.

use chrono::{FixedOffset, Utc};

use super::tool::FnTool;
use super::types::ToolParameters;
use crate::error::CarnetError;

/// `current_datetime`: the current date and time, optionally shifted to a
/// fixed UTC offset.
pub fn current_datetime_tool() -> FnTool {
    FnTool::new(
        "current_datetime",
        "Return the current date and time (RFC 3339). Optionally pass utc_offset_minutes.",
        ToolParameters::object()
            .number(
                "utc_offset_minutes",
                "Offset from UTC in minutes, e.g. 120 for UTC+2",
                false,
            )
            .build(),
        |args, _ctx| async move {
            let offset_minutes = args
                .raw()
                .get("utc_offset_minutes")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let offset = offset_minutes
                .checked_mul(60)
                .and_then(|secs| i32::try_from(secs).ok())
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| {
                    CarnetError::InvalidArgument(format!(
                        "utc_offset_minutes out of range: {offset_minutes}"
                    ))
                })?;
            let now = Utc::now().with_timezone(&offset);
            Ok(serde_json::json!({
                "datetime": now.to_rfc3339(),
                "weekday": now.format("%A").to_string(),
            }))
        },
    )
}
