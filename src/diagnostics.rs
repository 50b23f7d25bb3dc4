//! Human-readable diagnostic lines for device and context errors
//!
//! Each report is a single line written to a caller-supplied stream
//! (stderr in the CLI, a byte vector in tests). Every function returns the
//! number of characters written; "no error" writes nothing and returns 0.

use crate::backend::{ContextError, DeviceError};
use std::io::{self, Write};

/// Prefix used for source/buffer level failures
pub const DEVICE_ERROR_PREFIX: &str = "Device error";

/// Prefix used for device/context level failures
pub const CONTEXT_ERROR_PREFIX: &str = "Context error";

/// Write `"{message} in {context}: {details}!"`, leaving out the parts that
/// are absent.
///
/// Without a message the line is the generic `"Unknown error occurred!"`,
/// naming the context when one is given.
pub fn print_error_message<W: Write + ?Sized>(
    out: &mut W,
    message: Option<&str>,
    context: Option<&str>,
    details: Option<&str>,
) -> io::Result<usize> {
    let line = format_error_message(message, context, details);
    out.write_all(line.as_bytes())?;
    Ok(line.chars().count())
}

fn format_error_message(
    message: Option<&str>,
    context: Option<&str>,
    details: Option<&str>,
) -> String {
    let Some(message) = message else {
        return match context {
            Some(context) => format!("Unknown error occurred in {context}!\n"),
            None => "Unknown error occurred!\n".to_string(),
        };
    };

    match (context, details) {
        (Some(context), Some(details)) => format!("{message} in {context}: {details}!\n"),
        (Some(context), None) => format!("{message} in {context}!\n"),
        (None, Some(details)) => format!("{message}: {details}!\n"),
        (None, None) => format!("{message}!\n"),
    }
}

/// Report a source/buffer level error that happened while doing `context`.
///
/// Returns 0 for `None` and when the stream refuses the write.
pub fn report_device_error<W: Write + ?Sized>(
    out: &mut W,
    error: Option<DeviceError>,
    context: &str,
) -> usize {
    let written = match error {
        None => return 0,
        Some(DeviceError::Unknown(_)) => print_error_message(out, None, Some(context), None),
        Some(error) => print_error_message(
            out,
            Some(DEVICE_ERROR_PREFIX),
            Some(context),
            Some(&error.to_string()),
        ),
    };
    written.unwrap_or(0)
}

/// Report a device/context level error that happened while doing `context`.
pub fn report_context_error<W: Write + ?Sized>(
    out: &mut W,
    error: Option<ContextError>,
    context: &str,
) -> usize {
    let written = match error {
        None => return 0,
        Some(ContextError::Unknown(_)) => print_error_message(out, None, Some(context), None),
        Some(error) => print_error_message(
            out,
            Some(CONTEXT_ERROR_PREFIX),
            Some(context),
            Some(&error.to_string()),
        ),
    };
    written.unwrap_or(0)
}
