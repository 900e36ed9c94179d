use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug)]
pub enum TimestampError {
    OutOfRange(time::error::ComponentRange),
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::OutOfRange(err) => write!(f, "timestamp out of range: {err}"),
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

impl std::error::Error for TimestampError {}

/// Unix seconds as an RFC 3339 UTC string.
pub fn format_unix_timestamp(seconds: i64) -> Result<String, TimestampError> {
    let datetime =
        OffsetDateTime::from_unix_timestamp(seconds).map_err(TimestampError::OutOfRange)?;
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

/// Like [`format_unix_timestamp`], falling back to the raw number for log fields.
pub fn display_unix_timestamp(seconds: i64) -> String {
    format_unix_timestamp(seconds).unwrap_or_else(|_| seconds.to_string())
}
