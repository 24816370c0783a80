use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC timestamp.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Format a timestamp as RFC 3339 for wire responses.
///
/// Falls back to the `Debug` rendering if formatting fails, which only
/// happens for timestamps outside the RFC 3339 year range.
pub fn format_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| format!("{ts:?}"))
}
