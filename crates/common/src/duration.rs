//! Parsing for human-written duration strings in function configuration,
//! eg `"500ms"`, `"5s"`, `"2m"`.

use std::time::Duration;

use anyhow::Context;
use errors::ErrorMetadata;

/// Parse a duration of the form `<integer><unit>` with unit one of
/// `ms`, `s`, `m`, `h`. A bare integer is taken as milliseconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .ok()
        .with_context(|| format!("invalid duration {s:?}"))
        .map_err(|e| {
            e.context(ErrorMetadata::bad_request(
                "InvalidDuration",
                format!("{s:?} is not a valid duration"),
            ))
        })?;
    let duration = match unit {
        "ms" | "" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        other => anyhow::bail!(ErrorMetadata::bad_request(
            "InvalidDuration",
            format!("unknown duration unit {other:?} in {s:?}"),
        )),
    };
    Ok(duration)
}
