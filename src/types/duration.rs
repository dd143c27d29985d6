//! Conversions between [`Duration`] and the representations sources use for it.
//!
//! Sources are not consistent: numeric seconds (possibly fractional), numeric strings,
//! ISO-8601 durations (`PT1H2M3S`) and clock strings (`1:02:03`) are all seen in the wild.

use std::{fmt::Write, sync::OnceLock, time::Duration};

use regex::Regex;
use serde::Deserialize;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Duration exactly as a source delivered it
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Seconds(f64),
    Text(String),
}

impl RawDuration {
    pub fn normalize(&self) -> Result<Duration, String> {
        match self {
            RawDuration::Seconds(secs) => from_secs_f64(*secs),
            RawDuration::Text(text) => parse_any(text),
        }
    }
}

fn from_secs_f64(secs: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|_| format!("Invalid duration of {secs} seconds"))
}

/// Parse any of the textual duration representations
pub fn parse_any(text: &str) -> Result<Duration, String> {
    let text = text.trim();

    if text.starts_with(['P', 'p']) {
        parse_iso8601(text)
    } else if text.contains(':') {
        parse_clock(text)
    } else {
        let secs = text
            .parse::<f64>()
            .map_err(|_| format!("Unrecognized duration '{text}'"))?;
        from_secs_f64(secs)
    }
}

/// Parse a clock formatted duration: `SS`, `MM:SS` or `HH:MM:SS`.
///
/// Every component is a number of the next smaller unit times 60,
/// so `90:00` is accepted as 90 minutes.
pub fn parse_clock(text: &str) -> Result<Duration, String> {
    let mut secs: u64 = 0;
    for part in text.split(':') {
        let n = part
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("Invalid clock duration '{text}'"))?;
        secs = secs
            .checked_mul(60)
            .and_then(|s| s.checked_add(n))
            .ok_or_else(|| format!("Clock duration '{text}' is too large"))?;
    }
    Ok(Duration::from_secs(secs))
}

fn iso8601_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^P(?:(?P<w>\d+)W)?(?:(?P<d>\d+)D)?(?:T(?:(?P<h>\d+)H)?(?:(?P<m>\d+)M)?(?:(?P<s>\d+(?:[.,]\d+)?)S)?)?$",
        )
        .expect("ISO-8601 duration regex is valid")
    })
}

/// Parse the time-span subset of ISO-8601 durations.
///
/// Years and months are rejected as they do not map to a fixed number of seconds.
pub fn parse_iso8601(text: &str) -> Result<Duration, String> {
    let invalid = || format!("Invalid ISO-8601 duration '{text}'");

    let caps = iso8601_regex().captures(text).ok_or_else(invalid)?;

    // "P" and "PT" alone match the regex but carry no component
    if !["w", "d", "h", "m", "s"].iter().any(|k| caps.name(k).is_some()) {
        return Err(invalid());
    }

    let int = |name: &str, unit: u64| -> Result<u64, String> {
        caps.name(name)
            .map_or(Ok(0), |m| m.as_str().parse::<u64>().map_err(|_| invalid()))?
            .checked_mul(unit)
            .ok_or_else(invalid)
    };

    let whole = [
        int("w", 7 * SECS_PER_DAY)?,
        int("d", SECS_PER_DAY)?,
        int("h", SECS_PER_HOUR)?,
        int("m", SECS_PER_MINUTE)?,
    ]
    .into_iter()
    .try_fold(0u64, |acc, n| acc.checked_add(n))
    .ok_or_else(invalid)?;

    let secs = match caps.name("s") {
        Some(s) => s
            .as_str()
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| invalid())?,
        None => 0.0,
    };

    Duration::from_secs(whole)
        .checked_add(from_secs_f64(secs)?)
        .ok_or_else(invalid)
}

/// Format a duration as an ISO-8601 duration, with at most millisecond precision.
///
/// Days are not used so the output never depends on calendar semantics:
/// 25 hours is `PT25H`.
pub fn format_iso8601(duration: Duration) -> String {
    let total = duration.as_secs();
    let millis = duration.subsec_millis();

    let hours = total / SECS_PER_HOUR;
    let minutes = (total % SECS_PER_HOUR) / SECS_PER_MINUTE;
    let secs = total % SECS_PER_MINUTE;

    let mut out = String::from("PT");
    if hours > 0 {
        let _ = write!(out, "{hours}H");
    }
    if minutes > 0 {
        let _ = write!(out, "{minutes}M");
    }
    if secs > 0 || millis > 0 || (hours == 0 && minutes == 0) {
        if millis > 0 {
            let _ = write!(out, "{secs}.{millis:03}S");
        } else {
            let _ = write!(out, "{secs}S");
        }
    }
    out
}

/// Format a duration as `H:MM:SS`, for humans
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{}:{:02}:{:02}",
        total / SECS_PER_HOUR,
        (total % SECS_PER_HOUR) / SECS_PER_MINUTE,
        total % SECS_PER_MINUTE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [u64; 8] = [0, 1, 59, 61, 3_599, 3_723, 86_400, 90_061 + 86_400 * 3];

    #[test]
    fn iso8601_round_trip() {
        for secs in SAMPLES {
            let d = Duration::from_secs(secs);
            let text = format_iso8601(d);
            assert_eq!(parse_iso8601(&text).unwrap(), d, "{text}");
        }
    }

    #[test]
    fn iso8601_round_trip_keeps_millis() {
        let d = Duration::from_millis(7_384_250);
        assert_eq!(format_iso8601(d), "PT2H3M4.250S");
        assert_eq!(parse_iso8601("PT2H3M4.250S").unwrap(), d);
    }

    #[test]
    fn iso8601_format() {
        assert_eq!(format_iso8601(Duration::ZERO), "PT0S");
        assert_eq!(format_iso8601(Duration::from_secs(3_600)), "PT1H");
        assert_eq!(format_iso8601(Duration::from_secs(90_000)), "PT25H");
        assert_eq!(format_iso8601(Duration::from_secs(212)), "PT3M32S");
    }

    #[test]
    fn iso8601_with_days_and_weeks() {
        assert_eq!(
            parse_iso8601("P1DT2H").unwrap(),
            Duration::from_secs(26 * 3_600)
        );
        assert_eq!(
            parse_iso8601("P1W").unwrap(),
            Duration::from_secs(7 * 86_400)
        );
        assert_eq!(parse_iso8601("pt1m").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn iso8601_rejects_garbage() {
        for text in ["P", "PT", "P1Y", "PT1H1H", "1H", "PT-5S", ""] {
            assert!(parse_iso8601(text).is_err(), "{text}");
        }
    }

    #[test]
    fn clock_durations() {
        assert_eq!(parse_clock("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_clock("3:32").unwrap(), Duration::from_secs(212));
        assert_eq!(parse_clock("1:02:03").unwrap(), Duration::from_secs(3_723));
        assert_eq!(
            parse_clock("26:00:00").unwrap(),
            Duration::from_secs(93_600)
        );
        assert!(parse_clock("1:xx").is_err());
        assert_eq!(format_clock(Duration::from_secs(93_661)), "26:01:01");
    }

    #[test]
    fn raw_durations_normalize() {
        let cases = [
            (RawDuration::Seconds(212.0), Duration::from_secs(212)),
            (RawDuration::Seconds(1.5), Duration::from_millis(1_500)),
            (RawDuration::Text("212".into()), Duration::from_secs(212)),
            (RawDuration::Text("PT3M32S".into()), Duration::from_secs(212)),
            (RawDuration::Text("3:32".into()), Duration::from_secs(212)),
        ];
        for (raw, expected) in cases {
            assert_eq!(raw.normalize().unwrap(), expected, "{raw:?}");
        }

        assert!(RawDuration::Seconds(-1.0).normalize().is_err());
        assert!(RawDuration::Seconds(f64::NAN).normalize().is_err());
        assert!(RawDuration::Text("soon".into()).normalize().is_err());
    }

    #[test]
    fn raw_duration_from_json() {
        let n: RawDuration = serde_json::from_str("212").unwrap();
        assert_eq!(n, RawDuration::Seconds(212.0));
        let s: RawDuration = serde_json::from_str("\"PT1H\"").unwrap();
        assert_eq!(s, RawDuration::Text("PT1H".into()));
    }
}
