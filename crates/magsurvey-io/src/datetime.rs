//! Mixed-format timestamp parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Datetime layouts tried in order after RFC 3339.
///
/// Day-first slashed dates are tried before month-first ones, so an ambiguous
/// `03/04/2024` is read as 3 April.
pub const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Layout of each end of an observation date range.
pub const OBSERVATION_DATE_FORMAT: &str = "%m/%d/%Y";

/// Parse a timestamp in any accepted layout.
///
/// RFC 3339 values with an offset are converted to UTC. A bare `%Y-%m-%d`
/// date means midnight. Returns `None` if nothing matches.
#[must_use]
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Format a time range as an `"Observation Dates"` tag value, e.g.
/// `06/01/2023 - 06/03/2023`.
#[must_use]
pub fn observation_dates(start: NaiveDateTime, end: NaiveDateTime) -> String {
    format!(
        "{} - {}",
        start.format(OBSERVATION_DATE_FORMAT),
        end.format(OBSERVATION_DATE_FORMAT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(h: u32, m: u32, s: u32, milli: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_milli_opt(h, m, s, milli)
            .unwrap()
    }

    #[test]
    fn accepts_every_layout() {
        let cases = [
            ("2024-03-14T09:26:53Z", expected(9, 26, 53, 0)),
            ("2024-03-14T11:26:53+02:00", expected(9, 26, 53, 0)),
            ("2024-03-14 09:26:53", expected(9, 26, 53, 0)),
            ("2024-03-14 09:26:53.250", expected(9, 26, 53, 250)),
            ("2024-03-14T09:26:53.5", expected(9, 26, 53, 500)),
            ("2024/03/14 09:26:53", expected(9, 26, 53, 0)),
            ("14/03/2024 09:26:53", expected(9, 26, 53, 0)),
            ("03/14/2024 09:26:53", expected(9, 26, 53, 0)),
            ("2024-03-14 09:26", expected(9, 26, 0, 0)),
            ("2024-03-14", expected(0, 0, 0, 0)),
            ("  2024-03-14 09:26:53  ", expected(9, 26, 53, 0)),
        ];
        for (raw, want) in cases {
            assert_eq!(parse_datetime(raw), Some(want), "{raw}");
        }
    }

    #[test]
    fn ambiguous_slash_date_is_day_first() {
        let dt = parse_datetime("03/04/2024 00:00:00").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 4, 3).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_datetime(""), None);
        assert_eq!(parse_datetime("yesterday"), None);
        assert_eq!(parse_datetime("2024-13-01 00:00:00"), None);
    }

    #[test]
    fn observation_date_range() {
        let start = expected(9, 0, 0, 0);
        let end = NaiveDate::from_ymd_opt(2024, 3, 16)
            .unwrap()
            .and_hms_opt(17, 0, 0)
            .unwrap();
        assert_eq!(observation_dates(start, end), "03/14/2024 - 03/16/2024");
    }
}
