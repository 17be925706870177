// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::error::{Error, Result};

/// A parsed version selector: `latest | v<n> | today | yesterday |
/// <n>[s|h|d|w]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector {
    Latest,
    Exact(u64),
    AtOrBefore(DateTime<Utc>),
}

pub fn parse(input: &str, now: DateTime<Utc>) -> Result<Selector> {
    let s = input.trim();
    if s.eq_ignore_ascii_case("latest") {
        return Ok(Selector::Latest);
    }
    if s.eq_ignore_ascii_case("today") {
        return Ok(Selector::AtOrBefore(now));
    }
    if s.eq_ignore_ascii_case("yesterday") {
        let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        return Ok(Selector::AtOrBefore(midnight - Duration::days(1)));
    }
    if let Some(rest) = s.strip_prefix(['v', 'V']) {
        let id: u64 = rest
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("bad version selector: {input}")))?;
        return Ok(Selector::Exact(id));
    }
    if !s.is_empty() {
        let (digits, suffix) = s.split_at(s.len() - 1);
        if let Ok(n) = digits.parse::<u64>() {
            let n = n as i64;
            let delta = match suffix {
                "s" => Duration::seconds(n),
                "h" => Duration::hours(n),
                "d" => Duration::days(n),
                "w" => Duration::weeks(n),
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "bad version selector: {input}"
                    )))
                }
            };
            return Ok(Selector::AtOrBefore(now - delta));
        }
    }
    Err(Error::InvalidArgument(format!(
        "bad version selector: {input}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_latest() {
        assert_eq!(parse("latest", now()).unwrap(), Selector::Latest);
    }

    #[test]
    fn parses_exact_version() {
        assert_eq!(parse("v42", now()).unwrap(), Selector::Exact(42));
    }

    #[test]
    fn parses_relative_hours() {
        match parse("3h", now()).unwrap() {
            Selector::AtOrBefore(t) => assert_eq!(t, now() - Duration::hours(3)),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_yesterday_before_today() {
        let today = parse("today", now()).unwrap();
        let yesterday = parse("yesterday", now()).unwrap();
        match (today, yesterday) {
            (Selector::AtOrBefore(t), Selector::AtOrBefore(y)) => assert!(y < t),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("not-a-selector", now()).is_err());
    }

    #[test]
    fn rejects_negative_time_suffix() {
        assert!(parse("-5d", now()).is_err());
    }
}
