//! The one timestamp format the journal ever writes or reads (§3 invariant 5).

use chrono::{Local, NaiveDateTime, TimeZone};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

pub fn now() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

/// Parse a timestamp previously produced by [`now`]. The `%Z` zone name is
/// not round-trippable, so parsing drops it and assumes local time.
pub fn parse(s: &str) -> Option<chrono::DateTime<Local>> {
    let naive_part = s.rsplit_once(' ').map(|(rest, _zone)| rest).unwrap_or(s);
    NaiveDateTime::parse_from_str(naive_part, "%Y-%m-%d %H:%M:%S")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_parses_back() {
        let ts = now();
        assert!(parse(&ts).is_some());
    }
}
