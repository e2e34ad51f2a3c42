use chrono::{DateTime, TimeZone};
use std::fmt::Display;

use crate::domain::message::Address;

/// Display name if present, bare address otherwise.
pub fn addresses_short(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(|a| match a.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => a.addr.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `name <address>` if a display name exists, bare address otherwise.
pub fn addresses_long(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(|a| match a.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, a.addr),
            _ => a.addr.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn date_short<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    date.format("%Y-%m-%d %H:%M").to_string()
}

/// e.g. `Tuesday, July 1, 2003, 08:52`. Only the day of month loses its leading zero.
pub fn date_long<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    date.format("%A, %B %-d, %Y, %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;
    use rstest::*;

    use super::*;

    #[fixture]
    fn addresses() -> Vec<Address> {
        vec![
            Address {
                name: Some("Alice".into()),
                addr: "alice@example.com".into(),
            },
            Address {
                name: None,
                addr: "bob@example.com".into(),
            },
        ]
    }

    #[fixture]
    fn date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2003-07-01T08:05:00+02:00").unwrap()
    }

    #[rstest]
    fn test_short_addresses_prefer_display_name(addresses: Vec<Address>) {
        assert_eq!(addresses_short(&addresses), "Alice, bob@example.com");
    }

    #[rstest]
    fn test_long_addresses_include_bracketed_address(addresses: Vec<Address>) {
        assert_eq!(
            addresses_long(&addresses),
            "Alice <alice@example.com>, bob@example.com"
        );
        assert_eq!(addresses_long(&[]), "");
    }

    #[rstest]
    fn test_short_date(date: DateTime<FixedOffset>) {
        assert_eq!(date_short(&date), "2003-07-01 08:05");
    }

    #[rstest]
    fn test_long_date_strips_day_zero_but_not_hour_zero(date: DateTime<FixedOffset>) {
        assert_eq!(date_long(&date), "Tuesday, July 1, 2003, 08:05");
    }
}
