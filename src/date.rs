use time::{Date, Month, OffsetDateTime};

/// Parse a PDF date string (`D:YYYYMMDDHHmmSS` with an optional
/// `Z`/`+HH'mm'`/`-HH'mm'` zone suffix) into seconds since the Unix epoch.
///
/// Returns `None` when the bytes are not a well-formed date, so callers can
/// fall back to treating them as an ordinary string.
pub fn parse(bytes: &[u8]) -> Option<i64> {
    let rest = bytes.strip_prefix(b"D:")?;

    let mut fields = FieldReader { rest };

    let year = fields.digits(4)?;
    let month = fields.digits_or(2, 1)?;
    let day = fields.digits_or(2, 1)?;
    let hour = fields.digits_or(2, 0)?;
    let minute = fields.digits_or(2, 0)?;
    let second = fields.digits_or(2, 0)?;

    let mut offset_seconds: i64 = 0;

    match fields.rest.first() {
        None => {}
        Some(b'Z') => {
            fields.rest = &fields.rest[1..];
            // some producers write Z00'00'
            fields.skip_zone_digits();
        }
        Some(sign @ (b'+' | b'-')) => {
            let sign = if *sign == b'-' { -1 } else { 1 };
            fields.rest = &fields.rest[1..];

            let zone_hour = fields.digits(2)? as i64;
            let mut zone_minute = 0i64;

            if fields.rest.first() == Some(&b'\'') {
                fields.rest = &fields.rest[1..];

                if !fields.rest.is_empty() {
                    zone_minute = fields.digits(2)? as i64;

                    if fields.rest.first() == Some(&b'\'') {
                        fields.rest = &fields.rest[1..];
                    }
                }
            }

            offset_seconds = sign * (zone_hour * 3600 + zone_minute * 60);
        }
        Some(..) => return None,
    }

    if !fields.rest.is_empty() {
        return None;
    }

    let date = Date::from_calendar_date(
        i32::from(year),
        Month::try_from(u8::try_from(month).ok()?).ok()?,
        u8::try_from(day).ok()?,
    )
    .ok()?;
    let datetime = date
        .with_hms(
            u8::try_from(hour).ok()?,
            u8::try_from(minute).ok()?,
            u8::try_from(second).ok()?,
        )
        .ok()?;

    Some(datetime.assume_utc().unix_timestamp() - offset_seconds)
}

/// Format seconds since the Unix epoch as a UTC PDF date string.
pub fn format(seconds: i64) -> String {
    let datetime =
        OffsetDateTime::from_unix_timestamp(seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH);

    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}Z",
        datetime.year(),
        datetime.month() as u8,
        datetime.day(),
        datetime.hour(),
        datetime.minute(),
        datetime.second()
    )
}

struct FieldReader<'a> {
    rest: &'a [u8],
}

impl FieldReader<'_> {
    fn digits(&mut self, len: usize) -> Option<u16> {
        if self.rest.len() < len {
            return None;
        }

        let (head, tail) = self.rest.split_at(len);
        let mut value = 0u16;

        for &b in head {
            if !b.is_ascii_digit() {
                return None;
            }

            value = value * 10 + u16::from(b - b'0');
        }

        self.rest = tail;

        Some(value)
    }

    /// A field may be omitted entirely, in which case `default` applies.
    fn digits_or(&mut self, len: usize, default: u16) -> Option<u16> {
        if self.rest.is_empty() || !self.rest[0].is_ascii_digit() {
            return Some(default);
        }

        self.digits(len)
    }

    fn skip_zone_digits(&mut self) {
        while let Some(&b) = self.rest.first() {
            if b.is_ascii_digit() || b == b'\'' {
                self.rest = &self.rest[1..];
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{format, parse};

    #[test]
    fn utc_date() {
        assert_eq!(parse(b"D:20240101120000Z"), Some(1_704_110_400));
    }

    #[test]
    fn zone_offsets() {
        // taken from a LibreOffice pdf
        let utc = parse(b"D:20201203184827Z").unwrap();
        assert_eq!(parse(b"D:20201203184827-08'00'"), Some(utc + 8 * 3600));
        assert_eq!(parse(b"D:20201203184827+01'30'"), Some(utc - 90 * 60));
    }

    #[test]
    fn short_forms_default_missing_fields() {
        assert_eq!(parse(b"D:2024"), parse(b"D:20240101000000Z"));
        assert_eq!(parse(b"D:202406"), parse(b"D:20240601000000Z"));
    }

    #[test]
    fn rejects_non_dates() {
        assert_eq!(parse(b"Hello"), None);
        assert_eq!(parse(b"D:notadate"), None);
        assert_eq!(parse(b"D:20241301000000Z"), None);
        assert_eq!(parse(b"D:20240101120000Zjunk"), None);
    }

    #[test]
    fn round_trip() {
        let epoch = parse(b"D:19991231235959Z").unwrap();
        assert_eq!(format(epoch), "D:19991231235959Z");
        assert_eq!(parse(format(epoch).as_bytes()), Some(epoch));
    }
}
