//! `time` crate conversions (`time` feature, §10.5) for the host newtypes.
use time::{Date as TimeDate, OffsetDateTime, PrimitiveDateTime, Time as TimeTime};

use super::{Date, Time, Timestamp};

const PG_EPOCH_UNIX: i64 = 946_684_800; // 2000-01-01T00:00:00Z, seconds since unix epoch

fn pg_epoch_date() -> TimeDate {
    TimeDate::from_calendar_date(2000, time::Month::January, 1).expect("valid calendar date")
}

impl From<TimeDate> for Date {
    fn from(date: TimeDate) -> Self {
        Date((date.to_julian_day() - pg_epoch_date().to_julian_day()) as i32)
    }
}

impl From<Date> for TimeDate {
    fn from(date: Date) -> Self {
        pg_epoch_date() + time::Duration::days(date.0 as i64)
    }
}

impl From<TimeTime> for Time {
    fn from(time: TimeTime) -> Self {
        let micros = time.hour() as i64 * 3_600_000_000
            + time.minute() as i64 * 60_000_000
            + time.second() as i64 * 1_000_000
            + time.microsecond() as i64;
        Time(micros)
    }
}

impl From<Time> for TimeTime {
    fn from(time: Time) -> Self {
        let mut micros = time.0;
        let hour = (micros / 3_600_000_000) as u8;
        micros %= 3_600_000_000;
        let minute = (micros / 60_000_000) as u8;
        micros %= 60_000_000;
        let second = (micros / 1_000_000) as u8;
        let microsecond = (micros % 1_000_000) as u32;
        TimeTime::from_hms_micro(hour, minute, second, microsecond).expect("valid time of day")
    }
}

impl From<PrimitiveDateTime> for Timestamp {
    fn from(ts: PrimitiveDateTime) -> Self {
        let unix = ts.assume_utc().unix_timestamp();
        let micros_of_second = ts.microsecond() as i64;
        Timestamp((unix - PG_EPOCH_UNIX) * 1_000_000 + micros_of_second)
    }
}

impl From<Timestamp> for PrimitiveDateTime {
    fn from(ts: Timestamp) -> Self {
        let total_micros = ts.0 + PG_EPOCH_UNIX * 1_000_000;
        let unix_secs = total_micros.div_euclid(1_000_000);
        let micros = total_micros.rem_euclid(1_000_000);
        let odt = OffsetDateTime::from_unix_timestamp(unix_secs).expect("valid unix timestamp");
        let odt = odt + time::Duration::microseconds(micros);
        PrimitiveDateTime::new(odt.date(), odt.time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_round_trips_through_the_postgres_epoch() {
        let d = pg_epoch_date();
        assert_eq!(Date::from(d).0, 0);
        assert_eq!(TimeDate::from(Date(0)), d);

        let later = TimeDate::from_calendar_date(2024, time::Month::March, 15).unwrap();
        let pg: Date = later.into();
        assert_eq!(TimeDate::from(pg), later);
    }

    #[test]
    fn time_of_day_round_trips_to_microsecond_precision() {
        let t = TimeTime::from_hms_micro(13, 45, 7, 123_456).unwrap();
        let pg: Time = t.into();
        assert_eq!(TimeTime::from(pg), t);
    }

    #[test]
    fn timestamp_round_trips_through_the_postgres_epoch() {
        let epoch = PrimitiveDateTime::new(pg_epoch_date(), TimeTime::MIDNIGHT);
        let pg: Timestamp = epoch.into();
        assert_eq!(pg.0, 0);
        assert_eq!(PrimitiveDateTime::from(pg), epoch);

        let dt = PrimitiveDateTime::new(
            TimeDate::from_calendar_date(2024, time::Month::March, 15).unwrap(),
            TimeTime::from_hms_micro(8, 30, 0, 500_000).unwrap(),
        );
        let pg: Timestamp = dt.into();
        assert_eq!(PrimitiveDateTime::from(pg), dt);
    }
}
