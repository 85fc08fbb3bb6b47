use crate::domain::model::{MonthRange, TimeRange};
use chrono::{Datelike, Months, NaiveDate, NaiveTime, TimeZone, Utc};

/// 將 `[window_start, window_end_exclusive)` 切成日曆月份。
///
/// 每個區間從該月第一天 `tz` 的午夜開始，到下一個區間開始為止，因此前後相連。
/// 視窗結尾不在月份邊界時，最後一個區間會被截短；空的或反向的視窗不產生任何區間。
pub fn generate_month_ranges<Tz: TimeZone>(
    window_start: NaiveDate,
    window_end_exclusive: NaiveDate,
    tz: &Tz,
) -> Vec<MonthRange> {
    let mut months = Vec::new();
    let mut cursor = window_start;

    while cursor < window_end_exclusive {
        let next = first_of_next_month(cursor)
            .map(|d| d.min(window_end_exclusive))
            .unwrap_or(window_end_exclusive);

        months.push(MonthRange {
            label: month_label(cursor),
            range: TimeRange::new(midnight_millis(cursor, tz), midnight_millis(next, tz)),
        });
        cursor = next;
    }

    months
}

pub fn month_label(date: NaiveDate) -> String {
    date.format("%b %Y").to_string()
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    first_of_month(date).checked_add_months(Months::new(1))
}

pub fn months_before(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_sub_months(Months::new(months))
}

/// 解析 `YYYY-MM`，回傳該月第一天。
pub fn parse_month(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d").ok()
}

/// `date` 在 `tz` 午夜的 epoch 毫秒。
///
/// 午夜落在日光節約時間空隙時取最早的有效時刻，最後才退回 UTC。
fn midnight_millis<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> i64 {
    let local = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| Utc.from_utc_datetime(&local).timestamp_millis())
}
