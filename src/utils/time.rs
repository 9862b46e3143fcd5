use chrono::{DateTime, NaiveDate, Utc};

const KEY_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp key used for generated sets and saved history, e.g. `2026_10_18_09_30_00`.
pub fn date_key(dt: DateTime<Utc>) -> String {
    dt.format(KEY_FORMAT).to_string()
}

/// `2026_10_18_09_30_00` → `18 October 2026`.
pub fn display_date_from_key(key: &str) -> anyhow::Result<String> {
    let date_part = key.split('_').take(3).collect::<Vec<_>>().join("_");
    let date = NaiveDate::parse_from_str(&date_part, "%Y_%m_%d")?;
    Ok(date.format("%d %B %Y").to_string())
}
