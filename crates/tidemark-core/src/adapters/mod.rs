mod alphavantage;
mod tiingo;
mod yahoo;

pub use alphavantage::AlphaVantageAdapter;
pub use tiingo::TiingoAdapter;
pub use yahoo::YahooAdapter;

use time::Duration;

use crate::{NaturalKey, SourceRecord, UtcDateTime, Watermark};

/// Default ticker universe shared by the deterministic adapters.
pub(crate) const DEFAULT_CATALOG: &[&str] = &["AAPL", "MSFT", "NVDA", "TSLA", "SPY"];

/// Latest simulated session close (21:00 UTC) at or before `at`.
pub(crate) fn session_close_on_or_before(at: UtcDateTime) -> UtcDateTime {
    let inner = at.into_inner();
    let close = inner
        .date()
        .with_hms(21, 0, 0)
        .expect("21:00:00 is a valid time")
        .assume_utc();
    let close = if close > inner {
        close - Duration::days(1)
    } else {
        close
    };
    UtcDateTime::from_offset_datetime(close).expect("session close is constructed in UTC")
}

pub(crate) fn ticker_seed(ticker: &str) -> u64 {
    ticker.bytes().fold(7_u64, |acc, byte| {
        acc.wrapping_mul(37).wrapping_add(byte as u64)
    })
}

/// Keep a record only when it is strictly newer than the caller's watermark.
pub(crate) fn passes_watermark(record: &SourceRecord, since: Option<Watermark>) -> bool {
    since.is_none_or(|since| record.watermark() > since)
}

pub(crate) fn natural_key_for(ticker: &str, trade_date: &str) -> NaturalKey {
    NaturalKey::parse(format!("{ticker}:{trade_date}").as_str()).expect("catalog keys are valid")
}
