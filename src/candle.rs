/// One OHLCV observation. `(market, time)` is the natural unique key;
/// `time` is a minute-aligned Unix timestamp in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub market: String,
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
