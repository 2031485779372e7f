use crate::ldcommon::config::ApiConfig;
use crate::ldcommon::models::{Candle, CandleInterval, LastTradeRecord, TradingDay};
use crate::ldcommon::{AppError, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 上游返回的定点数价格（protobuf Quotation 的 JSON 映射）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Quotation {
    /// 整数部分，int64 在 JSON 里映射为字符串
    #[serde(default)]
    pub units: String,
    /// 纳诺部分
    #[serde(default)]
    pub nano: i64,
}

impl Quotation {
    pub fn to_f64(&self) -> f64 {
        let units: f64 = self.units.parse().unwrap_or(0.0);
        units + self.nano as f64 / 1_000_000_000.0
    }
}

/// 上游历史K线
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricCandle {
    #[serde(default)]
    open: Quotation,
    #[serde(default)]
    high: Quotation,
    #[serde(default)]
    low: Quotation,
    #[serde(default)]
    close: Quotation,
    #[serde(default)]
    volume: String,
    #[serde(default)]
    time: String,
    #[serde(default)]
    is_complete: bool,
}

#[derive(Debug, Deserialize)]
struct GetCandlesResponse {
    #[serde(default)]
    candles: Vec<HistoricCandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTradingDay {
    #[serde(default)]
    date: String,
    #[serde(default)]
    is_trading_day: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExchangeSchedule {
    #[serde(default)]
    exchange: String,
    #[serde(default)]
    days: Vec<WireTradingDay>,
}

#[derive(Debug, Deserialize)]
struct TradingSchedulesResponse {
    #[serde(default)]
    exchanges: Vec<WireExchangeSchedule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrade {
    #[serde(default)]
    direction: String,
    #[serde(default)]
    price: Quotation,
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    time: String,
}

#[derive(Debug, Deserialize)]
struct GetLastTradesResponse {
    #[serde(default)]
    trades: Vec<WireTrade>,
}

/// T-Invest REST API 客户端
///
/// 所有方法都是单纯的远程调用，不经过并发闸门，闸门由编排器持有
#[derive(Clone, Debug)]
pub struct InvestApi {
    base_url: String,
    token: String,
    timeout: Duration,
    /// 交易日按此时区切分为 [当日零点, 次日零点)
    tz: Tz,
}

impl InvestApi {
    /// 从配置创建客户端实例，令牌从环境变量读取
    pub fn from_config(config: &ApiConfig, timezone: &str) -> Result<Self> {
        let token = std::env::var(&config.token_env).unwrap_or_default();
        if token.is_empty() {
            warn!(target: "api", "环境变量 {} 未设置，上游调用将被拒绝", config.token_env);
        }
        let tz = Tz::from_str(timezone)
            .map_err(|e| AppError::ConfigError(format!("无效时区 {}: {}", timezone, e)))?;
        info!(target: "api", "🌐 初始化 T-Invest API 客户端，端点: {}", config.base_url);
        Ok(Self {
            base_url: config.base_url.clone(),
            token,
            timeout: Duration::from_secs(config.request_timeout_secs),
            tz,
        })
    }

    /// 创建新的客户端实例（测试与工具使用）
    pub fn new_with_url(base_url: String, token: String, tz: Tz) -> Self {
        Self {
            base_url,
            token,
            timeout: Duration::from_secs(30),
            tz,
        }
    }

    /// 创建一个新的HTTP客户端实例
    fn create_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))
    }

    /// 发送一次服务调用并返回响应文本
    async fn post_service(&self, service_path: &str, body: serde_json::Value) -> Result<String> {
        let url = format!("{}/{}", self.base_url, service_path);
        let client = self.create_client()?;

        debug!(target: "api", "发送上游请求: {}", url);

        let response = match client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                error!(target: "api", "上游请求失败: URL={}, 错误: {}", url, e);
                return Err(AppError::from(e));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_else(|e| format!("无法读取响应内容: {}", e));
            error!(target: "api", "上游响应状态错误: {} - {} - {}", url, status, text);
            return Err(AppError::ApiError(format!(
                "上游调用 {} 失败: {} - {}",
                service_path, status, text
            )));
        }

        Ok(response.text().await?)
    }

    /// 一个交易日在配置时区下的绝对时间窗口 [当日零点, 次日零点)
    fn day_window(&self, date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = local_midnight_utc(date, self.tz)?;
        let next = date
            .succ_opt()
            .ok_or_else(|| AppError::ValidationError(format!("日期越界: {}", date)))?;
        let end = local_midnight_utc(next, self.tz)?;
        Ok((start, end))
    }

    /// 获取一个品种一个交易日的K线
    ///
    /// 上游返回空列表不算错误，由调用方按"无数据"处理
    pub async fn get_candles(
        &self,
        figi: &str,
        date: NaiveDate,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        let (from, to) = self.day_window(date)?;

        let body = serde_json::json!({
            "instrumentId": figi,
            "from": from.to_rfc3339(),
            "to": to.to_rfc3339(),
            "interval": interval.api_name(),
        });

        let text = self
            .post_service("tinkoff.public.invest.api.contract.v1.MarketDataService/GetCandles", body)
            .await?;

        let response: GetCandlesResponse = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                error!(target: "api", "{}: 解析K线JSON失败: {}, 响应前1000个字符: {}",
                    figi, e, &text[..text.len().min(1000)]);
                return Err(AppError::JsonError(e));
            }
        };

        let mut candles = Vec::with_capacity(response.candles.len());
        for raw in &response.candles {
            match parse_candle(figi, raw, interval) {
                Some(candle) => candles.push(candle),
                None => {
                    warn!(target: "api", "{}: 丢弃无法解析的K线: time={}", figi, raw.time);
                }
            }
        }

        debug!(target: "api", "{}: 获取到 {} 条K线", figi, candles.len());
        Ok(candles)
    }

    /// 获取交易所日历
    pub async fn get_trading_schedule(
        &self,
        exchange: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TradingDay>> {
        let from_utc = local_midnight_utc(from, self.tz)?;
        let to_utc = local_midnight_utc(to, self.tz)?;

        let body = serde_json::json!({
            "exchange": exchange,
            "from": from_utc.to_rfc3339(),
            "to": to_utc.to_rfc3339(),
        });

        let text = self
            .post_service(
                "tinkoff.public.invest.api.contract.v1.InstrumentsService/TradingSchedules",
                body,
            )
            .await?;

        let response: TradingSchedulesResponse = serde_json::from_str(&text)?;

        let mut days = Vec::new();
        for schedule in response.exchanges {
            for day in schedule.days {
                let Ok(parsed) = DateTime::parse_from_rfc3339(&day.date) else {
                    continue;
                };
                days.push(TradingDay {
                    date: parsed.with_timezone(&self.tz).date_naive(),
                    is_trading_day: day.is_trading_day,
                    exchange: schedule.exchange.clone(),
                });
            }
        }
        Ok(days)
    }

    /// 获取一个品种的逐笔成交
    pub async fn get_last_trades(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LastTradeRecord>> {
        let body = serde_json::json!({
            "instrumentId": figi,
            "from": from.to_rfc3339(),
            "to": to.to_rfc3339(),
        });

        let text = self
            .post_service("tinkoff.public.invest.api.contract.v1.MarketDataService/GetLastTrades", body)
            .await?;

        let response: GetLastTradesResponse = serde_json::from_str(&text)?;

        let mut trades = Vec::with_capacity(response.trades.len());
        for raw in &response.trades {
            let Ok(time) = DateTime::parse_from_rfc3339(&raw.time) else {
                warn!(target: "api", "{}: 丢弃时间无法解析的成交: {}", figi, raw.time);
                continue;
            };
            trades.push(LastTradeRecord {
                figi: figi.to_string(),
                trade_time_ms: time.with_timezone(&Utc).timestamp_millis(),
                direction: raw
                    .direction
                    .strip_prefix("TRADE_DIRECTION_")
                    .unwrap_or(&raw.direction)
                    .to_string(),
                price: raw.price.to_f64(),
                quantity: raw.quantity.parse().unwrap_or(0),
            });
        }
        Ok(trades)
    }
}

/// 某天在给定时区的零点对应的 UTC 时刻
///
/// 夏令时跳变导致零点不存在时取之后最早的有效时刻
pub fn local_midnight_utc(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::ValidationError(format!("无效日期: {}", date)))?;
    let local = tz
        .from_local_datetime(&midnight)
        .earliest()
        .ok_or_else(|| AppError::ValidationError(format!("时区 {} 下 {} 零点不存在", tz, date)))?;
    Ok(local.with_timezone(&Utc))
}

fn parse_candle(figi: &str, raw: &HistoricCandle, interval: CandleInterval) -> Option<Candle> {
    let time = DateTime::parse_from_rfc3339(&raw.time).ok()?;
    Some(Candle {
        figi: figi.to_string(),
        time_ms: time.with_timezone(&Utc).timestamp_millis(),
        open: raw.open.to_f64(),
        high: raw.high.to_f64(),
        low: raw.low.to_f64(),
        close: raw.close.to_f64(),
        volume: raw.volume.parse().unwrap_or(0),
        is_complete: raw.is_complete,
        interval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotation_to_f64() {
        let q = Quotation {
            units: "105".to_string(),
            nano: 250_000_000,
        };
        assert!((q.to_f64() - 105.25).abs() < 1e-9);
    }

    #[test]
    fn test_local_midnight_utc_moscow() {
        // 莫斯科无夏令时，UTC+3：当地零点 = 前一日 21:00 UTC
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let utc = local_midnight_utc(date, chrono_tz::Europe::Moscow).unwrap();
        assert_eq!(utc.to_rfc3339(), "2024-05-09T21:00:00+00:00");
    }

    #[test]
    fn test_parse_candle_response() {
        let text = r#"{
            "candles": [
                {
                    "open": {"units": "100", "nano": 0},
                    "high": {"units": "101", "nano": 500000000},
                    "low": {"units": "99", "nano": 0},
                    "close": {"units": "100", "nano": 750000000},
                    "volume": "1250",
                    "time": "2024-05-10T06:00:00Z",
                    "isComplete": true
                }
            ]
        }"#;
        let response: GetCandlesResponse = serde_json::from_str(text).unwrap();
        assert_eq!(response.candles.len(), 1);
        let candle = parse_candle("BBG004730N88", &response.candles[0], CandleInterval::Minute).unwrap();
        assert!((candle.close - 100.75).abs() < 1e-9);
        assert_eq!(candle.volume, 1250);
        assert!(candle.is_complete);
    }
}
