//! 服务状态快照
//!
//! 心跳消息和状态接口共用同一个快照结构，每次发送前按当前时间重新计算。

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// 服务运行状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(rename = "service")]
    pub service_name: String,
    pub version: String,
    pub runtime: String,
    /// 构建时间，无法解析时为 null
    #[serde(rename = "buildTime")]
    pub build_time: Option<DateTime<Utc>>,
    #[serde(rename = "start")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "time")]
    pub system_time: DateTime<Utc>,
    pub uptime: String,
}

impl ServiceStatus {
    /// 创建状态快照，启动时间截断到秒
    pub fn new(
        service_name: impl Into<String>,
        version: impl Into<String>,
        build_time: Option<DateTime<Utc>>,
        start_time: DateTime<Utc>,
    ) -> Self {
        let start_time = truncate_to_second(start_time);
        Self {
            service_name: service_name.into(),
            version: version.into(),
            runtime: runtime_descriptor(),
            build_time,
            start_time,
            system_time: start_time,
            uptime: format_uptime(TimeDelta::zero()),
        }
    }

    /// 解析 RFC 3339 格式的构建时间，空串或格式错误返回 None
    pub fn parse_build_time(value: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// 以给定时间为准返回新的快照
    pub fn populated(&self, now: DateTime<Utc>) -> Self {
        let mut status = self.clone();
        status.populate(now);
        status
    }

    pub fn populate(&mut self, now: DateTime<Utc>) {
        self.system_time = now;
        self.uptime = format_uptime(now - self.start_time);
    }
}

/// 运行时描述，例如 `rust linux x86_64`
pub fn runtime_descriptor() -> String {
    format!(
        "rust {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// 截断到整秒
pub fn truncate_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(TimeDelta::seconds(1)).unwrap_or(time)
}

/// 把时长格式化为 `2h0m5s`、`1m30s`、`45s` 这样的字符串，不足一秒的部分舍去。
pub fn format_uptime(uptime: TimeDelta) -> String {
    let total = uptime.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.unsigned_abs();

    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{sign}{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{sign}{minutes}m{seconds}s")
    } else {
        format!("{sign}{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(TimeDelta::zero()), "0s");
        assert_eq!(format_uptime(TimeDelta::seconds(45)), "45s");
        assert_eq!(format_uptime(TimeDelta::seconds(90)), "1m30s");
        assert_eq!(format_uptime(TimeDelta::seconds(7205)), "2h0m5s");
        assert_eq!(format_uptime(TimeDelta::hours(26) + TimeDelta::minutes(3)), "26h3m0s");
        assert_eq!(format_uptime(TimeDelta::milliseconds(1500)), "1s");
        assert_eq!(format_uptime(TimeDelta::seconds(-5)), "-5s");
    }

    #[test]
    fn test_populate_computes_uptime() {
        let status = ServiceStatus::new("push", "1.0.0", None, at(10, 0, 0));
        let snapshot = status.populated(at(11, 1, 1));

        assert_eq!(snapshot.system_time, at(11, 1, 1));
        assert_eq!(snapshot.uptime, "1h1m1s");
        // 原始快照不受影响
        assert_eq!(status.uptime, "0s");
    }

    #[test]
    fn test_start_time_truncated() {
        let start = at(10, 0, 0) + TimeDelta::milliseconds(750);
        let status = ServiceStatus::new("push", "1.0.0", None, start);
        assert_eq!(status.start_time, at(10, 0, 0));
    }

    #[test]
    fn test_json_field_names() {
        let status = ServiceStatus::new(
            "push",
            "1.0.0",
            ServiceStatus::parse_build_time("2024-02-29T12:00:00Z"),
            at(10, 0, 0),
        )
        .populated(at(10, 0, 30));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["service"], "push");
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["buildTime"], "2024-02-29T12:00:00Z");
        assert_eq!(json["start"], "2024-03-01T10:00:00Z");
        assert_eq!(json["time"], "2024-03-01T10:00:30Z");
        assert_eq!(json["uptime"], "30s");
        assert!(json["runtime"].as_str().unwrap().starts_with("rust "));
    }

    #[test]
    fn test_parse_build_time_invalid() {
        assert_eq!(ServiceStatus::parse_build_time(""), None);
        assert_eq!(ServiceStatus::parse_build_time("yesterday"), None);
    }
}
