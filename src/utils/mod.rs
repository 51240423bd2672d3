//! 实用工具模块，包含帧时钟各处共享的辅助函数。
//!
//! - 单调时钟读取（不受系统时间调整影响）
//! - `Duration` 与有符号微秒之间的转换（截止时间运算使用 i64 微秒）
//! - 版本字符串

use std::time::Duration;

use git_version::git_version; // Git版本信息获取
use rustix::time::{clock_gettime, ClockId}; // 系统时间获取

// 子模块声明
pub mod id; // ID管理

/// 获取当前frame-pacer版本信息字符串
pub fn version() -> String {
    // 优先使用构建时注入的版本字符串
    if let Some(v) = option_env!("FRAME_PACER_BUILD_VERSION_STRING") {
        return String::from(v);
    }

    const MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
    const MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
    const PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");

    let commit = option_env!("FRAME_PACER_BUILD_COMMIT")
        .unwrap_or(git_version!(fallback = "unknown commit"));

    if PATCH == "0" {
        format!("{MAJOR}.{MINOR:0>2} ({commit})")
    } else {
        format!("{MAJOR}.{MINOR:0>2}.{PATCH} ({commit})")
    }
}

/// 获取单调递增时钟时间（不受系统时间调整影响）
pub fn get_monotonic_time() -> Duration {
    let ts = clock_gettime(ClockId::Monotonic);
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Converts a monotonic timestamp or duration to signed microseconds.
///
/// Saturates at `i64::MAX`, which is hundreds of thousands of years of uptime.
pub fn to_us(time: Duration) -> i64 {
    i64::try_from(time.as_micros()).unwrap_or(i64::MAX)
}

/// Converts signed microseconds back to a `Duration`, clamping negative values to zero.
pub fn from_us(us: i64) -> Duration {
    Duration::from_micros(u64::try_from(us).unwrap_or(0))
}

/// Returns the refresh interval in microseconds for the given refresh rate in Hz.
pub fn refresh_interval_us(refresh_rate: f64) -> i64 {
    (1_000_000. / refresh_rate).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_interval_rounding() {
        assert_eq!(refresh_interval_us(60.), 16_667);
        assert_eq!(refresh_interval_us(59.94), 16_683);
        assert_eq!(refresh_interval_us(144.), 6_944);
        assert_eq!(refresh_interval_us(240.), 4_167);
    }

    #[test]
    fn microsecond_conversions() {
        assert_eq!(to_us(Duration::from_millis(16)), 16_000);
        assert_eq!(to_us(Duration::from_nanos(1_999)), 1);
        assert_eq!(from_us(16_667), Duration::from_micros(16_667));
        // 负值钳制为零
        assert_eq!(from_us(-5), Duration::ZERO);
    }

    #[test]
    fn monotonic_time_advances() {
        let a = get_monotonic_time();
        let b = get_monotonic_time();
        assert!(b >= a);
        assert!(!a.is_zero());
    }
}
