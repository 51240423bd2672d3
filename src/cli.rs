/// cli.rs - 命令行接口定义模块
/// 职责：使用 clap 库定义模拟器的命令行参数和子命令
/// 说明：命令行参数覆盖配置文件中的同名设置

use std::path::PathBuf; // 路径对象

use clap::{Parser, Subcommand}; // clap 宏库
use clap_complete::Shell; // Shell 补全支持

use crate::utils::version; // 版本信息工具

/// 主命令行结构
/// 使用 clap 的派生宏自动生成解析器
#[derive(Debug, Parser)]
#[command(
    author,
    version = version(),
    about,
    long_about = None
)]
#[command(args_conflicts_with_subcommands = true)] // 参数与子命令互斥
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// Path to a JSON frame clock config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Refresh rate of the simulated output, in Hz.
    #[arg(long, default_value_t = 60.)]
    pub refresh_rate: f64,

    /// Vblank duration of the simulated output, in microseconds.
    #[arg(long, default_value_t = 500)]
    pub vblank_us: u64,

    /// Stop after this many frames have been presented.
    #[arg(short = 'n', long, default_value_t = 120)]
    pub frames: u64,

    /// Never keep more than one frame in flight.
    #[arg(long)]
    pub disable_triple_buffering: bool,

    /// Run the clock in variable refresh rate mode.
    #[arg(long)]
    pub vrr: bool,

    /// Probability that a dispatch produces no frame.
    #[arg(long, default_value_t = 0., value_parser = parse_probability)]
    pub idle_chance: f64,

    /// CPU time from dispatch to swap, in microseconds.
    #[arg(long, default_value_t = 3000)]
    pub render_cost_us: u64,

    /// GPU time after the swap, in microseconds.
    #[arg(long, default_value_t = 2000)]
    pub gpu_cost_us: u64,

    /// Maximum random extra CPU time per frame, in microseconds.
    #[arg(long, default_value_t = 0)]
    pub jitter_us: u64,

    /// Number of animation timelines driving the output.
    #[arg(long, default_value_t = 1)]
    pub timelines: usize,

    /// Report every flip as a direct scanout attempt.
    #[arg(long)]
    pub direct_scanout: bool,

    /// Inhibit the clock for a short while once this many frames have been presented.
    #[arg(long)]
    pub pause_at: Option<u64>,

    /// Seed for the simulated jitter and idle frames.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the summary as JSON.
    #[arg(short, long)]
    pub json: bool,

    /// 子命令集合
    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

/// 子命令枚举
#[derive(Debug, Subcommand)]
pub enum Sub {
    /// 生成 shell 自动补全脚本
    Completions { shell: Shell },
}

// 解析 0.0 到 1.0 之间的概率
fn parse_probability(value: &str) -> Result<f64, String> {
    let chance: f64 = value.parse().map_err(|err| format!("{err}"))?;
    if (0. ..=1.).contains(&chance) {
        Ok(chance)
    } else {
        Err(format!("{chance} is not between 0 and 1"))
    }
}
