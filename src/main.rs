#[macro_use]
// 启用tracing宏，允许在代码中使用如info!、warn!等日志宏
extern crate tracing;

use std::cell::RefCell;
// 环境变量
use std::env;
// 输入输出操作相关模块
use std::io;
use std::rc::Rc;
use std::time::Duration;

// 命令行参数解析库
use clap::{CommandFactory, Parser};
// 事件循环与定时器
use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
// 引入命令行接口定义
use frame_pacer::cli::{Cli, Sub};
// 帧时钟配置
use frame_pacer::config::FrameClockConfig;
// 模拟显示后端
use frame_pacer::backend::{Headless, HeadlessParams, PresentationStats};
// 帧时钟及其接口
use frame_pacer::frame_clock::{CalloopWakeup, ClockRoute, FrameClock, Timeline};
// 工具函数（版本信息、时间转换）
use frame_pacer::utils::{to_us, version};
use serde::Serialize;
// 日志过滤
use tracing_subscriber::EnvFilter;

// 默认日志过滤规则
const DEFAULT_LOG_FILTER: &str = "frame_pacer=debug";

// 暂停（inhibit）持续时间
const PAUSE_DURATION: Duration = Duration::from_millis(100);

// 事件循环共享状态
struct State {
    // 输出的帧时钟，退出前取出并销毁
    clock: Option<FrameClock>,
    stats: Rc<RefCell<PresentationStats>>,
    // 没有时间线时每轮循环都请求新帧
    continuous: bool,
    frames: u64,
    pause_at: Option<u64>,
    paused: bool,
}

// 从事件循环状态中找到帧时钟
fn route_clock(state: &mut State) -> Option<&mut FrameClock> {
    state.clock.as_mut()
}

/// Demo animation: records the step between consecutive frame times.
#[derive(Debug, Default)]
struct Animation {
    last_frame_time: Option<Duration>,
    steps: u64,
    longest_step: Duration,
}

impl Timeline for Animation {
    fn advance(&mut self, frame_time: Duration) {
        if let Some(last) = self.last_frame_time {
            let step = frame_time.saturating_sub(last);
            self.longest_step = self.longest_step.max(step);
        }
        self.last_frame_time = Some(frame_time);
        self.steps += 1;
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Summary {
    version: String,
    refresh_rate: f64,
    triple_buffering: bool,
    vrr: bool,
    dispatched: u64,
    #[serde(flatten)]
    stats: PresentationStats,
    max_render_time_us: i64,
    longest_timeline_step_us: Option<i64>,
    invariant_violations: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 配置日志过滤器
    // 从环境变量RUST_LOG获取，否则使用默认值
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    // 初始化日志系统：紧凑格式、输出到stderr、应用过滤器
    tracing_subscriber::fmt()
        .compact()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .init();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(subcommand) = cli.subcommand {
        match subcommand {
            // 生成自动补全脚本
            Sub::Completions { shell } => {
                clap_complete::generate(
                    shell,
                    &mut Cli::command(),
                    "frame-pacer",
                    &mut io::stdout(),
                );
                return Ok(());
            }
        }
    }

    // 启动性能分析器（Tracy）
    tracy_client::Client::start();

    // 打印启动日志（含版本号）
    info!("starting version {}", &version());

    // 加载配置：出错时回退到默认值，再叠加环境变量和命令行参数
    let mut config = match &cli.config {
        Some(path) => FrameClockConfig::load(path).unwrap_or_else(|err| {
            warn!("{err:?}");
            warn!("using the default config");
            FrameClockConfig::default()
        }),
        None => FrameClockConfig::default(),
    }
    .with_env();
    if cli.disable_triple_buffering {
        config.disable_triple_buffering = true;
    }
    if cli.vrr {
        config.vrr = true;
    }

    // 创建事件循环
    let mut event_loop = EventLoop::<State>::try_new()?;
    let handle = event_loop.handle();
    let signal = event_loop.get_signal();

    let route: ClockRoute<State> = Rc::new(route_clock);

    let params = HeadlessParams {
        refresh_rate: cli.refresh_rate,
        render_cost: Duration::from_micros(cli.render_cost_us),
        gpu_cost: Duration::from_micros(cli.gpu_cost_us),
        jitter: Duration::from_micros(cli.jitter_us),
        idle_chance: cli.idle_chance,
        direct_scanout: cli.direct_scanout,
    };
    let mut headless = Headless::new(handle.clone(), route.clone(), params);
    if let Some(seed) = cli.seed {
        headless = headless.with_seed(seed);
    }
    let stats = headless.stats();
    let output = headless.output();

    let wakeup = CalloopWakeup::new(handle.clone(), route);
    let mut clock = FrameClock::new(
        cli.refresh_rate,
        Duration::from_micros(cli.vblank_us),
        Box::new(headless),
        Box::new(wakeup),
        config,
    )?;
    clock.connect_destroy(move || debug!(output = output.get(), "output frame clock destroyed"));

    // 注册动画时间线，第一个时间线会请求第一帧
    let animations: Vec<_> = (0..cli.timelines)
        .map(|_| Rc::new(RefCell::new(Animation::default())))
        .collect();
    for animation in &animations {
        clock.add_timeline(animation.clone());
    }
    clock.schedule_update();

    let mut state = State {
        clock: Some(clock),
        stats: stats.clone(),
        continuous: animations.is_empty(),
        frames: cli.frames,
        pause_at: cli.pause_at,
        paused: false,
    };

    // 运行事件循环直到呈现足够多的帧
    event_loop.run(None, &mut state, |state| {
        let _span = tracy_client::span!("loop callback");

        let presented = state.stats.borrow().presented;
        if presented >= state.frames {
            signal.stop();
            return;
        }

        let Some(clock) = state.clock.as_mut() else {
            signal.stop();
            return;
        };

        if !state.paused && state.pause_at.is_some_and(|at| presented >= at) {
            state.paused = true;
            info!("pausing output for {PAUSE_DURATION:?}");
            clock.inhibit();

            let res = handle.insert_source(Timer::from_duration(PAUSE_DURATION), |_, _, state| {
                if let Some(clock) = state.clock.as_mut() {
                    info!("resuming output");
                    let _ = clock.uninhibit();
                }
                TimeoutAction::Drop
            });
            if let Err(err) = res {
                warn!("error scheduling resume: {:?}", err.error);
                let _ = clock.uninhibit();
            }
        }

        if state.continuous {
            clock.schedule_update();
        }
    })?;

    let Some(clock) = state.clock.take() else {
        return Ok(());
    };

    let longest_step = animations
        .iter()
        .map(|animation| animation.borrow().longest_step)
        .max();
    let summary = Summary {
        version: version(),
        refresh_rate: clock.refresh_rate(),
        triple_buffering: !clock.config().disable_triple_buffering,
        vrr: clock.vrr(),
        dispatched: clock.frame_count(),
        stats: stats.borrow().clone(),
        max_render_time_us: to_us(clock.max_render_time()),
        longest_timeline_step_us: longest_step.map(to_us),
        invariant_violations: clock.invariant_violations(),
    };
    debug!("{}", clock.max_render_time_debug_info());
    clock.destroy();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &Summary) {
    let stats = &summary.stats;
    println!("frame-pacer {}", summary.version);
    println!(
        "output: {:.3} Hz, triple buffering {}, VRR {}",
        summary.refresh_rate,
        if summary.triple_buffering { "on" } else { "off" },
        if summary.vrr { "on" } else { "off" },
    );
    println!(
        "frames: {} dispatched, {} presented, {} idle",
        summary.dispatched, stats.presented, stats.idle
    );
    println!(
        "presentation: {} on target, {} late, {} unpredicted, worst offset {} µs",
        stats.on_target, stats.late, stats.unpredicted, stats.max_lateness_us
    );
    println!("max render time: {} µs", summary.max_render_time_us);
    if let Some(step) = summary.longest_timeline_step_us {
        println!("longest timeline step: {step} µs");
    }
    if summary.invariant_violations > 0 {
        println!("invariant violations: {}", summary.invariant_violations);
    }
}
