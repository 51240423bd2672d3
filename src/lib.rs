/// lib.rs - frame-pacer 的主库文件，作为整个项目的根模块
/// 该文件定义了库的公共接口和模块结构

/// 启用 tracing 宏的全局引入，用于日志和性能追踪
#[macro_use]
extern crate tracing;

/// 声明公共模块 backend - 模拟显示后端
/// 提供无头输出，在事件循环上模拟 vblank 和呈现反馈
pub mod backend;

/// 声明公共模块 cli - 命令行参数解析
pub mod cli;

/// 声明公共模块 clock - 可冻结的单调时间源
pub mod clock;

/// 声明公共模块 config - 帧时钟配置与环境变量开关
pub mod config;

/// 声明公共模块 frame_clock - 帧节奏调度器
/// 核心：决定何时开始生成下一帧以赶上预测的 vblank
pub mod frame_clock;

/// 声明公共模块 utils - 工具函数集
pub mod utils;

/// 条件编译：测试专用模块
/// 仅在运行 cargo test 时包含
#[cfg(test)]
mod tests;
