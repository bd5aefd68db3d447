//! 日志初始化
//!
//! 引擎本身只使用 tracing 宏输出结构化日志；订阅器由宿主进程决定。
//! 这里提供一个默认初始化函数，供测试和独立运行使用。

use tracing_subscriber::{fmt, EnvFilter};

/// 初始化 tracing 订阅器
///
/// 过滤规则取自 `RUST_LOG` 环境变量，默认 `info`。
/// 重复调用是安全的（第二次起为 no-op）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init: 宿主可能已经装好了自己的订阅器
    let _ = fmt().with_env_filter(filter).try_init();
}
