use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::time, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化运行时的日志/追踪（tracing）订阅者。
///
/// - 默认会读取环境变量（由 `tracing_subscriber::EnvFilter` 支持），用于覆盖/追加过滤规则。
/// - Debug 构建下 `canopy-core` 输出到 debug 级别；Release 构建下只保留 info 及以上。
///
/// 注意：该函数应在应用启动早期调用一次；重复初始化会返回错误。
pub fn init() -> anyhow::Result<()> {
    let core_directive = if cfg!(debug_assertions) {
        "canopy-core=debug"
    } else {
        "canopy-core=info"
    };

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_timer(time::uptime()),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?
                .add_directive(core_directive.parse()?),
        )
        .try_init()?;
    Ok(())
}
