/// 单个 [`World`](crate::game::World) 的配置。
///
/// - `compaction_threshold`：调度队列与协程集合中墓碑（空洞）数量达到该值时触发压缩
/// - `root_name`：根对象名称，需满足节点命名规则
#[derive(Clone, Debug)]
pub struct WorldConfig {
    pub compaction_threshold: usize,
    pub root_name: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 16,
            root_name: String::from("root"),
        }
    }
}

/// 帧驱动配置。
///
/// - `world`：运行时实例配置
/// - `frame_interval_ms`：帧间隔（毫秒）
/// - `max_frames`：运行的最大帧数，`None` 表示直到停止标志被置位
/// - `stop_on_error`：某一帧的钩子返回错误时是否终止主循环（默认仅记录警告）
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub world: WorldConfig,
    pub frame_interval_ms: u64,
    pub max_frames: Option<u64>,
    pub stop_on_error: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            frame_interval_ms: 16,
            max_frames: None,
            stop_on_error: false,
        }
    }
}
