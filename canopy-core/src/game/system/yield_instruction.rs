use std::{fmt, time::Duration};

use crate::game::world::World;

/// 协程挂起条件所用的谓词，只读访问当前运行时。
pub type Predicate = Box<dyn Fn(&World) -> bool>;

/// 协程让出执行权时返回的挂起条件。
///
/// 该值创建后不可变，只描述“何时继续”，推进逻辑由协程处理器负责：
/// - 常规阶段（`update_after_process`）推进除 [`WaitForEndOfFrame`](Self::WaitForEndOfFrame) 外的所有条件；
/// - 帧末阶段（`end_frame_after_process`）只推进 [`WaitForEndOfFrame`](Self::WaitForEndOfFrame)。
pub enum YieldInstruction {
    /// 下一次常规阶段继续。
    NextFrame,
    /// 累计帧间隔达到给定时长后继续。
    WaitForSeconds(Duration),
    /// 谓词为真时继续。
    WaitUntil(Predicate),
    /// 谓词为假时继续。
    WaitWhile(Predicate),
    /// 本帧所有相机渲染完毕后（帧末阶段）继续。
    WaitForEndOfFrame,
}

impl YieldInstruction {
    /// 负数与 NaN 视为 0；超出 [`Duration`] 表示范围（含无穷大）时视为永久等待。
    pub fn wait_for_seconds(seconds: f32) -> Self {
        let duration = if seconds.is_nan() || seconds <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f32(seconds).unwrap_or(Duration::MAX)
        };
        Self::WaitForSeconds(duration)
    }

    pub fn wait_until(predicate: impl Fn(&World) -> bool + 'static) -> Self {
        Self::WaitUntil(Box::new(predicate))
    }

    pub fn wait_while(predicate: impl Fn(&World) -> bool + 'static) -> Self {
        Self::WaitWhile(Box::new(predicate))
    }

    pub(crate) fn is_end_of_frame(&self) -> bool {
        matches!(self, Self::WaitForEndOfFrame)
    }
}

impl fmt::Debug for YieldInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NextFrame => f.write_str("NextFrame"),
            Self::WaitForSeconds(duration) => {
                f.debug_tuple("WaitForSeconds").field(duration).finish()
            }
            Self::WaitUntil(_) => f.write_str("WaitUntil(..)"),
            Self::WaitWhile(_) => f.write_str("WaitWhile(..)"),
            Self::WaitForEndOfFrame => f.write_str("WaitForEndOfFrame"),
        }
    }
}
