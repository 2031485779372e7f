// 导出调度模块
pub mod coordinator;
pub mod schedule;

pub use coordinator::{ScheduleCoordinator, TriggerKind};
pub use schedule::ScheduleExpression;
