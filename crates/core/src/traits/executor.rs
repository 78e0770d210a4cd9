use async_trait::async_trait;

use crate::job_context::JobContext;
use crate::models::JobType;
use crate::Result;

/// 定时任务执行器SPI
///
/// http/native/shell等具体执行后端都实现这个接口。
/// 执行引擎按 `order()` 升序遍历注册的执行器，第一个 `support()` 命中的执行器生效。
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// 是否支持指定的任务类型
    fn support(&self, job_type: JobType) -> bool;

    /// 执行器优先级，值越小优先级越高
    fn order(&self) -> i32 {
        0
    }

    /// 执行器名称(用于日志)
    fn name(&self) -> &str;

    /// 执行任务，返回Err表示本次尝试失败(可能触发重试)
    async fn exec(&self, ctx: &JobContext) -> Result<()>;
}
