pub mod config;
pub mod errors;
pub mod job_context;
pub mod models;
pub mod traits;

pub use config::SchedulerConfig;
pub use errors::{Result, SchedulerError};
pub use job_context::JobContext;
pub use models::{
    CommandKind, CommandState, ConsoleLogLevel, Job, JobConsoleLog, JobDetail, JobLog,
    JobLogStatus, JobTriggerLog, JobType, LoadBalance, MisfireStrategy, RouteStrategy,
    ScheduleKind, SchedulerCommand, SchedulerRegistration, ShellType, Trigger,
};
pub use traits::{JobExecutor, TaskStore};
