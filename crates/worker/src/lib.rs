pub mod engine;
pub mod executors;

#[cfg(test)]
mod engine_test;

pub use engine::JobExecutionEngine;
pub use executors::{
    HttpJobExecutor, MockJobExecutor, NativeCallable, NativeCallableRegistry, NativeJobExecutor,
    ShellJobExecutor,
};
