use serde::{Deserialize, Serialize};

use crate::{Result, SchedulerError};

/// 调度器节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 命名空间，同一命名空间下的多个节点组成一个集群
    pub namespace: String,
    /// 当前节点实例名，集群内唯一
    pub instance_name: String,
    /// 认领循环的轮询间隔(毫秒)
    pub tick_interval_ms: u64,
    /// 心跳间隔(秒)
    pub heartbeat_interval_s: u64,
    /// 可用调度器列表的刷新间隔(秒)
    pub scheduler_reload_interval_s: u64,
    /// 调度器指令的轮询间隔(秒)
    pub command_poll_interval_s: u64,
    /// 错过触发的判定阈值(秒)
    pub misfire_threshold_s: i64,
    /// 节点心跳超时时间(秒)，超时的节点不参与路由
    pub scheduler_timeout_s: i64,
    /// 任务执行线程池大小(并发执行上限)
    pub worker_pool_size: usize,
    /// shell任务的工作目录
    pub shell_working_dir: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let instance_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "tasker-node".to_string());
        Self {
            namespace: "default".to_string(),
            instance_name,
            tick_interval_ms: 1000,
            heartbeat_interval_s: 3,
            scheduler_reload_interval_s: 5,
            command_poll_interval_s: 2,
            misfire_threshold_s: 300,
            scheduler_timeout_s: 30,
            worker_pool_size: 16,
            shell_working_dir: "./tasker-jobs".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// 加载配置
    ///
    /// 优先级: 默认值 < 配置文件 < `TASKER_` 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = config::Config::try_from(&SchedulerConfig::default())
            .map_err(|e| SchedulerError::Configuration(format!("构建默认配置失败: {e}")))?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("TASKER").separator("__"));
        let settings = builder
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("加载配置失败: {e}")))?;
        let config: SchedulerConfig = settings
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(format!("解析配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(SchedulerError::Configuration(
                "namespace 不能为空".to_string(),
            ));
        }
        if self.instance_name.is_empty() {
            return Err(SchedulerError::Configuration(
                "instance_name 不能为空".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(SchedulerError::Configuration(
                "tick_interval_ms 必须大于0".to_string(),
            ));
        }
        if self.worker_pool_size == 0 {
            return Err(SchedulerError::Configuration(
                "worker_pool_size 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.namespace, "default");
        assert_eq!(config.tick_interval_ms, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
namespace = "prod"
instance_name = "node-1"
worker_pool_size = 4
"#
        )
        .unwrap();
        let config = SchedulerConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.instance_name, "node-1");
        assert_eq!(config.worker_pool_size, 4);
        // 未指定的字段保持默认值
        assert_eq!(config.misfire_threshold_s, 300);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig {
            tick_interval_ms: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
