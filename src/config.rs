//! 配置模块，负责加载JSON配置文件

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::parser::ParserLimits;

/// 编译器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// 查询文本的解析限制
    pub limits: ParserLimits,
    /// 请求未指定 limit 时的分页大小
    pub default_page_size: u64,
    /// 分页大小上限
    pub max_page_size: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            limits: ParserLimits::default(),
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

impl CompilerConfig {
    /// 从JSON文件加载配置，缺省的字段使用默认值
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        // 检查文件是否存在
        if !path_ref.exists() {
            return Err(ConfigError::Missing(path_ref.to_path_buf()));
        }

        // 读取文件内容
        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;

        let config: CompilerConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            origin: path_ref.display().to_string(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            origin: "compiler config".to_string(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    /// 检查配置值是否合理
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 {
            return Err(ConfigError::Invalid("max_page_size 必须大于 0".to_string()));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size 必须在 1 和 {} 之间",
                self.max_page_size
            )));
        }
        let limits = &self.limits;
        if limits.max_depth == 0 || limits.max_comparisons == 0 || limits.max_in_values == 0 {
            return Err(ConfigError::Invalid("解析限制必须大于 0".to_string()));
        }
        Ok(())
    }
}
