//! Provider identifiers and their Chat Completions endpoints

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProviderError;

/// Completion backend vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    DeepSeek,
    ZhipuAi,
    Aliyun,
    /// Any OpenAI-compatible server; requires an explicit endpoint
    Custom,
}

impl Provider {
    /// Default Chat Completions endpoint, if the vendor has one
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("https://api.openai.com/v1/chat/completions"),
            Provider::DeepSeek => Some("https://api.deepseek.com/chat/completions"),
            Provider::ZhipuAi => Some("https://open.bigmodel.cn/api/paas/v4/chat/completions"),
            Provider::Aliyun => Some("https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"),
            Provider::Custom => None,
        }
    }

    /// Resolve the endpoint, letting an explicit override win
    pub fn endpoint(&self, override_url: Option<&str>) -> Result<String, ProviderError> {
        match override_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => Ok(url.to_string()),
            None => self
                .default_endpoint()
                .map(String::from)
                .ok_or_else(|| ProviderError::InvalidResponse(format!("provider '{}' requires an endpoint", self))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::ZhipuAi => "zhipuai",
            Provider::Aliyun => "aliyun",
            Provider::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "deepseek" => Ok(Provider::DeepSeek),
            "zhipuai" | "zhipu" => Ok(Provider::ZhipuAi),
            "aliyun" | "dashscope" => Ok(Provider::Aliyun),
            "custom" => Ok(Provider::Custom),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}
