//! 文档变更事件
//!
//! 事件源以 JSON 信封投递文档的创建/更新快照，路由层按文档路径模式分发到处理器。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// 文档变更信封
///
/// 事件源保证至少一次投递，同一变更可能出现多次，`event_id` 只用于日志关联。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    pub event_id: String,
    pub kind: ChangeKind,
    /// 文档完整路径，如 `Conversation/c-1/messages/m-1`
    pub path: String,
    /// 变更前快照（创建时为空）
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    /// 变更后快照（删除时为空）
    #[serde(default)]
    pub after: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DocumentChange {
    /// 构建新事件，自动生成 UUID v7 作为 event_id 并记录当前时间
    pub fn new(
        kind: ChangeKind,
        path: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            kind,
            path: path.into(),
            before,
            after,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn created(path: impl Into<String>, after: serde_json::Value) -> Self {
        Self::new(ChangeKind::Created, path, None, Some(after))
    }

    pub fn updated(
        path: impl Into<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Self {
        Self::new(ChangeKind::Updated, path, Some(before), Some(after))
    }
}

/// 文档路径模式
///
/// 按 `/` 分段匹配，`{name}` 段捕获任意一个非空段，其余段必须逐字相等。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathPattern(&'static str);

impl PathPattern {
    pub const fn new(pattern: &'static str) -> Self {
        Self(pattern)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// 路径匹配时返回捕获到的参数
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let pattern_segments: Vec<&str> = split_path(self.0).collect();
        let path_segments: Vec<&str> = split_path(path).collect();

        if pattern_segments.len() != path_segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (pattern, segment) in pattern_segments.iter().zip(&path_segments) {
            if segment.is_empty() {
                return None;
            }
            match pattern
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                Some(name) => {
                    params.insert(name.to_string(), (*segment).to_string());
                }
                None if pattern == segment => {}
                None => return None,
            }
        }

        Some(PathParams(params))
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches('/').split('/')
}

/// 路径模式捕获到的参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}
