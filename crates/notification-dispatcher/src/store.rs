//! 文档存储访问
//!
//! 分发器对文档存储只读：按 id 读取单个文档，或按字段等值条件查询集合。
//! 通过 `DocumentStore` trait 抽象，生产环境使用 PostgreSQL JSONB 投影，
//! 测试与本地开发使用内存实现。

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use souk_shared::config::DatabaseConfig;
use souk_shared::error::SharedError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, instrument};

use crate::error::DispatchError;

/// 等值过滤条件
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    fn matches(&self, data: &Value) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}

/// 查询返回的文档（id + 内容）
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self, collection: &str) -> Result<T, DispatchError> {
        decode_document(collection, &self.id, self.data.clone())
    }
}

/// 文档存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 按 id 读取文档，不存在时返回 None
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, DispatchError>;

    /// 查询集合中所有满足全部等值条件的文档
    async fn query_eq(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<StoredDocument>, DispatchError>;
}

/// 读取并解析为目标结构
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, DispatchError> {
    match store.get(collection, id).await? {
        Some(data) => decode_document(collection, id, data).map(Some),
        None => Ok(None),
    }
}

fn decode_document<T: DeserializeOwned>(
    collection: &str,
    id: &str,
    data: Value,
) -> Result<T, DispatchError> {
    serde_json::from_value(data).map_err(|e| DispatchError::MalformedDocument {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// 内存实现
// ---------------------------------------------------------------------------

/// 内存文档存储
///
/// 基于 DashMap 实现，适用于测试和本地开发。查询结果按文档 id 排序，保证确定性。
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<(String, String), Value>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖文档
    pub fn insert(&self, collection: &str, id: &str, data: Value) {
        self.documents
            .insert((collection.to_string(), id.to_string()), data);
    }

    pub fn remove(&self, collection: &str, id: &str) -> Option<Value> {
        self.documents
            .remove(&(collection.to_string(), id.to_string()))
            .map(|(_, v)| v)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, DispatchError> {
        Ok(self
            .documents
            .get(&(collection.to_string(), id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn query_eq(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<StoredDocument>, DispatchError> {
        let mut documents: Vec<StoredDocument> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .filter(|entry| filters.iter().all(|f| f.matches(entry.value())))
            .map(|entry| StoredDocument {
                id: entry.key().1.clone(),
                data: entry.value().clone(),
            })
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL 实现
// ---------------------------------------------------------------------------

/// PostgreSQL JSONB 文档存储
///
/// 读取应用同步过来的文档投影表：
///
/// ```sql
/// CREATE TABLE documents (
///     collection TEXT  NOT NULL,
///     id         TEXT  NOT NULL,
///     data       JSONB NOT NULL,
///     PRIMARY KEY (collection, id)
/// );
/// CREATE INDEX documents_data_gin ON documents USING GIN (data jsonb_path_ops);
/// ```
///
/// 等值查询使用 JSONB 包含运算（`data @> {...}`），只适用于标量字段。
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按配置建立连接池
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DispatchError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(SharedError::from)?;

        info!(
            max_connections = config.max_connections,
            "文档存储连接池已创建"
        );
        Ok(Self { pool })
    }

    /// 确认连接可用且文档投影表存在
    pub async fn health_check(&self) -> Result<(), DispatchError> {
        sqlx::query("SELECT 1 FROM documents LIMIT 1")
            .execute(&self.pool)
            .await
            .map_err(SharedError::from)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("文档存储连接池已关闭");
    }

    fn containment(filters: &[FieldFilter]) -> Value {
        let object = filters
            .iter()
            .map(|f| (f.field.clone(), f.value.clone()))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(object)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    #[instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, DispatchError> {
        let data = sqlx::query_scalar::<_, Value>(
            "SELECT data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SharedError::from)?;

        Ok(data)
    }

    #[instrument(skip(self))]
    async fn query_eq(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<StoredDocument>, DispatchError> {
        let rows = sqlx::query_as::<_, (String, Value)>(
            "SELECT id, data FROM documents WHERE collection = $1 AND data @> $2 ORDER BY id",
        )
        .bind(collection)
        .bind(sqlx::types::Json(Self::containment(filters)))
        .fetch_all(&self.pool)
        .await
        .map_err(SharedError::from)?;

        debug!(collection, count = rows.len(), "文档查询完成");

        Ok(rows
            .into_iter()
            .map(|(id, data)| StoredDocument { id, data })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// 超时装饰器
// ---------------------------------------------------------------------------

/// 为每次读取加上超时，超时视为该次读取失败，不重试
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: DocumentStore> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for TimeoutStore<S> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, DispatchError> {
        tokio::time::timeout(self.timeout, self.inner.get(collection, id))
            .await
            .map_err(|_| DispatchError::Timeout {
                operation: format!("get {collection}/{id}"),
            })?
    }

    async fn query_eq(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<StoredDocument>, DispatchError> {
        tokio::time::timeout(self.timeout, self.inner.query_eq(collection, filters))
            .await
            .map_err(|_| DispatchError::Timeout {
                operation: format!("query {collection}"),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{User, collections};
    use serde_json::json;

    fn seeded_store() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        store.insert(
            collections::SHOP_LIKES,
            "like-2",
            json!({"shopId": "s-1", "userId": "u-2", "liked": false}),
        );
        store.insert(
            collections::SHOP_LIKES,
            "like-1",
            json!({"shopId": "s-1", "userId": "u-1", "liked": true}),
        );
        store.insert(
            collections::SHOP_LIKES,
            "like-3",
            json!({"shopId": "s-2", "userId": "u-1", "liked": true}),
        );
        store.insert(collections::USERS, "u-1", json!({"fullName": "Youssef"}));
        store
    }

    #[tokio::test]
    async fn test_in_memory_get() {
        let store = seeded_store();
        let user = store.get(collections::USERS, "u-1").await.unwrap();
        assert_eq!(user, Some(json!({"fullName": "Youssef"})));

        let missing = store.get(collections::USERS, "u-404").await.unwrap();
        assert!(missing.is_none());

        // 同 id 不同集合互不干扰
        assert!(store.get(collections::SHOPS, "u-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_query_eq() {
        let store = seeded_store();
        let filters = [FieldFilter::eq("shopId", "s-1"), FieldFilter::eq("liked", true)];
        let docs = store
            .query_eq(collections::SHOP_LIKES, &filters)
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "like-1");

        let all_s1 = store
            .query_eq(collections::SHOP_LIKES, &[FieldFilter::eq("shopId", "s-1")])
            .await
            .unwrap();
        let ids: Vec<_> = all_s1.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["like-1", "like-2"]);
    }

    #[tokio::test]
    async fn test_get_typed() {
        let store = seeded_store();
        let user: Option<User> = get_typed(&store, collections::USERS, "u-1").await.unwrap();
        assert_eq!(user.unwrap().full_name.as_deref(), Some("Youssef"));

        store.insert(collections::USERS, "u-bad", json!({"fcmToken": 42}));
        let result: Result<Option<User>, _> = get_typed(&store, collections::USERS, "u-bad").await;
        assert!(matches!(result, Err(DispatchError::MalformedDocument { .. })));
    }

    #[test]
    fn test_pg_containment_object() {
        let filters = [FieldFilter::eq("shopId", "s-1"), FieldFilter::eq("liked", true)];
        assert_eq!(
            PgDocumentStore::containment(&filters),
            json!({"shopId": "s-1", "liked": true})
        );
    }

    #[tokio::test]
    async fn test_pg_connect_rejects_invalid_url() {
        let config = DatabaseConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        let result = PgDocumentStore::connect(&config).await;
        assert!(matches!(
            result,
            Err(DispatchError::Shared(SharedError::Database(_)))
        ));
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接并已执行 migrations
    async fn test_pg_health_check() {
        let store = PgDocumentStore::connect(&DatabaseConfig::default())
            .await
            .unwrap();
        store.health_check().await.unwrap();
        assert!(store.get(collections::USERS, "u-404").await.unwrap().is_none());
        store.close().await;
    }

    struct SlowStore;

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn get(&self, _: &str, _: &str) -> Result<Option<Value>, DispatchError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(None)
        }

        async fn query_eq(
            &self,
            _: &str,
            _: &[FieldFilter],
        ) -> Result<Vec<StoredDocument>, DispatchError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_timeout_store_elapsed() {
        let store = TimeoutStore::new(SlowStore, Duration::from_millis(10));

        let err = store.get(collections::USERS, "u-1").await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { ref operation } if operation == "get users/u-1"));

        let err = store.query_eq(collections::SHOP_LIKES, &[]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_timeout_store_passes_through() {
        let store = TimeoutStore::new(seeded_store(), Duration::from_secs(1));
        let user = store.get(collections::USERS, "u-1").await;
        tokio_test::assert_ok!(&user);
        assert!(user.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_store_error_propagates() {
        let mut store = MockDocumentStore::new();
        store
            .expect_get()
            .returning(|_, _| Err(DispatchError::from(SharedError::from(sqlx::Error::PoolTimedOut))));

        let result: Result<Option<User>, _> = get_typed(&store, collections::USERS, "u-1").await;
        assert!(matches!(result, Err(DispatchError::Shared(_))));
    }
}
