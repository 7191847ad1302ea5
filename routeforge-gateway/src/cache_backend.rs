//! Redis-backed implementation of `routeforge_core::catalog_cache::RemoteCacheBackend`.
//! Errors degrade to "no remote entry" rather than propagating — `CatalogCache`
//! treats a remote miss identically to an absent Redis deployment, logging and
//! counting the failure instead of raising it.

use std::time::Duration;

use async_trait::async_trait;
use routeforge_core::catalog_cache::RemoteCacheBackend;

pub struct RedisCacheBackend {
    client: redis::Client,
}

impl RedisCacheBackend {
    pub fn new(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl RemoteCacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await.ok()?;
        match redis::AsyncCommands::get::<_, Option<String>>(&mut conn, key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "catalog cache redis get failed, degrading to local-only");
                None
            }
        }
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) {
        let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
            tracing::warn!(key, "catalog cache redis set skipped: no connection");
            return;
        };
        let result: redis::RedisResult<()> = redis::AsyncCommands::set_ex(
            &mut conn,
            key,
            payload,
            ttl.as_secs().max(1),
        )
        .await;
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "catalog cache redis set failed");
        }
    }
}
