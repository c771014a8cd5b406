use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::auth::{
    jwt::JwtKeys,
    repo::{MemoryUserRepo, PgUserRepo, UserRepo},
    services::{AuthService, CredentialStore},
};
use crate::config::{AppConfig, StoreConfig};
use crate::posts::{
    repo::{MemoryPostRepo, PgPostRepo, PostRepo},
    services::PostService,
};
use crate::storage::{self, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub posts: Arc<PostService>,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let (users, posts): (Arc<dyn UserRepo>, Arc<dyn PostRepo>) = match &config.store {
            StoreConfig::Postgres { database_url } => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(database_url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                info!("postgres store ready");
                (
                    Arc::new(PgUserRepo::new(db.clone())) as Arc<dyn UserRepo>,
                    Arc::new(PgPostRepo::new(db)) as Arc<dyn PostRepo>,
                )
            }
            StoreConfig::Memory => {
                info!("using in-memory store, data is lost on restart");
                (
                    Arc::new(MemoryUserRepo::new()) as Arc<dyn UserRepo>,
                    Arc::new(MemoryPostRepo::new()) as Arc<dyn PostRepo>,
                )
            }
        };

        let storage = storage::from_config(&config.storage).await?;
        Ok(Self::from_parts(config, users, posts, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepo>,
        posts: Arc<dyn PostRepo>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let keys = JwtKeys::from_config(&config.jwt);
        let auth = AuthService::new(CredentialStore::new(users.clone()), keys);
        let posts = PostService::new(posts, users, storage);
        Self {
            config,
            auth: Arc::new(auth),
            posts: Arc::new(posts),
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use axum::async_trait;
        use bytes::Bytes;
        use std::collections::HashMap;
        use tokio::sync::Mutex;

        use crate::config::{JwtConfig, StorageConfig};

        #[derive(Default)]
        struct FakeStorage {
            objects: Mutex<HashMap<String, Bytes>>,
        }
        #[async_trait]
        impl StorageClient for FakeStorage {
            async fn put_object(&self, k: &str, b: Bytes, _ct: &str) -> anyhow::Result<()> {
                self.objects.lock().await.insert(k.to_string(), b);
                Ok(())
            }
            async fn delete_object(&self, k: &str) -> anyhow::Result<()> {
                self.objects.lock().await.remove(k);
                Ok(())
            }
            async fn public_url(&self, k: &str) -> anyhow::Result<String> {
                Ok(format!("https://fake.local/{}", k))
            }
        }

        let config = Arc::new(AppConfig {
            store: StoreConfig::Memory,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
            },
            storage: StorageConfig::Local {
                upload_dir: "uploads".into(),
                public_base_url: "https://fake.local".into(),
            },
            max_upload_bytes: 1024 * 1024,
            cors_origin: None,
            host: "127.0.0.1".into(),
            port: 0,
        });

        Self::from_parts(
            config,
            Arc::new(MemoryUserRepo::new()),
            Arc::new(MemoryPostRepo::new()),
            Arc::new(FakeStorage::default()),
        )
    }
}
