use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::repo::{PgUserRepository, UserRepository};
use crate::config::AppConfig;
use crate::products::repo::{PgProductRepository, ProductRepository};
use crate::storage::{ImageStore, S3ImageStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub images: Arc<dyn ImageStore>,
}

impl AppState {
    /// Postgres-backed repositories and the configured S3 bucket.
    pub async fn init(config: Arc<AppConfig>, db: PgPool) -> anyhow::Result<Self> {
        let images = Arc::new(S3ImageStore::new(&config.storage).await?) as Arc<dyn ImageStore>;
        Ok(Self::from_parts(
            config,
            Arc::new(PgUserRepository::new(db.clone())),
            Arc::new(PgProductRepository::new(db)),
            images,
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepository>,
        products: Arc<dyn ProductRepository>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            config,
            users,
            products,
            images,
        }
    }
}
