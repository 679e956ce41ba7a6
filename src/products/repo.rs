use async_trait::async_trait;
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::RepoResult;
use crate::products::repo_types::{Product, ProductData, ProductFilter, ProductRow};

const PRODUCT_COLUMNS: &str = "id, name, type AS kind, price, image, specifications, \
                               created_at, updated_at";

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list(&self, filter: &ProductFilter) -> RepoResult<Vec<Product>>;
    async fn get(&self, id: Uuid) -> RepoResult<Option<Product>>;
    async fn create(&self, data: ProductData) -> RepoResult<Product>;
    /// Replaces every writable field and bumps `updated_at`; `None` if absent.
    async fn update(&self, id: Uuid, data: ProductData) -> RepoResult<Option<Product>>;
    /// Returns the removed product, `None` if absent.
    async fn delete(&self, id: Uuid) -> RepoResult<Option<Product>>;
    /// Number of products whose `image` is exactly `image`.
    async fn count_by_image(&self, image: &str) -> RepoResult<i64>;
}

#[derive(Clone)]
pub struct PgProductRepository {
    db: PgPool,
}

impl PgProductRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_product(row: ProductRow) -> RepoResult<Product> {
    Ok(Product::try_from(row)?)
}

/// Escapes LIKE metacharacters so a search term matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn list(&self, filter: &ProductFilter) -> RepoResult<Vec<Product>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE TRUE"));
        if let Some(kind) = filter.kind {
            qb.push(" AND type = ").push_bind(kind.as_str());
        }
        for term in &filter.search {
            qb.push(" AND name ILIKE ").push_bind(like_pattern(term));
        }
        if let Some(min) = filter.min_price {
            qb.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            qb.push(" AND price <= ").push_bind(max);
        }
        qb.push(" ORDER BY ").push(filter.ordering.sql());

        let rows = qb
            .build_query_as::<ProductRow>()
            .fetch_all(&self.db)
            .await?;
        rows.into_iter().map(into_product).collect()
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_product).transpose()
    }

    async fn create(&self, data: ProductData) -> RepoResult<Product> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            INSERT INTO products (id, name, type, price, image, specifications)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(data.kind.as_str())
        .bind(data.price)
        .bind(&data.image)
        .bind(Json(&data.specifications))
        .fetch_one(&self.db)
        .await?;
        into_product(row)
    }

    async fn update(&self, id: Uuid, data: ProductData) -> RepoResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            UPDATE products
               SET name = $2, type = $3, price = $4, image = $5, specifications = $6,
                   updated_at = now()
             WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&data.name)
        .bind(data.kind.as_str())
        .bind(data.price)
        .bind(&data.image)
        .bind(Json(&data.specifications))
        .fetch_optional(&self.db)
        .await?;
        row.map(into_product).transpose()
    }

    async fn delete(&self, id: Uuid) -> RepoResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "DELETE FROM products WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_product).transpose()
    }

    async fn count_by_image(&self, image: &str) -> RepoResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE image = $1")
            .bind(image)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}
