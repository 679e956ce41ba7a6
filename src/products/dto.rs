use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Product, ProductType};

/// Body of create, PUT and PATCH. Fields stay loose so each one can be
/// validated on its own and reported per field.
#[derive(Debug, Default, Deserialize)]
pub struct ProductPayload {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// JSON number or numeric string.
    pub price: Option<Value>,
    pub image: Option<String>,
    /// Object, or a string holding a JSON-encoded object.
    pub specifications: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PriceRangeQuery {
    pub min_price: Option<String>,
    pub max_price: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProductType,
    pub price: Decimal,
    pub image: String,
    pub image_url: Option<String>,
    pub specifications: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProductResponse {
    pub fn new(p: Product, image_url: Option<String>) -> Self {
        Self {
            id: p.id,
            name: p.name,
            kind: p.kind,
            price: p.price,
            image: p.image,
            image_url,
            specifications: p.specifications,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
