use std::{cmp::Ordering, fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Product category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    #[serde(alias = "phone")]
    Mobile,
    Pc,
    Tablet,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Mobile => "mobile",
            ProductType::Pc => "pc",
            ProductType::Tablet => "tablet",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" | "phone" => Ok(ProductType::Mobile),
            "pc" => Ok(ProductType::Pc),
            "tablet" => Ok(ProductType::Tablet),
            other => Err(format!("\"{other}\" is not a valid choice.")),
        }
    }
}

/// Row as stored; `kind` is the `type` column.
#[derive(Debug, FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub price: Decimal,
    pub image: String,
    pub specifications: Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub kind: ProductType,
    pub price: Decimal,
    pub image: String,
    pub specifications: Map<String, Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<ProductRow> for Product {
    type Error = anyhow::Error;

    fn try_from(r: ProductRow) -> Result<Self, Self::Error> {
        let kind = r
            .kind
            .parse::<ProductType>()
            .map_err(|e| anyhow::anyhow!("product {}: {e}", r.id))?;
        let specifications = match r.specifications {
            Value::Object(map) => map,
            other => anyhow::bail!("product {}: specifications is not an object: {other}", r.id),
        };
        Ok(Self {
            id: r.id,
            name: r.name,
            kind,
            price: r.price,
            image: r.image,
            specifications,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Writable fields of a product, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductData {
    pub name: String,
    pub kind: ProductType,
    pub price: Decimal,
    pub image: String,
    pub specifications: Map<String, Value>,
}

impl From<Product> for ProductData {
    fn from(p: Product) -> Self {
        Self {
            name: p.name,
            kind: p.kind,
            price: p.price,
            image: p.image,
            specifications: p.specifications,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProductOrdering {
    #[default]
    CreatedAsc,
    CreatedDesc,
    PriceAsc,
    PriceDesc,
}

impl ProductOrdering {
    /// Parses `price`, `-price`, `created_at`, `-created_at`; anything else is ignored.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("price") => Self::PriceAsc,
            Some("-price") => Self::PriceDesc,
            Some("-created_at") => Self::CreatedDesc,
            _ => Self::CreatedAsc,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::CreatedAsc => "created_at ASC, id ASC",
            Self::CreatedDesc => "created_at DESC, id DESC",
            Self::PriceAsc => "price ASC, created_at ASC",
            Self::PriceDesc => "price DESC, created_at ASC",
        }
    }

    pub fn compare(self, a: &Product, b: &Product) -> Ordering {
        match self {
            Self::CreatedAsc => a.created_at.cmp(&b.created_at),
            Self::CreatedDesc => b.created_at.cmp(&a.created_at),
            Self::PriceAsc => a.price.cmp(&b.price).then(a.created_at.cmp(&b.created_at)),
            Self::PriceDesc => b.price.cmp(&a.price).then(a.created_at.cmp(&b.created_at)),
        }
    }
}

/// Criteria for listing products. Price bounds are inclusive; every search
/// term must appear in the name.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub kind: Option<ProductType>,
    pub search: Vec<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub ordering: ProductOrdering,
}

impl ProductFilter {
    pub fn matches(&self, p: &Product) -> bool {
        if self.kind.is_some_and(|k| k != p.kind) {
            return false;
        }
        let name = p.name.to_lowercase();
        if !self
            .search
            .iter()
            .all(|term| name.contains(&term.to_lowercase()))
        {
            return false;
        }
        if self.min_price.is_some_and(|min| p.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| p.price > max) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn product(name: &str, kind: ProductType, price: i64) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            price: Decimal::new(price * 100, 2),
            image: String::new(),
            specifications: Map::new(),
            created_at: datetime!(2024-01-01 0:00 UTC),
            updated_at: datetime!(2024-01-01 0:00 UTC),
        }
    }

    #[test]
    fn product_type_accepts_phone_alias() {
        assert_eq!("phone".parse::<ProductType>().unwrap(), ProductType::Mobile);
        assert_eq!(" PC ".parse::<ProductType>().unwrap(), ProductType::Pc);
        assert!("laptop".parse::<ProductType>().is_err());
        let json: ProductType = serde_json::from_str("\"phone\"").unwrap();
        assert_eq!(json, ProductType::Mobile);
        assert_eq!(serde_json::to_string(&ProductType::Mobile).unwrap(), "\"mobile\"");
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let filter = ProductFilter {
            min_price: Some(Decimal::new(100, 0)),
            max_price: Some(Decimal::new(500, 0)),
            ..Default::default()
        };
        assert!(filter.matches(&product("a", ProductType::Pc, 100)));
        assert!(filter.matches(&product("b", ProductType::Pc, 500)));
        assert!(!filter.matches(&product("c", ProductType::Pc, 99)));
        assert!(!filter.matches(&product("d", ProductType::Pc, 501)));
    }

    #[test]
    fn filter_by_kind_and_search() {
        let filter = ProductFilter {
            kind: Some(ProductType::Tablet),
            search: vec!["TAB".into(), "galaxy".into()],
            ..Default::default()
        };
        assert!(filter.matches(&product("Galaxy Tab S9", ProductType::Tablet, 700)));
        assert!(!filter.matches(&product("Galaxy Tab S9", ProductType::Mobile, 700)));
        assert!(!filter.matches(&product("iPad", ProductType::Tablet, 700)));
        assert!(!filter.matches(&product("Tab Pro", ProductType::Tablet, 700)));
    }

    #[test]
    fn ordering_parse_ignores_unknown_fields() {
        assert_eq!(ProductOrdering::parse(Some("-price")), ProductOrdering::PriceDesc);
        assert_eq!(ProductOrdering::parse(Some("name")), ProductOrdering::CreatedAsc);
        assert_eq!(ProductOrdering::parse(None), ProductOrdering::CreatedAsc);
    }

    #[test]
    fn row_with_non_object_specs_is_rejected() {
        let row = ProductRow {
            id: Uuid::new_v4(),
            name: "x".into(),
            kind: "pc".into(),
            price: Decimal::ONE,
            image: String::new(),
            specifications: Value::Array(vec![]),
            created_at: datetime!(2024-01-01 0:00 UTC),
            updated_at: datetime!(2024-01-01 0:00 UTC),
        };
        assert!(Product::try_from(row).is_err());
    }
}
