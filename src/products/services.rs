use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    dto::{ListQuery, PriceRangeQuery, ProductPayload},
    repo::ProductRepository,
    repo_types::{Product, ProductData, ProductFilter, ProductOrdering, ProductType},
};
use crate::{
    error::{AppError, AppResult, FieldErrors},
    storage::{is_stored_key, ImageStore},
};

const REQUIRED: &str = "This field is required.";
const NAME_MAX: usize = 200;
const PRICE_DECIMAL_PLACES: u32 = 2;
const PRICE_INTEGER_DIGITS: u32 = 8;

/// Accepts an object, or a string holding a JSON-encoded object.
pub fn normalize_specifications(value: Value) -> Result<Map<String, Value>, String> {
    let value = match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Ok(Map::new());
            }
            serde_json::from_str::<Value>(raw)
                .map_err(|e| format!("Value must be valid JSON: {e}"))?
        }
        other => other,
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err("Value must be a JSON object of key-value pairs.".to_string()),
    }
}

/// Parses a price given as a JSON number or string, scaled to two decimal places.
pub fn parse_price(value: &Value) -> Result<Decimal, String> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err("A valid number is required.".to_string()),
    };
    let price = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| "A valid number is required.".to_string())?;
    if price.is_sign_negative() && !price.is_zero() {
        return Err("Ensure this value is greater than or equal to 0.".to_string());
    }
    if price.normalize().scale() > PRICE_DECIMAL_PLACES {
        return Err(format!(
            "Ensure that there are no more than {PRICE_DECIMAL_PLACES} decimal places."
        ));
    }
    if price.trunc() >= Decimal::from(10_i64.pow(PRICE_INTEGER_DIGITS)) {
        return Err(format!(
            "Ensure that there are no more than {PRICE_INTEGER_DIGITS} digits before the decimal point."
        ));
    }
    let mut price = price.abs();
    price.rescale(PRICE_DECIMAL_PLACES);
    Ok(price)
}

/// Optional price bound from a query string; empty means absent.
pub fn parse_price_bound(raw: Option<&str>) -> Result<Option<Decimal>, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => Decimal::from_str(s)
            .map(Some)
            .map_err(|_| "A valid number is required.".to_string()),
    }
}

/// Splits a search string on whitespace and commas into its terms.
pub fn split_search(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("This field may not be blank.".to_string());
    }
    if name.chars().count() > NAME_MAX {
        return Err(format!(
            "Ensure this field has no more than {NAME_MAX} characters."
        ));
    }
    Ok(name.to_string())
}

fn validate_image(image: &str) -> Result<String, String> {
    let image = image.trim();
    if image.is_empty() {
        return Err("No file was submitted.".to_string());
    }
    Ok(image.to_string())
}

/// Runs `check` and records its failure under `field`.
fn check<T>(errors: &mut FieldErrors, field: &str, result: Result<T, String>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(msg) => {
            errors.add(field, msg);
            None
        }
    }
}

impl ProductPayload {
    /// Validates a complete payload (create, PUT).
    pub fn into_data(self) -> Result<ProductData, FieldErrors> {
        let mut errors = FieldErrors::new();
        let name = match &self.name {
            Some(n) => check(&mut errors, "name", validate_name(n)),
            None => check(&mut errors, "name", Err(REQUIRED.into())),
        };
        let kind = match &self.kind {
            Some(k) => check(&mut errors, "type", ProductType::from_str(k)),
            None => check(&mut errors, "type", Err(REQUIRED.into())),
        };
        let price = match &self.price {
            Some(p) => check(&mut errors, "price", parse_price(p)),
            None => check(&mut errors, "price", Err(REQUIRED.into())),
        };
        let image = match &self.image {
            Some(i) => check(&mut errors, "image", validate_image(i)),
            None => check(&mut errors, "image", Err(REQUIRED.into())),
        };
        let specifications = match self.specifications {
            Some(s) => check(&mut errors, "specifications", normalize_specifications(s)),
            None => Some(Map::new()),
        };

        match (name, kind, price, image, specifications) {
            (Some(name), Some(kind), Some(price), Some(image), Some(specifications))
                if errors.is_empty() =>
            {
                Ok(ProductData {
                    name,
                    kind,
                    price,
                    image,
                    specifications,
                })
            }
            _ => Err(errors),
        }
    }

    /// Validates the provided fields and overlays them on `current` (PATCH).
    pub fn apply_to(self, current: ProductData) -> Result<ProductData, FieldErrors> {
        let mut errors = FieldErrors::new();
        let mut data = current;
        if let Some(n) = &self.name {
            if let Some(name) = check(&mut errors, "name", validate_name(n)) {
                data.name = name;
            }
        }
        if let Some(k) = &self.kind {
            if let Some(kind) = check(&mut errors, "type", ProductType::from_str(k)) {
                data.kind = kind;
            }
        }
        if let Some(p) = &self.price {
            if let Some(price) = check(&mut errors, "price", parse_price(p)) {
                data.price = price;
            }
        }
        if let Some(i) = &self.image {
            if let Some(image) = check(&mut errors, "image", validate_image(i)) {
                data.image = image;
            }
        }
        if let Some(s) = self.specifications {
            if let Some(specs) = check(&mut errors, "specifications", normalize_specifications(s))
            {
                data.specifications = specs;
            }
        }
        if errors.is_empty() {
            Ok(data)
        } else {
            Err(errors)
        }
    }
}

impl ListQuery {
    pub fn into_filter(self) -> AppResult<ProductFilter> {
        let kind = match self.kind.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                ProductType::from_str(raw).map_err(|msg| AppError::field("type", msg))?,
            ),
            None => None,
        };
        Ok(ProductFilter {
            kind,
            search: self.search.as_deref().map(split_search).unwrap_or_default(),
            ordering: ProductOrdering::parse(self.ordering.as_deref()),
            ..Default::default()
        })
    }
}

impl PriceRangeQuery {
    /// Only the price bounds apply; category and search do not.
    pub fn into_filter(self) -> AppResult<ProductFilter> {
        let mut errors = FieldErrors::new();
        let min_price = check(&mut errors, "min_price", parse_price_bound(self.min_price.as_deref()));
        let max_price = check(&mut errors, "max_price", parse_price_bound(self.max_price.as_deref()));
        errors.into_result()?;
        Ok(ProductFilter {
            min_price: min_price.flatten(),
            max_price: max_price.flatten(),
            ..Default::default()
        })
    }
}

pub async fn list_products(
    repo: &dyn ProductRepository,
    filter: &ProductFilter,
) -> AppResult<Vec<Product>> {
    Ok(repo.list(filter).await?)
}

pub async fn get_product(repo: &dyn ProductRepository, id: Uuid) -> AppResult<Product> {
    repo.get(id).await?.ok_or_else(not_found)
}

pub async fn create_product(repo: &dyn ProductRepository, data: ProductData) -> AppResult<Product> {
    let product = repo.create(data).await?;
    info!(product_id = %product.id, name = %product.name, "product created");
    Ok(product)
}

pub async fn update_product(
    repo: &dyn ProductRepository,
    images: &dyn ImageStore,
    id: Uuid,
    payload: ProductPayload,
) -> AppResult<Product> {
    // existence first, so a missing product is a 404 even with a bad body
    let previous = get_product(repo, id).await?;
    let data = payload.into_data().map_err(AppError::Validation)?;
    let product = repo.update(id, data).await?.ok_or_else(not_found)?;
    info!(product_id = %product.id, "product updated");
    release_replaced_image(repo, images, &previous, &product).await;
    Ok(product)
}

pub async fn patch_product(
    repo: &dyn ProductRepository,
    images: &dyn ImageStore,
    id: Uuid,
    payload: ProductPayload,
) -> AppResult<Product> {
    let previous = get_product(repo, id).await?;
    let data = payload
        .apply_to(previous.clone().into())
        .map_err(AppError::Validation)?;
    let product = repo.update(id, data).await?.ok_or_else(not_found)?;
    info!(product_id = %product.id, "product patched");
    release_replaced_image(repo, images, &previous, &product).await;
    Ok(product)
}

/// Deletes the product and, best effort, its stored image.
pub async fn delete_product(
    repo: &dyn ProductRepository,
    images: &dyn ImageStore,
    id: Uuid,
) -> AppResult<()> {
    let product = repo.delete(id).await?.ok_or_else(not_found)?;
    info!(product_id = %product.id, "product deleted");
    release_image(repo, images, &product.image).await;
    Ok(())
}

async fn release_replaced_image(
    repo: &dyn ProductRepository,
    images: &dyn ImageStore,
    previous: &Product,
    current: &Product,
) {
    if previous.image != current.image {
        release_image(repo, images, &previous.image).await;
    }
}

/// Removes a stored image once no product references it anymore. When the
/// reference count cannot be read the object is kept.
pub async fn release_image(repo: &dyn ProductRepository, images: &dyn ImageStore, key: &str) {
    if !is_stored_key(key) {
        return;
    }
    match repo.count_by_image(key).await {
        Ok(0) => discard_image(images, key).await,
        Ok(_) => debug!(%key, "image still referenced"),
        Err(e) => warn!(error = %e, %key, "image reference count failed; keeping object"),
    }
}

/// Best-effort removal of a stored object; failures are only logged.
pub async fn discard_image(images: &dyn ImageStore, key: &str) {
    if let Err(e) = images.delete_image(key).await {
        warn!(error = %e, %key, "image cleanup failed");
    }
}

fn not_found() -> AppError {
    AppError::NotFound("Not found.".into())
}
