use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{ListQuery, PriceRangeQuery, ProductPayload, ProductResponse},
    repo_types::Product,
    services,
};
use crate::{
    auth::extractors::{AdminUser, CurrentUser},
    error::{AppError, AppResult},
    extract::JsonBody,
    state::AppState,
    storage::{new_image_key, resolve_image_url},
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/filter_by_price", get(filter_by_price))
        .route(
            "/products/:id",
            get(get_product)
                .put(update_product)
                .patch(partial_update_product)
                .delete(delete_product),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Image file received in a multipart create.
struct ImageUpload {
    key: String,
    body: Bytes,
    content_type: String,
}

#[instrument(skip(state, _user))]
pub async fn list_products(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<Vec<ProductResponse>>> {
    let filter = q.into_filter()?;
    let products = services::list_products(state.products.as_ref(), &filter).await?;
    Ok(Json(render_many(&state, products).await))
}

/// Inclusive price range over all products, always rendered as a list.
#[instrument(skip(state, _user))]
pub async fn filter_by_price(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(q): Query<PriceRangeQuery>,
) -> AppResult<Json<Vec<ProductResponse>>> {
    let filter = q.into_filter()?;
    let products = services::list_products(state.products.as_ref(), &filter).await?;
    Ok(Json(render_many(&state, products).await))
}

#[instrument(skip(state, _user))]
pub async fn get_product(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ProductResponse>> {
    let product = services::get_product(state.products.as_ref(), parse_id(&id)?).await?;
    Ok(Json(render(&state, product).await))
}

/// Accepts JSON or `multipart/form-data` with an `image` file.
#[instrument(skip_all)]
pub async fn create_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    req: Request,
) -> AppResult<(StatusCode, Json<ProductResponse>)> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let (payload, upload) = if is_multipart {
        let mp = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::field("non_field_errors", e.body_text()))?;
        read_multipart(mp).await?
    } else {
        let JsonBody(payload) = JsonBody::<ProductPayload>::from_request(req, &state).await?;
        (payload, None)
    };

    let data = payload.into_data().map_err(AppError::Validation)?;
    let uploaded = match upload {
        Some(upload) => {
            state
                .images
                .put_image(&upload.key, upload.body, &upload.content_type)
                .await?;
            Some(upload.key)
        }
        None => None,
    };
    let product = match services::create_product(state.products.as_ref(), data).await {
        Ok(product) => product,
        Err(e) => {
            if let Some(key) = uploaded {
                services::discard_image(state.images.as_ref(), &key).await;
            }
            return Err(e);
        }
    };
    info!(admin_id = %admin.id, product_id = %product.id, "create_product");
    Ok((StatusCode::CREATED, Json(render(&state, product).await)))
}

#[instrument(skip(state, _admin, payload))]
pub async fn update_product(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<ProductPayload>,
) -> AppResult<Json<ProductResponse>> {
    let product = services::update_product(
        state.products.as_ref(),
        state.images.as_ref(),
        parse_id(&id)?,
        payload,
    )
    .await?;
    Ok(Json(render(&state, product).await))
}

#[instrument(skip(state, _admin, payload))]
pub async fn partial_update_product(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<ProductPayload>,
) -> AppResult<Json<ProductResponse>> {
    let product = services::patch_product(
        state.products.as_ref(),
        state.images.as_ref(),
        parse_id(&id)?,
        payload,
    )
    .await?;
    Ok(Json(render(&state, product).await))
}

#[instrument(skip(state, _admin))]
pub async fn delete_product(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    services::delete_product(state.products.as_ref(), state.images.as_ref(), parse_id(&id)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Collects form fields into a payload; an `image` file becomes a pending upload
/// whose key is already set as the image reference.
async fn read_multipart(mut mp: Multipart) -> AppResult<(ProductPayload, Option<ImageUpload>)> {
    let mut payload = ProductPayload::default();
    let mut upload = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::field("non_field_errors", e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" && field.file_name().is_some() {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            if !content_type.starts_with("image/") {
                return Err(AppError::field(
                    "image",
                    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
                ));
            }
            let body = field
                .bytes()
                .await
                .map_err(|e| AppError::field("image", e.body_text()))?;
            if body.is_empty() {
                return Err(AppError::field("image", "The submitted file is empty."));
            }
            let key = new_image_key(&content_type);
            payload.image = Some(key.clone());
            upload = Some(ImageUpload {
                key,
                body,
                content_type,
            });
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::field(&name, e.body_text()))?;
        match name.as_str() {
            "name" => payload.name = Some(text),
            "type" => payload.kind = Some(text),
            "price" => payload.price = Some(Value::String(text)),
            "image" => payload.image = Some(text),
            "specifications" => payload.specifications = Some(Value::String(text)),
            _ => {}
        }
    }
    Ok((payload, upload))
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Not found.".into()))
}

async fn render(state: &AppState, product: Product) -> ProductResponse {
    let url = resolve_image_url(state.images.as_ref(), &product.image).await;
    ProductResponse::new(product, url)
}

async fn render_many(state: &AppState, products: Vec<Product>) -> Vec<ProductResponse> {
    let mut out = Vec::with_capacity(products.len());
    for p in products {
        out.push(render(state, p).await);
    }
    out
}
