//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the marketplace over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                     | Description                          |
//! |--------|--------------------------|--------------------------------------|
//! | GET    | `/health`                | Liveness probe                       |
//! | GET    | `/status`                | Node status summary                  |
//! | GET    | `/name`                  | Marketplace name                     |
//! | GET    | `/products`              | Every product, in id order           |
//! | GET    | `/products/count`        | Product counter                      |
//! | GET    | `/products/:id`          | Product by id (raw lookup)           |
//! | POST   | `/products`              | List a new product                   |
//! | POST   | `/products/:id/purchase` | Buy a product                        |
//! | GET    | `/accounts/:address`     | Native balance                       |
//! | POST   | `/rpc`                   | JSON-RPC 2.0 gateway                 |
//! | GET    | `/ws`                    | WebSocket for live marketplace events|
//!
//! Mutating requests name their caller in a `from` field. There are no
//! signatures: the node behaves like a devnet with unlocked accounts.
//!
//! Amounts (prices, payments, balances) are decimal strings in base units,
//! e.g. `"20000000000000000000"` for 20 coins. Plain JSON integers are
//! accepted on input up to `u64::MAX`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use agora_contracts::{
    MarketError, MarketEvent, Marketplace, Product, ProductCreated, ProductId, ProductPurchased,
    RegistryError,
};
use agora_protocol::config::EVENT_CHANNEL_CAPACITY;
use agora_protocol::identity::Address;
use agora_protocol::vault::Amount;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The marketplace. Every transition takes the write guard, so calls
    /// are applied one at a time.
    pub market: Arc<RwLock<Marketplace>>,
    /// Broadcast channel for live event notifications.
    pub event_tx: broadcast::Sender<MarketEvent>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Wraps `market` for sharing and wires its committed events into the
    /// broadcast channel that feeds `/ws`.
    pub fn new(mut market: Marketplace, version: String, metrics: SharedMetrics) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sender = event_tx.clone();
        market.subscribe(move |event| {
            // No receivers is fine; events are fire-and-forget.
            let _ = sender.send(event.clone());
        });
        metrics.product_count.set(market.product_count() as i64);

        Self {
            version,
            market: Arc::new(RwLock::new(market)),
            event_tx,
            metrics,
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
///
/// The returned router is ready to be served on the configured RPC port.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/name", get(name_handler))
        .route(
            "/products",
            get(list_products_handler).post(create_product_handler),
        )
        .route("/products/count", get(product_count_handler))
        .route("/products/:id", get(product_handler))
        .route("/products/:id/purchase", post(purchase_product_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    /// The method to invoke.
    pub method: String,
    /// Positional method parameters.
    pub params: Option<serde_json::Value>,
    /// Request identifier. Echoed back in the response.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version. Always "2.0".
    pub jsonrpc: String,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request identifier, echoed from the request.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Short human-readable error description.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Rejected by a marketplace precondition.
const RPC_REJECTED: i32 = -32000;
/// The requested product does not exist.
const RPC_NOT_FOUND: i32 = -32001;

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /products`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProductRequest {
    /// Account listing the product; becomes its owner.
    pub from: Address,
    /// Display name. Must not be empty.
    pub name: String,
    /// Price in base units. Must not be zero.
    #[serde(with = "agora_protocol::vault::amount")]
    pub price: Amount,
}

/// Body of `POST /products/:id/purchase`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Buying account.
    pub from: Address,
    /// Payment attached to the call, in base units. Must equal the price.
    #[serde(with = "agora_protocol::vault::amount")]
    pub value: Amount,
}

/// Positional amount parameter of a JSON-RPC call, encoded like the amount
/// fields of REST bodies.
#[derive(Debug, Clone, Copy, Deserialize)]
struct RpcAmount(#[serde(with = "agora_protocol::vault::amount")] Amount);

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Marketplace name.
    pub name: String,
    /// Number of products ever listed.
    pub product_count: u64,
    /// Number of accounts with a ledger entry.
    pub accounts: usize,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /accounts/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    /// The account that was looked up.
    pub address: Address,
    /// Native balance in base units.
    #[serde(with = "agora_protocol::vault::amount")]
    pub balance: Amount,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable reason the request failed.
    pub error: String,
    /// Stable error kind, e.g. `already_purchased`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// HTTP status for a failed marketplace call.
fn status_for(err: &MarketError) -> StatusCode {
    match err {
        MarketError::Registry(e) => match e {
            RegistryError::InvalidInput(_) | RegistryError::PaymentMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::AlreadyPurchased { .. }
            | RegistryError::SelfPurchaseForbidden { .. } => StatusCode::CONFLICT,
            RegistryError::TransferFailure(_) => StatusCode::PAYMENT_REQUIRED,
        },
        MarketError::Balance(_) => StatusCode::BAD_REQUEST,
        MarketError::Storage(_) | MarketError::Restore(_) | MarketError::CountMismatch { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: &MarketError) -> Response {
    let body = ErrorResponse {
        error: err.to_string(),
        kind: Some(err.kind().to_string()),
    };
    (status_for(err), Json(body)).into_response()
}

fn rpc_error(err: &MarketError) -> JsonRpcError {
    let code = match err {
        MarketError::Registry(RegistryError::NotFound { .. }) => RPC_NOT_FOUND,
        MarketError::Registry(_) | MarketError::Balance(_) => RPC_REJECTED,
        _ => -32603,
    };
    JsonRpcError {
        code,
        message: err.to_string(),
        data: Some(serde_json::json!({ "kind": err.kind() })),
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Lists a product under the write guard and records the outcome.
async fn execute_create(
    state: &AppState,
    from: Address,
    name: String,
    price: Amount,
) -> Result<ProductCreated, MarketError> {
    let started = Instant::now();
    let result = {
        let mut market = state.market.write().await;
        let result = market.create_product(name, price, from);
        state.metrics.product_count.set(market.product_count() as i64);
        result
    };
    state
        .metrics
        .operation_latency_seconds
        .with_label_values(&["create_product"])
        .observe(started.elapsed().as_secs_f64());

    match &result {
        Ok(created) => {
            state.metrics.products_created_total.inc();
            tracing::debug!(id = created.id, "create served");
        }
        Err(e) => {
            state.metrics.record_rejection(e.kind());
            tracing::debug!(%from, error = %e, "create rejected");
        }
    }
    result
}

/// Buys a product under the write guard and records the outcome.
async fn execute_purchase(
    state: &AppState,
    id: ProductId,
    from: Address,
    value: Amount,
) -> Result<ProductPurchased, MarketError> {
    let started = Instant::now();
    let result = state.market.write().await.purchase_product(id, from, value);
    state
        .metrics
        .operation_latency_seconds
        .with_label_values(&["purchase_product"])
        .observe(started.elapsed().as_secs_f64());

    match &result {
        Ok(purchased) => {
            state.metrics.purchases_total.inc();
            tracing::debug!(id, buyer = %purchased.owner, "purchase served");
        }
        Err(e) => {
            state.metrics.record_rejection(e.kind());
            tracing::debug!(id, %from, error = %e, "purchase rejected");
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: returns node status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let market = state.market.read().await;
    Json(StatusResponse {
        version: state.version.clone(),
        name: market.name().to_string(),
        product_count: market.product_count(),
        accounts: market.ledger().account_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /name`
async fn name_handler(State(state): State<AppState>) -> impl IntoResponse {
    let market = state.market.read().await;
    Json(serde_json::json!({ "name": market.name() }))
}

/// `GET /products/count`
async fn product_count_handler(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.market.read().await.product_count();
    Json(serde_json::json!({ "product_count": count }))
}

/// `GET /products`: every product in id order.
async fn list_products_handler(State(state): State<AppState>) -> impl IntoResponse {
    let market = state.market.read().await;
    let products: Vec<Product> = market.list_products().cloned().collect();
    Json(products)
}

/// `GET /products/:id`: raw lookup.
///
/// Unknown ids answer 200 with the default record (id 0, zero owner), the
/// same thing a caller of `products(id)` sees.
async fn product_handler(
    Path(id): Path<ProductId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let product = state.market.read().await.products(id);
    Json(product)
}

/// `POST /products`: lists a product owned by `from`.
async fn create_product_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateProductRequest>,
) -> Response {
    match execute_create(&state, req.from, req.name, req.price).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /products/:id/purchase`: buys product `id` for `from`.
async fn purchase_product_handler(
    Path(id): Path<ProductId>,
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Response {
    match execute_purchase(&state, id, req.from, req.value).await {
        Ok(purchased) => (StatusCode::OK, Json(purchased)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /accounts/:address`: native balance. Unknown accounts read as zero.
async fn account_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let address: Address = match address.parse() {
        Ok(a) => a,
        Err(e) => {
            let err = ErrorResponse {
                error: format!("invalid address: {}", e),
                kind: None,
            };
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };
    let balance = state.market.read().await.balance_of(&address);
    Json(AccountResponse { address, balance }).into_response()
}

/// `POST /rpc`: JSON-RPC 2.0 gateway.
///
/// Routes method calls to internal handlers. Unknown methods return
/// error code -32601 (Method not found).
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError::new(
                -32600,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            id: req.id,
        });
    }

    let (result, error) = match dispatch_rpc(&state, &req.method, req.params).await {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e)),
    };
    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

async fn dispatch_rpc(
    state: &AppState,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, JsonRpcError> {
    match method {
        "market_name" => {
            let market = state.market.read().await;
            Ok(serde_json::json!(market.name()))
        }
        "market_productCount" => {
            let market = state.market.read().await;
            Ok(serde_json::json!(market.product_count()))
        }
        "market_products" => {
            let (id,): (ProductId,) = parse_params(params, "[id]")?;
            let product = state.market.read().await.products(id);
            to_rpc_value(&product)
        }
        "market_createProduct" => {
            let (from, name, RpcAmount(price)): (Address, String, RpcAmount) =
                parse_params(params, "[from, name, price]")?;
            let created = execute_create(state, from, name, price)
                .await
                .map_err(|e| rpc_error(&e))?;
            to_rpc_value(&created)
        }
        "market_purchaseProduct" => {
            let (from, id, RpcAmount(value)): (Address, ProductId, RpcAmount) =
                parse_params(params, "[from, id, value]")?;
            let purchased = execute_purchase(state, id, from, value)
                .await
                .map_err(|e| rpc_error(&e))?;
            to_rpc_value(&purchased)
        }
        "market_getBalance" => {
            let (address,): (Address,) = parse_params(params, "[address]")?;
            let balance = state.market.read().await.balance_of(&address);
            Ok(serde_json::Value::String(balance.to_string()))
        }
        _ => Err(JsonRpcError::new(
            -32601,
            format!("Method not found: {}", method),
        )),
    }
}

/// Decodes positional params into a tuple.
fn parse_params<T: DeserializeOwned>(
    params: Option<serde_json::Value>,
    expected: &str,
) -> Result<T, JsonRpcError> {
    let params = params.unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
    serde_json::from_value(params).map_err(|e| {
        JsonRpcError::new(-32602, format!("Invalid params: expected {}: {}", expected, e))
    })
}

fn to_rpc_value<T: Serialize>(value: &T) -> Result<serde_json::Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(-32603, format!("Internal error: {}", e)))
}

/// `GET /ws`: WebSocket upgrade for live event streaming.
///
/// Clients receive JSON-encoded [`MarketEvent`] messages for each committed
/// listing and sale. The connection is read-only from the server's
/// perspective; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
