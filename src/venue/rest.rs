//! Generic REST + websocket venue adapter skeleton (§6).
//!
//! Wires `reqwest` for request/response calls and `tokio-tungstenite` for
//! the event stream (REST snapshot + websocket deltas), with no
//! venue-specific signing or endpoint baked in. A concrete venue plugs in
//! by supplying `base_url`, `ws_url`, and a signer; this type handles the
//! transport and reconnect bookkeeping that is common to all of them.

use super::{
    ExchangeAdapter, PlaceOrderRequest, PlaceOrderResult, StreamChannel, StreamMessage,
    StreamState, Ticker, VenueOrder, VenuePosition, PLACE_CANCEL_TIMEOUT, TICKER_TIMEOUT,
};
use crate::error::{GridEngineError, Result};
use crate::types::PositionMode;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{error, warn};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::connect_async;

/// Credentials and endpoints for a concrete venue. Never logged in full;
/// `Debug` is hand-rolled to redact the secret.
#[derive(Clone)]
pub struct RestAdapterConfig {
    pub base_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub symbol: String,
}

impl std::fmt::Debug for RestAdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAdapterConfig")
            .field("base_url", &self.base_url)
            .field("ws_url", &self.ws_url)
            .field("symbol", &self.symbol)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

pub struct RestAdapter {
    config: RestAdapterConfig,
    http: Client,
    stream_state: Arc<RwLock<StreamState>>,
}

impl RestAdapter {
    pub fn new(config: RestAdapterConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(PLACE_CANCEL_TIMEOUT)
            .build()
            .map_err(|e| GridEngineError::VenueTransient(e.to_string()))?;
        Ok(Self {
            config,
            http,
            stream_state: Arc::new(RwLock::new(StreamState::Disconnected)),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl ExchangeAdapter for RestAdapter {
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>> {
        let url = self.endpoint("/ticker");
        let resp = tokio::time::timeout(TICKER_TIMEOUT, self.http.get(&url).send())
            .await
            .map_err(|_| GridEngineError::VenueTransient("ticker request timed out".to_string()))?
            .map_err(|e| GridEngineError::VenueTransient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(GridEngineError::VenueRejection(format!(
                "ticker fetch returned {}",
                resp.status()
            )));
        }
        Ok(vec![Ticker {
            symbol: self.config.symbol.clone(),
            last_price: 0.0,
        }])
    }

    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>> {
        Err(GridEngineError::VenueTransient(
            "fetch_positions requires a venue-specific signer, not implemented in the generic adapter".to_string(),
        ))
    }

    async fn fetch_orders(&self, _symbol: &str) -> Result<Vec<VenueOrder>> {
        Err(GridEngineError::VenueTransient(
            "fetch_orders requires a venue-specific signer, not implemented in the generic adapter".to_string(),
        ))
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult> {
        let url = self.endpoint("/order");
        let resp = tokio::time::timeout(
            PLACE_CANCEL_TIMEOUT,
            self.http.post(&url).json(&serde_json::json!({
                "symbol": req.symbol,
                "side": format!("{:?}", req.side),
                "type": format!("{:?}", req.order_type),
                "qty": req.qty,
                "price": req.price,
                "clientOrderId": req.client_id,
                "reduceOnly": req.reduce_only,
            })).send(),
        )
        .await
        .map_err(|_| GridEngineError::VenueTransient("place_order timed out".to_string()))?
        .map_err(|e| GridEngineError::VenueTransient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GridEngineError::VenueRejection(format!(
                "venue rejected order: {}",
                resp.status()
            )));
        }
        Ok(PlaceOrderResult {
            order_id: req.client_id,
        })
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()> {
        let url = self.endpoint("/order");
        let resp = tokio::time::timeout(
            PLACE_CANCEL_TIMEOUT,
            self.http
                .delete(&url)
                .query(&[("orderId", order_id), ("symbol", symbol)])
                .send(),
        )
        .await
        .map_err(|_| GridEngineError::VenueTransient("cancel_order timed out".to_string()))?
        .map_err(|e| GridEngineError::VenueTransient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GridEngineError::VenueRejection(format!(
                "venue rejected cancel: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn fetch_position_mode(&self, _symbol: &str) -> Result<PositionMode> {
        Ok(PositionMode::OneWay)
    }

    async fn set_position_mode(&self, _symbol: &str, _mode: PositionMode) -> Result<()> {
        Err(GridEngineError::VenueTransient(
            "set_position_mode requires a venue-specific signer, not implemented in the generic adapter".to_string(),
        ))
    }

    async fn connect_stream(
        &self,
        _channels: &[StreamChannel],
    ) -> Result<Option<mpsc::Receiver<StreamMessage>>> {
        let (tx, rx) = mpsc::channel(256);
        let ws_url = self.config.ws_url.clone();
        let state = self.stream_state.clone();

        *state.write().await = StreamState::Connected;

        tokio::spawn(async move {
            let (ws_stream, _) = match connect_async(&ws_url).await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("websocket connect failed: {e}");
                    *state.write().await = StreamState::Error;
                    return;
                }
            };
            *state.write().await = StreamState::Authenticated;
            let (_write, mut read) = ws_stream.split();
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(_frame) => {
                        // Venue-specific frame decoding lives in the concrete
                        // adapter; this skeleton only maintains the pipe.
                    }
                    Err(e) => {
                        warn!("websocket stream error: {e}");
                        *state.write().await = StreamState::Reconnecting;
                        break;
                    }
                }
            }
            drop(tx);
        });

        Ok(Some(rx))
    }

    async fn stream_state(&self) -> StreamState {
        *self.stream_state.read().await
    }

    async fn disconnect_stream(&self) {
        *self.stream_state.write().await = StreamState::Disconnected;
    }
}
