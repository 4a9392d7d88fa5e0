//! Live `ExchangeGateway` backed by a generic HMAC-authenticated REST venue
//! (BitMEX/Binance-Futures shaped). Every call signs verb+path+expires per
//! `signing::sign_request` and attaches it as a header triplet, matching the
//! venue's re-auth-on-reconnect requirement from the gateway contract.

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::gateway::{
    ExchangeGateway, PlaceOrderOptions, PositionSnapshot, RemoteOrder, Side, Trade,
};
use crate::instrument::Instrument;
use crate::signing::{expires_in, sign_request};

pub struct HttpGateway {
    base_url: String,
    api_key: String,
    api_secret: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            base_url,
            api_key,
            api_secret,
            client: reqwest::Client::new(),
        }
    }

    fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let expires = expires_in(10);
        let signature = sign_request(&self.api_secret, method.as_str(), path, expires);
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("api-key", &self.api_key)
            .header("api-expires", expires.to_string())
            .header("api-signature", signature)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(GatewayError::RateLimited);
        }
        if resp.status().is_server_error() {
            return Err(GatewayError::Transient(format!("server error {}", resp.status())));
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Validation(body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))
    }
}

#[async_trait]
impl ExchangeGateway for HttpGateway {
    async fn get_instrument(&self, symbol: &str) -> Result<Instrument, GatewayError> {
        let path = format!("/instrument?symbol={}", symbol);
        self.send_json(self.signed_request(reqwest::Method::GET, &path)).await
    }

    async fn get_active_instruments(&self) -> Result<Vec<Instrument>, GatewayError> {
        self.send_json(self.signed_request(reqwest::Method::GET, "/instrument/active"))
            .await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError> {
        let path = format!("/order?symbol={}&filter=open", symbol);
        self.send_json(self.signed_request(reqwest::Method::GET, &path)).await
    }

    async fn get_recent_filled_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError> {
        let path = format!("/order?symbol={}&filter=filled", symbol);
        self.send_json(self.signed_request(reqwest::Method::GET, &path)).await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
        options: PlaceOrderOptions,
    ) -> Result<RemoteOrder, GatewayError> {
        let body = serde_json::json!({
            "symbol": symbol,
            "side": match side { Side::Buy => "Buy", Side::Sell => "Sell" },
            "price": price,
            "orderQty": qty,
            "ordType": "Limit",
            "execInst": if options.participate_do_not_initiate { "ParticipateDoNotInitiate" } else { "" },
        });
        let builder = self
            .signed_request(reqwest::Method::POST, "/order")
            .json(&body);
        self.send_json(builder).await
    }

    async fn cancel_order(&self, _symbol: &str, remote_id: &str) -> Result<RemoteOrder, GatewayError> {
        let path = "/order";
        let body = serde_json::json!({ "orderID": remote_id });
        let builder = self
            .signed_request(reqwest::Method::DELETE, path)
            .json(&body);
        self.send_json(builder).await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError> {
        let path = "/order/all";
        let body = serde_json::json!({ "symbol": symbol });
        let builder = self
            .signed_request(reqwest::Method::DELETE, path)
            .json(&body);
        self.send_json(builder).await
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, GatewayError> {
        let path = format!("/position?symbol={}", symbol);
        let positions: Vec<PositionSnapshot> =
            self.send_json(self.signed_request(reqwest::Method::GET, &path)).await?;
        Ok(positions.into_iter().next())
    }

    async fn get_historical_trades(
        &self,
        symbol: &str,
        lookback_minutes: u32,
        limit: usize,
    ) -> Result<Vec<Trade>, GatewayError> {
        let path = format!(
            "/trade?symbol={}&count={}&lookbackMinutes={}",
            symbol, limit, lookback_minutes
        );
        self.send_json(self.signed_request(reqwest::Method::GET, &path)).await
    }
}

