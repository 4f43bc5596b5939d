//! Execution Core entrypoint: wires venue adapters, the feed/EVM
//! collaborators, and the engine's ambient services (heartbeat, trigger
//! sweep, auto-redeemer) from environment configuration, then idles until
//! interrupted. Strategy logic is a caller concern — this binary only proves
//! the engine boots and tears down cleanly.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use prophet_exec_core::config::EngineConfig;
use prophet_exec_core::evm::{ContractCall, EvmProvider, TxResult};
use prophet_exec_core::execution::fills::{FillTracker, FillsWsConfig};
use prophet_exec_core::execution::heartbeat::HeartbeatService;
use prophet_exec_core::execution::settlement::SettlementService;
use prophet_exec_core::execution::Execution;
use prophet_exec_core::feed::{FeedProvider, PriceSubscriptionHandle};
use prophet_exec_core::redeemer::{AutoRedeemer, Position, PositionsProvider, RedeemerConfig};
use prophet_exec_core::signer::OrderSigner;
use prophet_exec_core::trigger::TriggerRegistry;
use prophet_exec_core::types::{Orderbook, Venue};
use prophet_exec_core::venues::exchange::{ExchangeAdapter, ExchangeAdapterConfig};
use prophet_exec_core::venues::negrisk::{NegRiskAdapter, NegRiskAdapterConfig};
use prophet_exec_core::venues::primary::{PrimaryAdapter, PrimaryAdapterConfig};
use prophet_exec_core::venues::VenueAdapter;

/// Thin REST-backed [`FeedProvider`]; the core never links against this —
/// it lives in the binary because a real feed transport is an external
/// collaborator the spec keeps out of the engine (spec §6).
struct RestFeed {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl FeedProvider for RestFeed {
    async fn get_orderbook(&self, venue: Venue, market: &str) -> Option<Orderbook> {
        let url = format!("{}/orderbook/{:?}/{}", self.base_url, venue, market);
        self.client.get(url).send().await.ok()?.json().await.ok()
    }

    async fn get_price(&self, venue: Venue, market: &str) -> Option<Decimal> {
        let mid = self.get_orderbook(venue, market).await.and_then(|ob| ob.best_bid().or_else(|| ob.best_ask()))?;
        Decimal::try_from(mid).ok()
    }

    fn subscribe_price(&self, _venue: Venue, _market: &str, _cb: Box<dyn Fn(f64) + Send + Sync>) -> PriceSubscriptionHandle {
        warn!("RestFeed has no push transport; subscribe_price is a no-op stub");
        PriceSubscriptionHandle::new(|| {})
    }
}

/// Thin REST-backed [`EvmProvider`] delegating to a JSON-RPC relay; real
/// signing/broadcast is out of scope for the engine itself (spec §6).
struct RestEvm {
    client: reqwest::Client,
    rpc_url: String,
}

#[async_trait]
impl EvmProvider for RestEvm {
    async fn call_contract(&self, call: ContractCall) -> anyhow::Result<serde_json::Value> {
        let resp = self.client.post(&self.rpc_url).json(&serde_json::json!({
            "chain": call.chain,
            "address": call.address,
            "method": call.method,
            "args": call.args,
        })).send().await?;
        Ok(resp.json().await?)
    }

    async fn write_contract(&self, call: ContractCall) -> anyhow::Result<TxResult> {
        let resp = self.client.post(format!("{}/write", self.rpc_url)).json(&serde_json::json!({
            "chain": call.chain,
            "address": call.address,
            "method": call.method,
            "args": call.args,
        })).send().await?;
        Ok(resp.json().await?)
    }

    async fn usdc_allowance(&self, owner: &str, spender: &str) -> anyhow::Result<Decimal> {
        let resp = self.client.get(format!("{}/usdc-allowance", self.rpc_url))
            .query(&[("owner", owner), ("spender", spender)])
            .send()
            .await?;
        let value: serde_json::Value = resp.json().await?;
        value.as_str().and_then(|s| s.parse().ok()).context("malformed allowance response")
    }
}

struct RestPositions {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl PositionsProvider for RestPositions {
    async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        let resp = self.client.get(format!("{}/positions", self.base_url)).send().await?;
        let rows: Vec<serde_json::Value> = resp.json().await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let condition_id = row.get("condition_id")?.as_str()?.to_string();
                let token_id = row.get("token_id")?.as_str()?.to_string();
                let size = row.get("size")?.as_str().and_then(|s| s.parse::<Decimal>().ok())?;
                let neg_risk = row.get("neg_risk").and_then(|v| v.as_bool()).unwrap_or(false);
                Some(Position { condition_id, token_id, size, neg_risk })
            })
            .collect())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn build_primary_adapter() -> Option<PrimaryAdapter> {
    let pk = env::var("PRIMARY_PRIVATE_KEY").ok()?;
    let signer = PrivateKeySigner::from_str(&pk).ok()?;
    let cfg = PrimaryAdapterConfig {
        base_url: env_or("PRIMARY_BASE_URL", "https://primary.invalid"),
        api_key: env::var("PRIMARY_API_KEY").unwrap_or_default(),
        maker: Address::from_str(&env::var("PRIMARY_MAKER_ADDRESS").ok()?).ok()?,
        operator: Address::from_str(&env::var("PRIMARY_OPERATOR_ADDRESS").ok()?).ok()?,
        exchange_address: Address::from_str(&env::var("PRIMARY_EXCHANGE_ADDRESS").ok()?).ok()?,
        neg_risk_exchange_address: Address::from_str(&env::var("PRIMARY_NEG_RISK_EXCHANGE_ADDRESS").ok()?).ok()?,
    };
    Some(PrimaryAdapter::new(cfg, OrderSigner::new(signer)))
}

fn build_exchange_adapter() -> Option<ExchangeAdapter> {
    let cfg = ExchangeAdapterConfig {
        base_url: env_or("EXCHANGE_BASE_URL", "https://exchange.invalid"),
        api_key: env::var("EXCHANGE_API_KEY").ok()?,
        api_secret: env::var("EXCHANGE_API_SECRET").ok()?,
    };
    Some(ExchangeAdapter::new(cfg))
}

fn build_negrisk_adapter() -> Option<NegRiskAdapter> {
    let pk = env::var("NEG_RISK_PRIVATE_KEY").ok()?;
    let signer = PrivateKeySigner::from_str(&pk).ok()?;
    let cfg = NegRiskAdapterConfig {
        base_url: env_or("NEG_RISK_BASE_URL", "https://negrisk.invalid"),
        api_key: env::var("NEG_RISK_API_KEY").unwrap_or_default(),
        maker: Address::from_str(&env::var("NEG_RISK_MAKER_ADDRESS").ok()?).ok()?,
        operator: Address::from_str(&env::var("NEG_RISK_OPERATOR_ADDRESS").ok()?).ok()?,
        exchange_address: Address::from_str(&env::var("NEG_RISK_EXCHANGE_ADDRESS").ok()?).ok()?,
    };
    Some(NegRiskAdapter::new(cfg, OrderSigner::new(signer)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(env_or("RUST_LOG", "info"))
        .init();

    let engine_cfg = EngineConfig::from_env();
    info!(dry_run = engine_cfg.dry_run, "starting execution core");

    let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
    match build_primary_adapter() {
        Some(adapter) => {
            adapters.insert(Venue::Primary, Arc::new(adapter));
            info!("primary venue adapter registered");
        }
        None => warn!("PRIMARY_PRIVATE_KEY/addresses not set, primary venue disabled"),
    }
    match build_exchange_adapter() {
        Some(adapter) => {
            adapters.insert(Venue::Exchange, Arc::new(adapter));
            info!("exchange venue adapter registered");
        }
        None => warn!("EXCHANGE_API_KEY/SECRET not set, exchange venue disabled"),
    }
    match build_negrisk_adapter() {
        Some(adapter) => {
            adapters.insert(Venue::NegRiskYield, Arc::new(adapter));
            info!("neg-risk venue adapter registered");
        }
        None => warn!("NEG_RISK_PRIVATE_KEY/addresses not set, neg-risk venue disabled"),
    }
    if adapters.is_empty() {
        warn!("no venue adapters configured; engine will reject every order as unregistered");
    }

    let feed: Arc<dyn FeedProvider> = Arc::new(RestFeed {
        client: reqwest::Client::new(),
        base_url: env_or("FEED_BASE_URL", "https://feed.invalid"),
    });
    let evm: Arc<dyn EvmProvider> = Arc::new(RestEvm {
        client: reqwest::Client::new(),
        rpc_url: env_or("EVM_RPC_RELAY_URL", "https://rpc-relay.invalid"),
    });

    let fills = FillTracker::new(FillsWsConfig {
        ws_url: env_or("PRIMARY_FILLS_WS_URL", "wss://primary.invalid/ws/fills"),
        api_key: env::var("PRIMARY_API_KEY").unwrap_or_default(),
        api_secret: env::var("PRIMARY_API_SECRET").unwrap_or_default(),
        api_passphrase: env::var("PRIMARY_API_PASSPHRASE").unwrap_or_default(),
    });
    let heartbeat = HeartbeatService::new(
        env_or("PRIMARY_BASE_URL", "https://primary.invalid"),
        Duration::from_millis(engine_cfg.heartbeat_interval_ms),
    );
    let settlement = SettlementService::new(evm.clone(), env_or("SETTLEMENT_SPENDER_ADDRESS", "0x0"));

    let execution = Arc::new(Execution::new(adapters, engine_cfg.clone(), feed, fills, heartbeat, settlement));

    if let Err(e) = execution.start_heartbeat().await {
        warn!(error = %e, "heartbeat did not start");
    }

    let triggers = TriggerRegistry::new();
    triggers.start_sweep(Duration::from_millis(engine_cfg.trigger_sweep_interval_ms)).await;

    if let Ok(positions_url) = env::var("POSITIONS_BASE_URL") {
        let positions: Arc<dyn PositionsProvider> = Arc::new(RestPositions {
            client: reqwest::Client::new(),
            base_url: positions_url,
        });
        let redeemer = AutoRedeemer::new(
            positions,
            evm,
            RedeemerConfig {
                ctf_address: env_or("CTF_ADDRESS", "0x0"),
                neg_risk_adapter_address: env_or("NEG_RISK_ADAPTER_ADDRESS", "0x0"),
                owner_address: env_or("SETTLEMENT_OWNER_ADDRESS", "0x0"),
                sweep_interval: Duration::from_millis(engine_cfg.redeemer_sweep_interval_ms),
            },
        );
        redeemer.start().await;
        info!("auto-redeemer started");
    } else {
        info!("POSITIONS_BASE_URL not set, auto-redeemer disabled");
    }

    info!("execution core ready");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping heartbeat");
    execution.stop_heartbeat().await;
    triggers.stop_sweep().await;

    Ok(())
}
