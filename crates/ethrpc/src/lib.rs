pub mod block_range;
pub mod retry;

use {
    alloy::providers::{DynProvider, Provider, ProviderBuilder},
    anyhow::{Context, Result},
    std::{
        collections::HashMap,
        sync::Mutex,
        time::Duration,
    },
    url::Url,
};

pub use retry::{Retryable, RetryConfig, with_retry};

pub type AlloyProvider = DynProvider;

/// Process-wide cache of one provider per chain, created lazily on first
/// use. Cloning is cheap; all clones share the cache.
pub struct RpcPool {
    urls: HashMap<u64, Url>,
    providers: Mutex<HashMap<u64, DynProvider>>,
}

impl RpcPool {
    pub fn new(urls: HashMap<u64, Url>) -> Self {
        Self {
            urls,
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self, chain_id: u64) -> Result<DynProvider> {
        let mut providers = self.providers.lock().unwrap();
        if let Some(provider) = providers.get(&chain_id) {
            return Ok(provider.clone());
        }
        let url = self
            .urls
            .get(&chain_id)
            .with_context(|| format!("no rpc url configured for chain {chain_id}"))?;
        let provider = ProviderBuilder::new().connect_http(url.clone()).erased();
        providers.insert(chain_id, provider.clone());
        Ok(provider)
    }

    /// Chain-head probe used at fleet launch: one retry with a 2s backoff,
    /// persistent failure bubbles up so the caller can report `rpc_failed`
    /// without launching.
    pub async fn current_block(&self, chain_id: u64) -> Result<u64> {
        let provider = self.provider(chain_id)?;
        match provider.get_block_number().await {
            Ok(block) => Ok(block),
            Err(err) => {
                tracing::warn!(chain_id, ?err, "chain head probe failed, retrying once");
                tokio::time::sleep(Duration::from_secs(2)).await;
                provider
                    .get_block_number()
                    .await
                    .with_context(|| format!("chain head probe failed for chain {chain_id}"))
            }
        }
    }
}
