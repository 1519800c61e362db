//! Wiring of the fetch stack from settings.

use anyhow::Result;
use fundwatch_fetch::{
    CachingHttpGateway, ChromiumBackend, FallbackBrowserFetcher, FallbackConfig, GatewayConfig,
    RecoveryCoordinator, RecoveryPolicy, Remediate, ResponseCache, SessionRegistry,
};
use fundwatch_modian::{ClientConfig, Identity, ProjectFetcher, SignedRequestClient};
use fundwatch_store::Settings;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info, warn};

/// Gateway, client, recovery layer and fetcher built from one settings value.
pub struct Services {
    pub settings: Settings,
    pub gateway: Arc<CachingHttpGateway>,
    pub client: Arc<SignedRequestClient>,
    pub recovery: Arc<RecoveryCoordinator>,
    pub fetcher: Arc<ProjectFetcher>,
    pub stop: Arc<AtomicBool>,
}

impl Services {
    /// Builds the stack. The browser fallback is attached only when enabled
    /// in settings, allowed by the caller and a Chromium binary is found.
    pub fn build(settings: Settings, allow_browser: bool) -> Result<Self> {
        let gateway_config = GatewayConfig::default()
            .with_timeout(settings.request_timeout())
            .with_cache_max_age(settings.cache_max_age());

        let gateway = match ResponseCache::open(&settings.cache_db_path(), settings.cache_max_bytes()) {
            Ok(cache) => CachingHttpGateway::with_cache(gateway_config, cache)?,
            Err(e) => {
                warn!(error = %e, "Response cache unavailable, continuing without it");
                CachingHttpGateway::new(gateway_config)?
            }
        };
        let gateway = Arc::new(gateway);

        let client = Arc::new(SignedRequestClient::new(
            Arc::clone(&gateway),
            ClientConfig::default(),
        ));
        let recovery = Arc::new(
            RecoveryCoordinator::new(RecoveryPolicy::default())
                .with_remediator(Arc::clone(&gateway) as Arc<dyn Remediate>),
        );

        let stop = Arc::new(AtomicBool::new(false));
        let mut fetcher: ProjectFetcher = ProjectFetcher::new(Arc::clone(&client), Arc::clone(&recovery));

        if settings.browser_fallback && allow_browser {
            match ChromiumBackend::detect() {
                Ok(backend) => {
                    info!(executable = %backend.executable().display(), "Browser fallback enabled");
                    let registry = Arc::new(SessionRegistry::new(Arc::new(backend)));
                    let config = FallbackConfig::default().with_attempts(settings.browser_attempts);
                    let fallback = FallbackBrowserFetcher::new(registry, config)
                        .with_stop_flag(Arc::clone(&stop));
                    fetcher = fetcher.with_fallback(Arc::new(fallback));
                }
                Err(e) => warn!(error = %e, "Browser fallback disabled"),
            }
        } else {
            debug!("Browser fallback not requested");
        }

        Ok(Self {
            settings,
            gateway,
            client,
            recovery,
            fetcher: Arc::new(fetcher),
            stop,
        })
    }

    /// Identity from settings, if any part of it is configured.
    pub fn identity(&self) -> Option<Identity> {
        let identity = Identity {
            token: self.settings.user_token.clone(),
            user_id: self.settings.user_id.clone(),
        };
        (!identity.is_empty()).then_some(identity)
    }
}
