use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use arbor_data::shared::subscription_models::VenueId;
use arbor_main::config::Config;
use arbor_main::engine::{error::EngineError, Engine};
use arbor_main::trader::ArbTrader;
use arbor_oms::event::EventTx;
use arbor_oms::exchange::simulated::SimulatedVenue;
use arbor_oms::exchange::{DriverFactory, DriverRegistry, VenueCredentials, VenueDriver};
use arbor_oms::gateway::VenueGateway;
use arbor_oms::ledger::{LedgerConfig, TradeLedger};
use arbor_oms::rate_limit::{RateLimitConfig, RateLimiter};

/*----- */
// Main
/*----- */
#[tokio::main]
pub async fn main() {
    // Initialise logging
    init_logging();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(config_error) => {
            error!(error = %config_error, message = "invalid configuration");
            std::process::exit(1);
        }
    };
    config.flush_warnings();

    if let Err(engine_error) = run(config).await {
        error!(error = %engine_error, message = "engine terminated with a fatal error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), EngineError> {
    let engine_id = Uuid::new_v4();

    /*----- Rate limiter, with per-venue overrides from the environment ----- */
    let mut rate_limiter = RateLimiter::new(RateLimitConfig::default());
    for venue in config.enabled_venues.iter() {
        if let Some(venue_config) = config.rate_limit_config(venue) {
            rate_limiter =
                rate_limiter.with_venue_config(VenueId::new(venue.clone()), venue_config);
        }
    }
    let rate_limiter = Arc::new(rate_limiter);

    /*----- Event channel ----- */
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let event_tx = EventTx::new(event_tx);

    /*----- Gateway + venues. Partial init failures are tolerated ----- */
    let gateway = Arc::new(VenueGateway::new(
        config.gateway_config(),
        Arc::clone(&rate_limiter),
        event_tx.clone(),
    ));

    let registry = default_registry();
    let mut initialised = 0usize;
    for venue in config.enabled_venues.iter() {
        let settings = config.venue_settings.get(venue).cloned().unwrap_or_default();
        let credentials = VenueCredentials {
            api_key: settings.api_key,
            secret: settings.secret,
            password: settings.password,
        };

        let driver = match registry.build(venue, &credentials) {
            Ok(driver) => driver,
            Err(build_error) if config.test_mode => {
                warn!(
                    venue = %venue,
                    error = %build_error,
                    message = "no driver registered, substituting simulated venue in test mode"
                );
                Arc::new(SimulatedVenue::new(VenueId::new(venue.clone()))) as Arc<dyn VenueDriver>
            }
            Err(build_error) => {
                warn!(
                    venue = %venue,
                    error = %build_error,
                    message = "venue excluded, no driver available"
                );
                continue;
            }
        };

        match gateway.add_venue(driver).await {
            Ok(()) => initialised += 1,
            Err(add_error) => warn!(
                venue = %venue,
                error = %add_error,
                message = "venue initialisation failed, continuing without it"
            ),
        }
    }
    if initialised == 0 && !config.enabled_venues.is_empty() {
        return Err(EngineError::NoVenuesAvailable);
    }

    /*----- Ledger ----- */
    let ledger = Arc::new(TradeLedger::open(LedgerConfig::default())?);

    /*----- Trader ----- */
    let trader = Arc::new(ArbTrader::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        config.trader_config(),
        config.symbols.clone(),
        event_tx.clone(),
    ));

    /*----- Engine ----- */
    let (_command_tx, command_rx) = mpsc::channel(8);
    let engine = Engine::builder()
        .engine_id(engine_id)
        .config(config)
        .gateway(gateway)
        .ledger(ledger)
        .trader(trader)
        .event_rx(event_rx)
        .command_rx(command_rx)
        .build()?;

    engine.run().await
}

/*----- */
// Driver registry
/*----- */
// Concrete venue adapters register here. The simulated driver ships built
// in; real drivers are expected to be added by the deployment.
fn default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();

    let simulated: DriverFactory =
        Arc::new(|venue: &VenueId, _credentials: &VenueCredentials| {
            Ok(Arc::new(SimulatedVenue::new(venue.clone())) as Arc<dyn VenueDriver>)
        });
    registry.register("simulated", Arc::clone(&simulated));
    registry.register("sim", simulated);

    registry
}

/*----- */
// Logging config
/*----- */
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions))
        // Enable Json formatting
        .json()
        // Install this Tracing subscriber as global default
        .init()
}
