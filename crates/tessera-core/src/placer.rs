//! Placer supervisor
//!
//! Wires the canvas store, account pool, canvas sync and dispatcher together
//! and owns the periodic drivers:
//!
//! | driver   | default period | work                                   |
//! |----------|----------------|----------------------------------------|
//! | dispatch | 8 s            | diff every live canvas, dispatch batch |
//! | refresh  | 20 min         | re-login every identity                |
//! | resync   | 3 min          | rebuild every subscription             |
//! | report   | 20 s           | log a [`StatusReport`]                 |
//!
//! [`Placer::run`] blocks until the shutdown future resolves or a
//! subscription raises a fatal signal, then stops the drivers, closes the
//! subscriptions and drains in-flight placements.

use crate::account::AccountPool;
use crate::dispatch::Dispatcher;
use crate::error::PlacerError;
use crate::ports::Services;
use crate::report::StatusReport;
use crate::scheduler::DiffScheduler;
use crate::sync::{CanvasSync, FatalSignal, SubscriptionState};
use crate::types::{Credentials, PlacerConfig};
use chrono::Utc;
use rand::seq::SliceRandom;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tessera_canvas::{CanvasError, CanvasId, CanvasStore, TargetSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

struct Shared {
    config: PlacerConfig,
    targets: TargetSet,
    store: Arc<CanvasStore>,
    pool: Arc<AccountPool>,
    sync: CanvasSync,
    dispatcher: Dispatcher,
    services: Services,
}

impl Shared {
    fn tick(&self) -> usize {
        let mut accounts = self.pool.available(Utc::now());
        let mut rng = rand::rng();
        let plan = DiffScheduler::plan(
            &self.store,
            &self.targets,
            |canvas| self.sync.is_live(canvas),
            accounts.len(),
            &mut rng,
        );
        if plan.is_empty() {
            tracing::debug!(available = plan.available, "nothing to dispatch");
            return 0;
        }

        accounts.shuffle(&mut rng);
        let submitted = self.dispatcher.dispatch(plan.batch, &accounts);
        tracing::info!(
            candidates = plan.candidates,
            available = plan.available,
            submitted,
            "dispatched placements"
        );
        submitted
    }

    async fn refresh(&self) {
        self.pool.refresh_all(self.services.auth.as_ref()).await;
    }

    fn resync(&self) {
        let tokens = self
            .pool
            .subscription_tokens(usize::from(self.config.canvas_count));
        self.sync.resync(&tokens);
    }

    fn report(&self) -> StatusReport {
        let report = StatusReport::collect(&self.store, &self.targets, self.pool.stats(Utc::now()));
        report.log();
        report
    }
}

/// Top-level supervisor
pub struct Placer {
    shared: Arc<Shared>,
    fatal_rx: mpsc::UnboundedReceiver<FatalSignal>,
}

impl std::fmt::Debug for Placer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Placer")
            .field("config", &self.shared.config)
            .field("accounts", &self.shared.pool.len())
            .finish_non_exhaustive()
    }
}

impl Placer {
    /// Seed the account pool and open the first subscriptions
    ///
    /// # Errors
    /// - `PlacerError::Config` if the configuration is out of range
    /// - `PlacerError::Canvas` if a target does not have the configured shape
    /// - `PlacerError::NoIdentities` if no identity could be logged in
    pub async fn start(
        config: PlacerConfig,
        targets: TargetSet,
        credentials: Vec<Credentials>,
        services: Services,
    ) -> Result<Self, PlacerError> {
        config.validate()?;
        check_target_shapes(&config, &targets)?;

        let (width, height) = config.dimensions();
        let store = Arc::new(CanvasStore::new(config.canvases()).with_dimensions(width, height));
        let pool = Arc::new(AccountPool::new(credentials, config.jitter));
        pool.seed(services.auth.as_ref(), services.placement.as_ref())
            .await;

        let stats = pool.stats(Utc::now());
        if stats.total == stats.disabled {
            return Err(PlacerError::NoIdentities { total: stats.total });
        }

        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let sync = CanvasSync::new(
            Arc::clone(&store),
            Arc::clone(&services.fetcher),
            Arc::clone(&services.connector),
            fatal_tx,
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&services.placement),
            Arc::clone(&pool),
            config.max_in_flight,
        );

        let shared = Shared {
            config,
            targets,
            store,
            pool,
            sync,
            dispatcher,
            services,
        };
        shared.resync();

        Ok(Self {
            shared: Arc::new(shared),
            fatal_rx,
        })
    }

    /// Run one dispatch cycle; returns the number of placements submitted
    pub fn tick(&self) -> usize {
        self.shared.tick()
    }

    /// Re-login every identity
    pub async fn refresh(&self) {
        self.shared.refresh().await;
    }

    /// Rebuild every subscription
    pub fn resync(&self) {
        self.shared.resync();
    }

    /// Collect and log a status report
    pub fn report(&self) -> StatusReport {
        self.shared.report()
    }

    /// Wait for every submitted placement to finish
    pub async fn drain(&self) {
        self.shared.dispatcher.drain().await;
    }

    /// Account pool
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.shared.pool
    }

    /// Canvas store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<CanvasStore> {
        &self.shared.store
    }

    /// Subscription state of one canvas
    #[inline]
    #[must_use]
    pub fn subscription_state(&self, canvas: CanvasId) -> SubscriptionState {
        self.shared.sync.state(canvas)
    }

    /// Drive the placer until `shutdown` resolves or a subscription is
    /// rejected, then shut down in order
    ///
    /// # Errors
    /// - `PlacerError::FatalChannelAuth` if a subscription rejected its token
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<(), PlacerError> {
        let Self {
            shared,
            mut fatal_rx,
        } = self;
        let intervals = shared.config.intervals;

        let drivers = [
            spawn_driver("dispatch", intervals.dispatch(), Arc::clone(&shared), |s| async move {
                s.tick();
            }),
            spawn_driver("refresh", intervals.refresh(), Arc::clone(&shared), |s| async move {
                s.refresh().await;
            }),
            spawn_driver("resync", intervals.resync(), Arc::clone(&shared), |s| async move {
                s.resync();
            }),
            spawn_driver("report", intervals.report(), Arc::clone(&shared), |s| async move {
                s.report();
            }),
        ];
        tracing::info!("placer running");

        let result = tokio::select! {
            () = shutdown => {
                tracing::info!("shutdown requested");
                Ok(())
            }
            Some(FatalSignal { canvas, reason }) = fatal_rx.recv() => {
                Err(PlacerError::FatalChannelAuth { canvas, reason })
            }
        };

        for driver in &drivers {
            driver.abort();
        }
        shared.sync.shutdown();
        shared.dispatcher.drain().await;
        tracing::info!("placer stopped");
        result
    }
}

fn check_target_shapes(config: &PlacerConfig, targets: &TargetSet) -> Result<(), PlacerError> {
    let expected = config.dimensions();
    for target in targets.iter() {
        if target.dimensions() != expected {
            tracing::error!(
                canvas = %target.canvas(),
                width = target.dimensions().0,
                height = target.dimensions().1,
                "target does not match the configured canvas size"
            );
            return Err(CanvasError::dimension_mismatch(expected, target.dimensions()).into());
        }
    }
    Ok(())
}

fn spawn_driver<F, Fut>(
    name: &'static str,
    period: Duration,
    shared: Arc<Shared>,
    work: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Shared>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tracing::trace!(driver = name, "driver tick");
            work(Arc::clone(&shared)).await;
        }
    })
}
