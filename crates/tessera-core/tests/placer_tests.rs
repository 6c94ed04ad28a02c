use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tessera_canvas::{Bitmap, CanvasError, CanvasId, Color, TargetSet, TargetSpec};
use tessera_core::{
    Assignment, DisableReason, Placer, PlacerConfig, PlacerError, ServerMessage,
    SubscriptionState,
};
use tessera_test_utils::{credentials, eventually, Fakes, Reply, ScriptedPlacementApi};

const C0: CanvasId = CanvasId(0);
const SIDE: u32 = 10;

fn config() -> PlacerConfig {
    PlacerConfig::new()
        .with_canvas_count(1)
        .with_dimensions(SIDE, SIDE)
}

/// Target wanting `color` at each spot and nothing elsewhere
fn target(spots: &[(u32, u32)], color: Color) -> TargetSet {
    let mut wanted = Bitmap::transparent(SIDE, SIDE);
    for &(x, y) in spots {
        wanted.set(x, y, color.argb());
    }
    TargetSet::new([TargetSpec::from_bitmap(C0, &wanted).0])
}

async fn start(fakes: &Fakes, accounts: usize, targets: TargetSet) -> Placer {
    Placer::start(config(), targets, credentials(accounts), fakes.services())
        .await
        .unwrap()
}

/// Wait for the subscription and feed it one full frame
async fn sync_canvas(placer: &Placer, fakes: &Fakes, bitmap: Bitmap) {
    eventually(|| placer.subscription_state(C0) == SubscriptionState::Subscribed).await;
    fakes.fetcher.insert("full", bitmap.clone());
    fakes.connector.latest(C0).unwrap().full_frame("full");
    eventually(|| placer.store().snapshot(C0).as_deref() == Some(&bitmap)).await;
}

fn blue_canvas() -> Bitmap {
    Bitmap::filled(SIDE, SIDE, Color::Blue.argb())
}

#[tokio::test]
async fn single_mismatch_single_identity() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 1, target(&[(5, 5)], Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    let before = Utc::now();
    assert_eq!(placer.tick(), 1);
    placer.drain().await;
    let after = Utc::now();

    let calls = fakes.placement.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].assignment, Assignment::new(C0, 5, 5, Color::Red));

    let account = &placer.pool().snapshot()[0];
    assert!(account.cooldown_until >= before + ChronoDuration::seconds(60));
    assert!(account.cooldown_until <= after + ChronoDuration::seconds(60));

    // Cooling down: nothing to hand out next cycle
    assert_eq!(placer.tick(), 0);
    assert_eq!(fakes.placement.calls().len(), 1);
}

#[tokio::test]
async fn ban_is_permanent() {
    let fakes = Fakes::new();
    fakes.placement.set_default(Reply::Banned);
    let placer = start(&fakes, 1, target(&[(5, 5)], Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    assert_eq!(placer.tick(), 1);
    placer.drain().await;
    assert_eq!(placer.pool().accounts()[0].disabled(), Some(DisableReason::Banned));

    placer.refresh().await;
    assert_eq!(placer.tick(), 0);
    assert!(placer
        .pool()
        .available(Utc::now() + ChronoDuration::days(30))
        .is_empty());
    assert_eq!(fakes.placement.calls().len(), 1);
}

#[tokio::test]
async fn one_pixel_three_identities() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 3, target(&[(1, 1)], Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    assert_eq!(placer.tick(), 1);
    placer.drain().await;
    assert_eq!(fakes.placement.calls().len(), 1);
    assert_eq!(placer.pool().available(Utc::now()).len(), 2);
}

#[tokio::test]
async fn batch_bounded_by_available_identities() {
    let fakes = Fakes::new();
    let spots: Vec<_> = (0..SIDE).flat_map(|x| (0..SIDE).map(move |y| (x, y))).collect();
    let placer = start(&fakes, 4, target(&spots, Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    assert_eq!(placer.tick(), 4);
    placer.drain().await;
    assert_eq!(placer.tick(), 0);

    let calls = fakes.placement.calls();
    let tokens: std::collections::HashSet<_> = calls.iter().map(|c| c.token.clone()).collect();
    assert_eq!(tokens.len(), 4);
}

#[tokio::test]
async fn matching_canvas_dispatches_nothing() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 2, target(&[(3, 3)], Color::Blue)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    assert_eq!(placer.tick(), 0);
    assert_eq!(placer.tick(), 0);
    assert!(fakes.placement.calls().is_empty());
}

#[tokio::test]
async fn unsynced_canvas_dispatches_nothing() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 2, target(&[(3, 3)], Color::Red)).await;
    eventually(|| placer.subscription_state(C0) == SubscriptionState::Subscribed).await;

    assert_eq!(placer.tick(), 0);
}

#[tokio::test]
async fn no_overlapping_calls_per_identity() {
    let fakes = Fakes {
        placement: ScriptedPlacementApi::with_latency(Duration::from_millis(30)),
        ..Fakes::new()
    };
    fakes
        .placement
        .set_default(Reply::NextAvailableIn(ChronoDuration::zero()));
    let spots: Vec<_> = (0..SIDE).map(|x| (x, 0)).collect();
    let placer = start(&fakes, 3, target(&spots, Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    for _ in 0..30 {
        placer.tick();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    placer.drain().await;

    assert!(fakes.placement.calls().len() > 3);
    assert_eq!(fakes.placement.overlaps(), 0);
}

#[tokio::test]
async fn rate_limit_is_a_cooldown() {
    let fakes = Fakes::new();
    fakes.placement.set_default(Reply::RateLimited(None));
    let placer = start(&fakes, 1, target(&[(5, 5)], Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    placer.tick();
    placer.drain().await;

    let account = &placer.pool().snapshot()[0];
    assert_eq!(account.disabled, None);
    assert!(account.cooldown_until >= Utc::now() + ChronoDuration::minutes(4));
}

#[tokio::test]
async fn failure_disables_until_refresh() {
    let fakes = Fakes::new();
    fakes.placement.script("token-user0", [Reply::ServerError(500)]);
    let placer = start(&fakes, 1, target(&[(5, 5)], Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    placer.tick();
    placer.drain().await;
    assert_eq!(
        placer.pool().accounts()[0].disabled(),
        Some(DisableReason::TransportFailure)
    );
    assert_eq!(placer.tick(), 0);

    placer.refresh().await;
    assert_eq!(placer.tick(), 1);
    placer.drain().await;
}

#[tokio::test]
async fn refresh_failure_disables() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 2, target(&[(5, 5)], Color::Red)).await;

    fakes.auth.reject("user1");
    placer.refresh().await;

    let stats = placer.pool().stats(Utc::now());
    assert_eq!(stats.total, 2);
    assert_eq!(stats.disabled, 1);
    assert_eq!(stats.usable, 1);
}

#[tokio::test]
async fn seeding_loads_cooldowns() {
    let fakes = Fakes::new();
    fakes
        .placement
        .set_cooldown(Reply::NextAvailableIn(ChronoDuration::seconds(90)));
    let placer = start(&fakes, 2, target(&[(5, 5)], Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    assert!(placer.pool().available(Utc::now()).is_empty());
    assert_eq!(placer.tick(), 0);
}

#[tokio::test]
async fn start_fails_without_identities() {
    let fakes = Fakes::new();
    fakes.auth.reject("user0");
    let err = Placer::start(config(), target(&[], Color::Red), credentials(1), fakes.services())
        .await
        .unwrap_err();
    assert!(matches!(err, PlacerError::NoIdentities { total: 1 }));

    let err = Placer::start(config(), target(&[], Color::Red), Vec::new(), fakes.services())
        .await
        .unwrap_err();
    assert!(matches!(err, PlacerError::NoIdentities { total: 0 }));
}

#[tokio::test]
async fn start_rejects_invalid_config() {
    let fakes = Fakes::new();
    let err = Placer::start(
        config().with_max_in_flight(0),
        target(&[], Color::Red),
        credentials(1),
        fakes.services(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlacerError::Config(_)));
}

#[tokio::test]
async fn start_rejects_target_of_wrong_size() {
    let fakes = Fakes::new();
    let err = Placer::start(
        PlacerConfig::new().with_canvas_count(1),
        target(&[(5, 5)], Color::Red),
        credentials(1),
        fakes.services(),
    )
    .await
    .unwrap_err();
    assert!(
        matches!(
            err,
            PlacerError::Canvas(CanvasError::DimensionMismatch {
                expected_width: 1000,
                width: SIDE,
                ..
            })
        ),
        "{err}"
    );
    // Rejected before any login
    assert_eq!(fakes.auth.logins(), 0);
}

#[tokio::test]
async fn full_frame_of_wrong_size_is_ignored() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 1, target(&[(5, 5)], Color::Red)).await;
    sync_canvas(&placer, &fakes, blue_canvas()).await;

    fakes.fetcher.insert("huge", Bitmap::filled(SIDE * 2, SIDE, Color::Red.argb()));
    fakes.connector.latest(C0).unwrap().full_frame("huge");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(placer.store().snapshot(C0).as_deref(), Some(&blue_canvas()));
    assert_eq!(placer.subscription_state(C0), SubscriptionState::Subscribed);
    assert_eq!(placer.tick(), 1);
}

#[tokio::test]
async fn report_counts_pixels_and_accounts() {
    let fakes = Fakes::new();
    fakes.auth.reject("user2");
    let placer = start(&fakes, 3, target(&[(0, 0), (1, 1)], Color::Blue)).await;

    let unsynced = placer.report();
    assert_eq!(unsynced.pixels.unsynced, 2);

    let mut bitmap = blue_canvas();
    bitmap.set(1, 1, Color::Red.argb());
    sync_canvas(&placer, &fakes, bitmap).await;

    let report = placer.report();
    assert_eq!(report.pixels.good, 1);
    assert_eq!(report.pixels.contested, 1);
    assert_eq!(report.pixels.unsynced, 0);
    assert_eq!(report.accounts.total, 3);
    assert_eq!(report.accounts.usable, 2);
    assert_eq!(report.accounts.disabled, 1);
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 1, target(&[(5, 5)], Color::Red)).await;
    eventually(|| placer.subscription_state(C0) == SubscriptionState::Subscribed).await;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(placer.run(async {
        let _ = rx.await;
    }));
    tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn run_stops_on_channel_auth_rejection() {
    let fakes = Fakes::new();
    let placer = start(&fakes, 1, target(&[(5, 5)], Color::Red)).await;
    eventually(|| placer.subscription_state(C0) == SubscriptionState::Subscribed).await;

    let handle = tokio::spawn(placer.run(std::future::pending()));
    fakes
        .connector
        .latest(C0)
        .unwrap()
        .push(ServerMessage::ConnectionError {
            reason: "invalid token".to_string(),
        });

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    match result {
        Err(PlacerError::FatalChannelAuth { canvas, reason }) => {
            assert_eq!(canvas, C0);
            assert_eq!(reason, "invalid token");
        }
        other => panic!("expected fatal channel auth, got {other:?}"),
    }
}
