mod common;

use std::time::{Duration, Instant};

use common::mock_backend::{Outcome, ScriptedBackend};
use common::synthetic_image::{aerial_rgb, png_bytes};
use relief_engine::config::MeshConfig;
use relief_engine::depth::{DepthEstimator, EstimationPath};
use relief_engine::pipeline::{Pipeline, PipelineState};

fn small_mesh() -> MeshConfig {
    MeshConfig {
        resolution: 16,
        ..Default::default()
    }
}

fn ready_width(state: &PipelineState) -> Option<u32> {
    state.reconstruction().map(|r| r.result.image.width())
}

#[tokio::test(flavor = "multi_thread")]
async fn later_submission_wins_over_slower_earlier_one() {
    // Image A (64 wide) is slow at the remote, image B (32 wide) is fast
    let backend = ScriptedBackend::new(Outcome::Luminance)
        .with_delay_for_width(64, Duration::from_millis(400))
        .with_delay_for_width(32, Duration::from_millis(10));
    let pipeline = Pipeline::new(DepthEstimator::with_primary(backend), small_mesh());

    let a = pipeline.submit(png_bytes(aerial_rgb(64, 64)));
    let b = pipeline.submit(png_bytes(aerial_rgb(32, 48)));
    assert!(b > a);

    let state = pipeline.wait_for(b).await;
    assert_eq!(state.token(), Some(b));
    assert_eq!(ready_width(&state), Some(32));

    // Give A every chance to land late
    tokio::time::sleep(Duration::from_millis(600)).await;
    let state = pipeline.state();
    assert_eq!(state.token(), Some(b));
    assert_eq!(ready_width(&state), Some(32));
}

#[tokio::test(flavor = "multi_thread")]
async fn earlier_submission_finishing_first_is_still_replaced() {
    let backend = ScriptedBackend::new(Outcome::Luminance)
        .with_delay_for_width(64, Duration::from_millis(5))
        .with_delay_for_width(32, Duration::from_millis(250));
    let pipeline = Pipeline::new(DepthEstimator::with_primary(backend), small_mesh());

    let a = pipeline.submit(png_bytes(aerial_rgb(64, 64)));
    let b = pipeline.submit(png_bytes(aerial_rgb(32, 48)));

    // Waiting on A resolves as soon as B has taken over
    let seen = pipeline.wait_for(a).await;
    assert_ne!(seen.token(), Some(a));

    let state = pipeline.wait_for(b).await;
    assert_eq!(ready_width(&state), Some(32));
    assert_eq!(state.reconstruction().map(|r| r.result.path), Some(EstimationPath::Primary));
}

#[tokio::test(flavor = "multi_thread")]
async fn burst_of_submissions_settles_on_the_last() {
    let backend = ScriptedBackend::failing().with_delay(Duration::from_millis(30));
    let pipeline = Pipeline::new(DepthEstimator::with_primary(backend), small_mesh());

    let mut last = 0;
    for w in [20, 21, 22, 23, 24] {
        last = pipeline.submit(png_bytes(aerial_rgb(w, 16)));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let state = pipeline.wait_for(last).await;
    assert_eq!(state.token(), Some(last));
    assert_eq!(ready_width(&state), Some(24));
    assert_eq!(state.reconstruction().map(|r| r.result.path), Some(EstimationPath::Fallback));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_failing_remote_is_bounded_by_its_own_latency() {
    let backend = ScriptedBackend::failing().with_delay(Duration::from_millis(200));
    let pipeline = Pipeline::new(DepthEstimator::with_primary(backend), small_mesh());

    let started = Instant::now();
    let token = pipeline.submit(png_bytes(aerial_rgb(128, 128)));
    let state = tokio::time::timeout(Duration::from_secs(30), pipeline.wait_for(token))
        .await
        .expect("sequence must settle");
    assert!(matches!(state, PipelineState::Ready(_)));
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribers_only_ever_see_whole_reconstructions() {
    let backend = ScriptedBackend::new(Outcome::Luminance).with_delay(Duration::from_millis(20));
    let pipeline = Pipeline::new(DepthEstimator::with_primary(backend), small_mesh());
    let mut rx = pipeline.subscribe();

    let token = pipeline.submit(png_bytes(aerial_rgb(48, 48)));
    let watcher = tokio::spawn(async move {
        loop {
            if rx.changed().await.is_err() {
                return None;
            }
            let state = rx.borrow_and_update().clone();
            if let PipelineState::Ready(r) = &state {
                assert_eq!(r.mesh.vertex_count(), 16 * 16);
                assert_eq!(r.result.depth.width(), 48);
                return state.token();
            }
        }
    });

    pipeline.wait_for(token).await;
    let seen = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher finished")
        .expect("watcher did not panic");
    assert_eq!(seen, Some(token));
}

#[tokio::test(flavor = "multi_thread")]
async fn simultaneous_submits_from_two_threads_settle_on_the_newest() {
    let handle = tokio::runtime::Handle::current();
    let image = png_bytes(aerial_rgb(24, 24));

    for _ in 0..50 {
        let backend = ScriptedBackend::new(Outcome::Luminance).with_delay(Duration::from_millis(2));
        let pipeline = Pipeline::new(DepthEstimator::with_primary(backend), small_mesh());
        let barrier = std::sync::Barrier::new(2);

        let submit = || {
            let _guard = handle.enter();
            barrier.wait();
            pipeline.submit(image.clone())
        };
        let (first, second) = std::thread::scope(|scope| {
            let a = scope.spawn(submit);
            let b = scope.spawn(submit);
            (a.join().unwrap(), b.join().unwrap())
        });

        assert_ne!(first, second);
        let newest = first.max(second);
        let state = tokio::time::timeout(Duration::from_secs(5), pipeline.wait_for(newest))
            .await
            .expect("newest submission must settle");
        assert_eq!(state.token(), Some(newest));
        assert!(matches!(state, PipelineState::Ready(_)), "settled in {}", state.name());
    }
}
