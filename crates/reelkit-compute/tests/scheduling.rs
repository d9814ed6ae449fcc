use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reelkit_compute::{BitmapDecoder, ComputeService, GraphNode, ImageCrateDecoder, Priority};
use reelkit_core::diagnostics::{DiagnosticEvent, DiagnosticsSink, Severity};
use reelkit_core::frame::FrameBuffer;
use reelkit_core::{Bitmap, PixelFormat, ReelkitConfig, ReelkitError, ReelkitResult};

/// Decodes `[tag, delay_ms]` into a `tag`x1 bitmap after sleeping, recording
/// concurrency and start order. A zero tag fails.
#[derive(Default)]
struct TallyDecoder {
    active: AtomicUsize,
    max_active: AtomicUsize,
    started: Mutex<Vec<u8>>,
}

impl BitmapDecoder for TallyDecoder {
    fn name(&self) -> &'static str {
        "tally"
    }

    fn decode(&self, bytes: &[u8]) -> ReelkitResult<Bitmap> {
        let tag = bytes[0];
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(tag);
        std::thread::sleep(Duration::from_millis(bytes[1] as u64));
        self.active.fetch_sub(1, Ordering::SeqCst);
        if tag == 0 {
            return Err(ReelkitError::decode_failed("<memory>", "refused by tally"));
        }
        Ok(Bitmap::new(FrameBuffer::new(tag as u32, 1, PixelFormat::Rgba8)))
    }
}

fn tally_service(threads: usize) -> (ComputeService, Arc<TallyDecoder>) {
    let mut config = ReelkitConfig::default();
    config.compute.worker_threads = threads;
    let tally = Arc::new(TallyDecoder::default());
    let svc = ComputeService::builder(&config)
        .decoder(tally.clone())
        .start();
    (svc, tally)
}

fn node(id: &str, x: f64, tags: &[&str]) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        x,
        y: 0.0,
        width: 10.0,
        height: 10.0,
        scale: 1.0,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        is_stack_child: false,
        parent_id: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_low_priority_decodes_run_one_at_a_time_in_fifo_order() {
    let (svc, tally) = tally_service(4);

    let jobs = (1..=5u8).map(|tag| svc.decode_bitmap(vec![tag, 30], Priority::Low));
    let results = futures::future::join_all(jobs).await;

    let widths: Vec<u32> = results.into_iter().map(|r| r.unwrap().width()).collect();
    assert_eq!(widths, vec![1, 2, 3, 4, 5]);
    assert_eq!(tally.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(*tally.started.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_caller_gets_its_own_result() {
    let (svc, _tally) = tally_service(4);

    let mut handles = Vec::new();
    for i in 0..24u8 {
        let svc = svc.clone();
        let tag = i + 1;
        // later submissions finish sooner, so completions interleave
        let delay = (24 - i) * 2;
        let priority = if i % 2 == 0 { Priority::High } else { Priority::Low };
        handles.push(tokio::spawn(async move {
            let bmp = svc.decode_bitmap(vec![tag, delay], priority).await.unwrap();
            (tag, bmp.width())
        }));
    }

    for handle in handles {
        let (tag, width) = handle.await.unwrap();
        assert_eq!(width, tag as u32);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_high_priority_bypasses_busy_low_lane() {
    let (svc, tally) = tally_service(2);

    let timed = |tag: u8, delay: u8, priority: Priority| {
        let svc = svc.clone();
        async move {
            let bmp = svc.decode_bitmap(vec![tag, delay], priority).await.unwrap();
            (bmp.width(), Instant::now())
        }
    };

    let (slow_low, queued_low, high) = tokio::join!(
        timed(1, 200, Priority::Low),
        timed(2, 10, Priority::Low),
        timed(3, 10, Priority::High),
    );

    assert_eq!((slow_low.0, queued_low.0, high.0), (1, 2, 3));
    assert!(high.1 < slow_low.1);
    assert!(slow_low.1 <= queued_low.1);
    assert_eq!(tally.started.lock().unwrap().last(), Some(&2));
}

#[tokio::test]
async fn test_failed_low_task_releases_the_lane() {
    let (svc, _tally) = tally_service(2);

    let (failed, next) = tokio::join!(
        svc.decode_bitmap(vec![0u8, 5], Priority::Low),
        svc.decode_bitmap(vec![9u8, 5], Priority::Low),
    );

    assert!(matches!(failed, Err(ReelkitError::DecodeFailed { .. })));
    assert_eq!(next.unwrap().width(), 9);
}

#[tokio::test]
async fn test_graph_task_through_worker() {
    let (svc, _tally) = tally_service(2);
    let nodes = vec![
        node("a", 0.0, &["dune"]),
        node("b", 50.0, &["dune"]),
        node("c", 5000.0, &["dune"]),
    ];
    let edges = svc.calculate_synapses(nodes, Some("b".into())).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].key, "a-b");
    assert!(edges[0].emphasis);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<DiagnosticEvent>>);

impl DiagnosticsSink for Recorder {
    fn report(&self, event: DiagnosticEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn test_unavailable_worker_degrades_gracefully() {
    let mut config = ReelkitConfig::default();
    config.compute.worker_enabled = false;
    let recorder = Arc::new(Recorder::default());
    let svc = ComputeService::builder(&config)
        .decoder(Arc::new(ImageCrateDecoder))
        .diagnostics(recorder.clone())
        .start();

    assert!(svc.is_degraded());
    {
        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "compute");
        assert_eq!(events[0].severity, Severity::Error);
    }

    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 10, 10, 255]));
    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageFormat::Png).unwrap();
    let bmp = svc
        .decode_bitmap(png.into_inner(), Priority::Low)
        .await
        .unwrap();
    assert_eq!(bmp.frame().get_pixel(3, 3), Some([200, 10, 10, 255]));

    // would link on a healthy worker
    let nodes = vec![node("a", 0.0, &["dune"]), node("b", 50.0, &["dune"])];
    assert!(svc.calculate_synapses(nodes, None).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_rejects_waiters() {
    let (svc, _tally) = tally_service(2);

    let pending = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.decode_bitmap(vec![4u8, 200], Priority::High).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    svc.shutdown();

    assert!(matches!(
        pending.await.unwrap(),
        Err(ReelkitError::ServiceStopped)
    ));
    assert!(matches!(
        svc.decode_bitmap(vec![4u8, 1], Priority::High).await,
        Err(ReelkitError::ServiceStopped)
    ));
}
