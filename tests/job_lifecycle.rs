//! End-to-end job lifecycle: real workers decoding real files.

use imgbox::kernel::seccomp::is_containment_supported;
use imgbox::{ImageJob, LoaderConfig, SourceRef};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn temp_path(tag: &str, ext: &str) -> PathBuf {
    std::env::temp_dir().join(format!("imgbox-{}-{}.{}", tag, uuid::Uuid::new_v4(), ext))
}

/// Deterministic gradient so pixel comparisons are meaningful
fn write_png(path: &Path, width: u32, height: u32) {
    let image = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, ((x * 7 + y * 13) % 256) as u8, 255])
    });
    image.save(path).unwrap();
}

fn unfiltered(mb: usize) -> LoaderConfig {
    LoaderConfig::default()
        .with_max_region_mb(mb)
        .with_syscall_filter(false)
}

fn poll_until_complete(job: &mut ImageJob) -> bool {
    let deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < deadline {
        if job.poll() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_decodes_png_into_region() {
    let path = temp_path("scenario-a", "png");
    write_png(&path, 100, 100);

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(8)).unwrap();
    assert!(poll_until_complete(&mut job));

    assert!(!job.is_broken());
    let header = job.header().unwrap();
    assert_eq!(header.width, 100);
    assert_eq!(header.height, 100);
    assert_eq!(header.claimed_len, 40_000);
    assert!(header.is_ready());
    assert_eq!((header.origin_x, header.origin_y), (0, 0));

    let expected = image::open(&path).unwrap().into_rgba8().into_raw();
    let view = job.image().unwrap();
    assert_eq!(view.pixels, expected.as_slice());

    // Trimmed well below the configured 8 MiB.
    assert!(job.capacity() < 8 * 1024 * 1024);
    assert!(job.capacity() >= imgbox::region::HEADER_SIZE + 40_000);

    job.reset().unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_missing_source_marks_job_broken() {
    let path = temp_path("scenario-b", "png");

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path), &unfiltered(1)).unwrap();
    assert!(poll_until_complete(&mut job));

    assert!(job.is_broken());
    assert!(job.image().is_none());
    if let Some(region) = job.region() {
        assert!(!region.is_ready());
    }
}

#[test]
fn test_malformed_source_marks_job_broken() {
    let path = temp_path("scenario-c", "png");
    std::fs::write(&path, b"\x89PNG\r\n\x1a\nthis is not really a png").unwrap();

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(1)).unwrap();
    assert!(poll_until_complete(&mut job));

    assert!(job.is_broken());
    let region = job.region().unwrap();
    assert!(!region.is_ready());
    assert!(job.image().is_none());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_image_larger_than_region_is_broken() {
    let path = temp_path("too-large", "png");
    // 600 x 600 x 4 bytes does not fit in 1 MiB.
    write_png(&path, 600, 600);

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(1)).unwrap();
    assert!(poll_until_complete(&mut job));

    assert!(job.is_broken());
    assert!(job.image().is_none());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_poll_right_after_spawn_is_pending() {
    let path = temp_path("pending", "png");
    write_png(&path, 1024, 1024);

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(8)).unwrap();
    assert!(!job.poll());
    assert!(job.has_worker());
    assert!(job.image().is_none());

    assert!(poll_until_complete(&mut job));
    assert!(!job.is_broken());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_poll_is_idempotent_after_completion() {
    let path = temp_path("idempotent", "png");
    write_png(&path, 32, 16);

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(2)).unwrap();
    assert!(poll_until_complete(&mut job));

    let capacity = job.capacity();
    let header = job.header();
    for _ in 0..5 {
        assert!(job.poll());
        assert_eq!(job.capacity(), capacity);
        assert_eq!(job.header(), header);
        assert!(!job.is_broken());
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_reset_returns_job_to_initial_state() {
    let path = temp_path("reset", "png");
    write_png(&path, 64, 64);

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(2)).unwrap();
    // Reset without waiting: any live worker is killed and reaped.
    job.reset().unwrap();

    assert!(!job.has_worker());
    assert!(job.region().is_none());
    assert_eq!(job.capacity(), 0);
    assert!(!job.is_broken());
    assert!(job.poll());

    // A second reset is a no-op.
    job.reset().unwrap();
    assert_eq!(job.capacity(), 0);

    // And the job can be reused.
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(2)).unwrap();
    assert!(poll_until_complete(&mut job));
    let view = job.image().unwrap();
    assert_eq!((view.width, view.height), (64, 64));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_completed_job_can_spawn_again() {
    let path = temp_path("respawn", "png");
    write_png(&path, 8, 8);

    let mut job = ImageJob::new();
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(1)).unwrap();
    assert!(poll_until_complete(&mut job));

    // Completed jobs may be spawned again; the old region is released first.
    job.spawn(SourceRef::Path(path.clone()), &unfiltered(1)).unwrap();
    assert!(poll_until_complete(&mut job));
    assert!(job.image().is_some());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_independent_jobs_run_concurrently() {
    let first = temp_path("concurrent-1", "png");
    let second = temp_path("concurrent-2", "png");
    write_png(&first, 20, 10);
    write_png(&second, 10, 20);

    let mut a = ImageJob::new();
    let mut b = ImageJob::new();
    a.spawn(SourceRef::Path(first.clone()), &unfiltered(1)).unwrap();
    b.spawn(SourceRef::Path(second.clone()), &unfiltered(1)).unwrap();

    assert!(poll_until_complete(&mut a));
    assert!(poll_until_complete(&mut b));
    assert_eq!(a.image().map(|v| (v.width, v.height)), Some((20, 10)));
    assert_eq!(b.image().map(|v| (v.width, v.height)), Some((10, 20)));

    let _ = std::fs::remove_file(&first);
    let _ = std::fs::remove_file(&second);
}

#[test]
fn test_decode_under_syscall_containment() {
    if !is_containment_supported() {
        println!("Skipping: syscall containment not supported on this host");
        return;
    }

    let rgba = image::DynamicImage::ImageRgba8(image::RgbaImage::from_fn(40, 30, |x, y| {
        image::Rgba([(x * 6) as u8, (y * 8) as u8, 128, 255])
    }));
    // JPEG cannot carry alpha.
    let cases = [
        (image::ImageFormat::Png, "png", rgba.clone()),
        (image::ImageFormat::Jpeg, "jpg", image::DynamicImage::ImageRgb8(rgba.to_rgb8())),
        (image::ImageFormat::Gif, "gif", rgba.clone()),
        (image::ImageFormat::Bmp, "bmp", rgba.clone()),
    ];

    let config = LoaderConfig::default().with_max_region_mb(1);
    assert!(config.syscall_filter);

    for (format, ext, source) in cases {
        let path = temp_path("contained", ext);
        source.save_with_format(&path, format).unwrap();

        let mut job = ImageJob::new();
        job.spawn(SourceRef::Path(path.clone()), &config).unwrap();
        assert!(poll_until_complete(&mut job));

        assert!(!job.is_broken(), "contained worker failed to decode {:?}", format);
        let expected = image::open(&path).unwrap().into_rgba8().into_raw();
        let view = job.image().unwrap();
        assert_eq!((view.width, view.height), (40, 30), "{:?}", format);
        assert_eq!(view.pixels, expected.as_slice(), "{:?}", format);

        job.reset().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}

#[test]
fn test_dropping_job_reaps_worker() {
    let path = temp_path("drop", "png");
    write_png(&path, 256, 256);

    let pid = {
        let mut job = ImageJob::new();
        job.spawn(SourceRef::Path(path.clone()), &unfiltered(1)).unwrap();
        job.worker_pid().unwrap()
    };

    let status = nix::sys::wait::waitpid(
        nix::unistd::Pid::from_raw(pid),
        Some(nix::sys::wait::WaitPidFlag::WNOHANG),
    );
    assert_eq!(status, Err(nix::errno::Errno::ECHILD));

    let _ = std::fs::remove_file(&path);
}
