use crate::config::loader::LoaderConfig;
use crate::config::types::{Result, SourceRef};
use crate::decode::{Decoder, ImageCrateDecoder};
use crate::exec::{poller, reset, spawner};
use crate::region::{RegionHeader, ResultRegion};
use crate::utils::transport::HostTransport;
use nix::unistd::Pid;
use std::time::Duration;
use uuid::Uuid;

/// One image decode request and the worker/region serving it.
///
/// A job owns at most one live worker and at most one result region.
/// Lifecycle: `spawn` -> `poll` until it returns `true` -> read `image()` ->
/// `reset` before the next `spawn`.
///
/// ```no_run
/// use imgbox::{ImageJob, LoaderConfig, SourceRef};
///
/// let mut job = ImageJob::new();
/// job.spawn(SourceRef::Path("cat.png".into()), &LoaderConfig::default())?;
/// while !job.poll() {
///     // do other work
/// }
/// if let Some(image) = job.image() {
///     println!("{}x{}", image.width, image.height);
/// }
/// job.reset()?;
/// # Ok::<(), imgbox::ImgboxError>(())
/// ```
pub struct ImageJob {
    id: Uuid,
    pub(crate) source: Option<SourceRef>,
    pub(crate) worker: Option<Pid>,
    pub(crate) region: Option<ResultRegion>,
    pub(crate) broken: bool,
    pub(crate) transport: Option<Box<dyn HostTransport>>,
    pub(crate) reap_timeout: Duration,
}

/// Borrowed view of a successfully decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedView<'a> {
    pub width: u32,
    pub height: u32,
    /// RGBA, row-major, `width * height * 4` bytes
    pub pixels: &'a [u8],
}

impl Default for ImageJob {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ImageJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageJob")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("worker", &self.worker)
            .field("capacity", &self.capacity())
            .field("broken", &self.broken)
            .finish()
    }
}

impl ImageJob {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            source: None,
            worker: None,
            region: None,
            broken: false,
            transport: None,
            reap_timeout: LoaderConfig::default().reap_timeout(),
        }
    }

    /// Attach the enclosing application's connection; every worker spawned
    /// from this job severs it before decoding.
    pub fn with_transport(mut self, transport: Box<dyn HostTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Correlation id used in log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start decoding `source` in a sandboxed worker. Returns immediately.
    ///
    /// Fails with `WorkerActive` if a worker is still associated (reset
    /// first), `Allocation` if the region cannot be mapped (the job is left
    /// without a region), or `Spawn` if fork fails.
    pub fn spawn(&mut self, source: SourceRef, config: &LoaderConfig) -> Result<()> {
        self.spawn_with_decoder(source, config, &ImageCrateDecoder)
    }

    /// `spawn` with a caller-provided decoder. The decoder runs only inside
    /// the contained worker.
    pub fn spawn_with_decoder<D: Decoder + ?Sized>(
        &mut self,
        source: SourceRef,
        config: &LoaderConfig,
        decoder: &D,
    ) -> Result<()> {
        spawner::spawn_decode(self, source, config, decoder)
    }

    /// Non-blocking progress check; `true` once nothing is outstanding.
    ///
    /// Also `true` for a job that was never spawned; check `region()` or
    /// `image()` to tell "finished" from "nothing to do".
    pub fn poll(&mut self) -> bool {
        poller::poll_job(self)
    }

    /// Kill any live worker, release the region and clear the broken flag.
    pub fn reset(&mut self) -> Result<()> {
        reset::reset_job(self)
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn worker_pid(&self) -> Option<i32> {
        self.worker.map(Pid::as_raw)
    }

    pub fn source(&self) -> Option<&SourceRef> {
        self.source.as_ref()
    }

    /// Current region capacity in bytes, 0 without a region
    pub fn capacity(&self) -> usize {
        self.region.as_ref().map_or(0, ResultRegion::capacity)
    }

    pub fn region(&self) -> Option<&ResultRegion> {
        self.region.as_ref()
    }

    /// Region header, once the worker has been reaped
    pub fn header(&self) -> Option<RegionHeader> {
        if self.worker.is_some() {
            return None;
        }
        self.region.as_ref().map(ResultRegion::header)
    }

    /// The decoded image, if the worker finished cleanly and published one
    pub fn image(&self) -> Option<DecodedView<'_>> {
        if self.worker.is_some() || self.broken {
            return None;
        }
        let region = self.region.as_ref()?;
        let header = region.header();
        if !header.is_ready() {
            return None;
        }
        let width = u32::try_from(header.width).ok()?;
        let height = u32::try_from(header.height).ok()?;
        let pixels = region.pixels()?;
        if crate::region::rgba_len(width, height) != Some(pixels.len()) {
            return None;
        }
        Some(DecodedView { width, height, pixels })
    }
}

impl Drop for ImageJob {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.reset() {
                log::error!("Job {}: cleanup on drop failed: {}", self.id, e);
            }
        }
    }
}
