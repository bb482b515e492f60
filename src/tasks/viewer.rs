mod render;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ab_glyph::FontArc;
use anyhow::{Context, Result, anyhow};
use fontdb::{Database, Family, Query, Source};
use image::RgbaImage;
use softbuffer::{Context as SoftContext, Surface};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowId},
};

use crate::adapter::CarouselAdapter;
use crate::config::{CarouselOptions, ViewerOptions};
use crate::events::{
    ImageRef, LoadImage, LoaderEvent, Notice, PageSelected, PreparedImageCpu, ViewerCommand,
};
use crate::processing::layout::{center_offset, resize_to_contain};
use crate::tasks::loader::resize_rgba;
pub use render::{Canvas, Color, ease_out_cubic, slide_offsets, text_width};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// Pages kept decoded on each side of the settled page and of a scroll target.
const PRELOAD_RADIUS: usize = 1;
const NOTICE_TEXT_PX: f32 = 34.0;
const TERMINAL_TEXT_PX: f32 = 48.0;

#[derive(Debug)]
enum ViewerEvent {
    Command(ViewerCommand),
    Loader(LoaderEvent),
    Cancelled,
}

type WindowHandle = Arc<Window>;
type CommandReceiver = mpsc::Receiver<ViewerCommand>;
type LoaderReceiver = mpsc::Receiver<LoaderEvent>;
type SelectedSender = mpsc::Sender<PageSelected>;
type LoadSender = mpsc::Sender<LoadImage>;

struct PageImage {
    original: RgbaImage,
    fitted: Option<RgbaImage>,
}

impl PageImage {
    fn new(prepared: PreparedImageCpu) -> Option<Self> {
        let original = RgbaImage::from_raw(prepared.width, prepared.height, prepared.pixels)?;
        Some(Self {
            original,
            fitted: None,
        })
    }

    /// Scaled copy that fits the surface; recomputed when the surface size changes.
    fn fit_to(&mut self, width: u32, height: u32) {
        let (src_w, src_h) = self.original.dimensions();
        let (fw, fh) = resize_to_contain(width, height, src_w, src_h, u32::MAX);
        if self
            .fitted
            .as_ref()
            .is_some_and(|fitted| fitted.dimensions() == (fw, fh))
        {
            return;
        }
        match resize_rgba(&self.original, fw, fh) {
            Ok(fitted) => self.fitted = Some(fitted),
            Err(err) => {
                warn!(error = %err, "failed to fit page to surface");
                self.fitted = None;
            }
        }
    }
}

struct Scroll {
    from: usize,
    to: usize,
    started: Instant,
}

struct ActiveNotice {
    notice: Notice,
    expires: Option<Instant>,
}

struct ViewerApp {
    options: ViewerOptions,
    slide_duration: Duration,
    cancel: CancellationToken,
    window: Option<WindowHandle>,
    context: Option<SoftContext<WindowHandle>>,
    surface: Option<Surface<WindowHandle, WindowHandle>>,
    font: Option<FontArc>,
    adapter: CarouselAdapter,
    pages: HashMap<ImageRef, PageImage>,
    pending_loads: VecDeque<ImageRef>,
    /// Queued or handed to the loader, not answered yet.
    requested: HashSet<ImageRef>,
    failed: HashSet<ImageRef>,
    current: usize,
    scroll: Option<Scroll>,
    notice: Option<ActiveNotice>,
    needs_redraw: bool,
    to_loader: LoadSender,
    to_controller: SelectedSender,
}

impl ViewerApp {
    fn new(
        options: ViewerOptions,
        slide_duration: Duration,
        cancel: CancellationToken,
        to_loader: LoadSender,
        to_controller: SelectedSender,
    ) -> Self {
        let font = match load_font() {
            Ok(font) => Some(font),
            Err(err) => {
                warn!(error = %err, "no font available; notices will only be logged");
                None
            }
        };
        Self {
            options,
            slide_duration,
            cancel,
            window: None,
            context: None,
            surface: None,
            font,
            adapter: CarouselAdapter::new(),
            pages: HashMap::new(),
            pending_loads: VecDeque::new(),
            requested: HashSet::new(),
            failed: HashSet::new(),
            current: 0,
            scroll: None,
            notice: None,
            needs_redraw: true,
            to_loader,
            to_controller,
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }

        let mut attrs = Window::default_attributes()
            .with_title("Kiosk Carousel")
            .with_decorations(!self.options.fullscreen);
        if self.options.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = event_loop
            .create_window(attrs)
            .context("failed to create viewer window")?;
        if self.options.hide_cursor {
            window.set_cursor_visible(false);
        }
        let window = WindowHandle::new(window);

        let context = SoftContext::new(window.clone())
            .map_err(|err| anyhow!("failed to create softbuffer context: {err}"))?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|err| anyhow!("failed to create softbuffer surface: {err}"))?;

        self.context = Some(context);
        self.surface = Some(surface);
        let size = window.inner_size();
        self.window = Some(window);
        self.handle_resize(size);
        info!(width = size.width, height = size.height, "viewer window ready");
        Ok(())
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(surface) = self.surface.as_mut()
            && let (Some(width), Some(height)) = (
                NonZeroU32::new(size.width.max(1)),
                NonZeroU32::new(size.height.max(1)),
            )
        {
            if let Err(err) = surface.resize(width, height) {
                warn!(error = %err, "failed to resize viewer surface");
            }
            debug!(width = size.width, height = size.height, "viewer surface resized");
            self.needs_redraw = true;
        }
    }

    fn handle_command(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::Show(sequence) => {
                let generation = self.adapter.update(sequence.items().to_vec());
                self.pages.clear();
                self.pending_loads.clear();
                self.requested.clear();
                self.failed.clear();
                self.scroll = None;
                info!(
                    generation,
                    pages = self.adapter.item_count(),
                    "showing new sequence"
                );
                self.settle(sequence.first_real());
            }
            ViewerCommand::ScrollTo { position, animated } => {
                if position >= self.adapter.item_count() {
                    warn!(position, "scroll target outside bound pages");
                    return;
                }
                if let Some(running) = self.scroll.take() {
                    self.settle(running.to);
                }
                if animated && position != self.current {
                    self.scroll = Some(Scroll {
                        from: self.current,
                        to: position,
                        started: Instant::now(),
                    });
                    self.refresh_window();
                    self.needs_redraw = true;
                } else {
                    self.settle(position);
                }
            }
            ViewerCommand::Notify(notice) => {
                info!(message = notice.message(), "notice");
                let expires =
                    (!notice.is_terminal()).then(|| Instant::now() + self.options.notice_duration);
                self.notice = Some(ActiveNotice { notice, expires });
                self.needs_redraw = true;
            }
        }
    }

    fn handle_loader(&mut self, event: LoaderEvent) {
        match event {
            LoaderEvent::ImageLoaded(prepared) => {
                let source = prepared.source.clone();
                self.requested.remove(&source);
                if !self.wanted_images().contains(&source) {
                    debug!(%source, "dropping image outside the decode window");
                    return;
                }
                match PageImage::new(prepared) {
                    Some(page) => {
                        self.pages.insert(source, page);
                        self.needs_redraw = true;
                    }
                    None => warn!(%source, "decoded buffer has the wrong size"),
                }
            }
            LoaderEvent::LoadFailed(source) => {
                debug!(%source, "page stays blank");
                self.requested.remove(&source);
                self.failed.insert(source);
            }
        }
    }

    fn settle(&mut self, position: usize) {
        self.current = position;
        self.needs_redraw = true;
        self.refresh_window();
        if let Err(err) = self.to_controller.try_send(PageSelected(position)) {
            warn!(position, error = %err, "failed to report page selection");
        }
    }

    fn wanted_images(&self) -> Vec<ImageRef> {
        let mut anchors = vec![self.current];
        if let Some(scroll) = self.scroll.as_ref() {
            anchors.push(scroll.to);
        }
        self.adapter.images_near(&anchors, PRELOAD_RADIUS)
    }

    /// Evicts decoded pages that left the window and queues the ones that entered it.
    fn refresh_window(&mut self) {
        let wanted = self.wanted_images();
        let before = self.pages.len();
        self.pages.retain(|image, _| wanted.contains(image));
        self.pending_loads.retain(|image| wanted.contains(image));
        self.requested.retain(|image| wanted.contains(image));
        let evicted = before - self.pages.len();
        if evicted > 0 {
            debug!(evicted, kept = self.pages.len(), "released decoded pages");
        }

        for image in wanted {
            if self.pages.contains_key(&image) || self.failed.contains(&image) {
                continue;
            }
            if self.requested.insert(image.clone()) {
                self.pending_loads.push_back(image);
            }
        }
    }

    fn flush_load_requests(&mut self) {
        while let Some(image) = self.pending_loads.pop_front() {
            match self.to_loader.try_send(LoadImage(image)) {
                Ok(()) => {}
                Err(TrySendError::Full(LoadImage(image))) => {
                    self.pending_loads.push_front(image);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("loader channel closed; pages will stay blank");
                    self.pending_loads.clear();
                    break;
                }
            }
        }
    }

    /// Advances animation and notice timers. Returns the next wake-up, if any.
    fn tick(&mut self, now: Instant) -> Option<Instant> {
        let mut wake: Option<Instant> = None;

        if let Some(scroll) = self.scroll.as_ref() {
            if now.duration_since(scroll.started) >= self.slide_duration {
                let target = scroll.to;
                self.scroll = None;
                self.settle(target);
            } else {
                self.needs_redraw = true;
                wake = Some(now + FRAME_INTERVAL);
            }
        }

        if let Some(expires) = self.notice.as_ref().and_then(|n| n.expires) {
            if now >= expires {
                self.notice = None;
                self.needs_redraw = true;
            } else {
                wake = Some(wake.map_or(expires, |w| w.min(expires)));
            }
        }

        wake
    }

    fn visible_positions(&self) -> Vec<usize> {
        match self.scroll.as_ref() {
            Some(scroll) => vec![scroll.from, scroll.to],
            None => vec![self.current],
        }
    }

    fn render(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));

        for position in self.visible_positions() {
            if let Some(image) = self.adapter.bind(position)
                && let Some(page) = self.pages.get_mut(image)
            {
                page.fit_to(width, height);
            }
        }

        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        let mut buffer = match surface.buffer_mut() {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!(error = %err, "failed to acquire viewer frame");
                return;
            }
        };
        if buffer.len() != width as usize * height as usize {
            debug!("surface size changed mid-frame; skipping");
            return;
        }

        let mut canvas = Canvas::new(&mut buffer[..], width, height);
        canvas.fill(Color::from_array(self.options.background));

        let fitted = |position: usize| {
            self.adapter
                .bind(position)
                .and_then(|image| self.pages.get(image))
                .and_then(|page| page.fitted.as_ref())
        };

        match self.scroll.as_ref() {
            Some(scroll) => {
                let progress =
                    scroll.started.elapsed().as_secs_f32() / self.slide_duration.as_secs_f32();
                let forward = scroll.to > scroll.from;
                let (out_x, in_x) = slide_offsets(progress, width, forward);
                draw_page(&mut canvas, fitted(scroll.from), out_x);
                draw_page(&mut canvas, fitted(scroll.to), in_x);
            }
            None => draw_page(&mut canvas, fitted(self.current), 0),
        }

        if let (Some(active), Some(font)) = (self.notice.as_ref(), self.font.as_ref()) {
            draw_notice(&mut canvas, font, active.notice);
        }

        if let Err(err) = buffer.present() {
            warn!(error = %err, "failed to present viewer frame");
        }
    }
}

fn draw_page(canvas: &mut Canvas<'_>, page: Option<&RgbaImage>, shift_x: i64) {
    let Some(page) = page else {
        return;
    };
    let (ox, oy) = center_offset(page.width(), page.height(), canvas.width(), canvas.height());
    canvas.blit(page, ox as i64 + shift_x, oy as i64);
}

fn draw_notice(canvas: &mut Canvas<'_>, font: &FontArc, notice: Notice) {
    let text = notice.message();
    let px = if notice.is_terminal() {
        TERMINAL_TEXT_PX
    } else {
        NOTICE_TEXT_PX
    };
    let text_w = text_width(font, text, px);
    let pad = px * 0.6;
    let box_w = text_w + pad * 2.0;
    let box_h = px + pad * 2.0;
    let box_x = (canvas.width() as f32 - box_w) / 2.0;
    let box_y = if notice.is_terminal() {
        (canvas.height() as f32 - box_h) / 2.0
    } else {
        canvas.height() as f32 - box_h - px * 2.0
    };
    canvas.fill_rect(
        box_x.round() as i64,
        box_y.round() as i64,
        box_w.round().max(1.0) as u32,
        box_h.round().max(1.0) as u32,
        Color::from_rgb(0x101418),
        0.78,
    );
    canvas.draw_text(
        font,
        text,
        px,
        box_x + pad,
        box_y + pad,
        Color::from_rgb(0xf2f2f2),
    );
}

impl ApplicationHandler<ViewerEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }
        if let Err(err) = self.ensure_window(event_loop) {
            error!(error = ?err, "failed to initialize viewer window");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("viewer window closed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = window.inner_size();
                self.handle_resize(size);
            }
            WindowEvent::RedrawRequested => self.render(),
            _ => {}
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Command(command) => self.handle_command(command),
            ViewerEvent::Loader(loaded) => self.handle_loader(loaded),
            ViewerEvent::Cancelled => {
                info!("viewer received cancellation event");
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.flush_load_requests();
        let wake = self.tick(Instant::now());
        if self.needs_redraw {
            self.needs_redraw = false;
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }
        let retry_loads = (!self.pending_loads.is_empty()).then(|| Instant::now() + FRAME_INTERVAL);
        match wake.into_iter().chain(retry_loads).min() {
            Some(at) => event_loop.set_control_flow(ControlFlow::WaitUntil(at)),
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }
}

fn load_font() -> Result<FontArc> {
    let mut db = Database::new();
    db.load_system_fonts();

    let preferred_families = [
        Family::Name("Noto Sans"),
        Family::Name("DejaVu Sans"),
        Family::SansSerif,
    ];
    for family in preferred_families {
        if let Some(id) = db.query(&Query {
            families: &[family],
            ..Default::default()
        }) && let Some(font) = load_face(&db, id)?
        {
            return Ok(font);
        }
    }
    for face in db.faces() {
        if let Some(font) = load_face(&db, face.id)? {
            return Ok(font);
        }
    }
    Err(anyhow!("no usable system font found"))
}

fn load_face(db: &Database, id: fontdb::ID) -> Result<Option<FontArc>> {
    let face = db.face(id).context("missing font face in database")?;
    let data = match &face.source {
        Source::Binary(data) => data.as_ref().as_ref().to_vec(),
        Source::File(path) => {
            fs::read(path).with_context(|| format!("failed to read font at {}", path.display()))?
        }
        Source::SharedFile(_, data) => data.as_ref().as_ref().to_vec(),
    };
    Ok(FontArc::try_from_vec(data).ok())
}

/// Runs the carousel window on the calling thread until it closes or `cancel` fires.
///
/// Controller commands and loader results are forwarded into the event loop;
/// settled pages go back to the controller and decode requests to the loader.
pub fn run_windowed(
    mut control: CommandReceiver,
    mut from_loader: LoaderReceiver,
    to_loader: LoadSender,
    to_controller: SelectedSender,
    cancel: CancellationToken,
    carousel: &CarouselOptions,
    options: ViewerOptions,
) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build viewer event loop")?;

    let forward_task = {
        let proxy = event_loop.create_proxy();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => ViewerEvent::Cancelled,
                    Some(command) = control.recv() => ViewerEvent::Command(command),
                    Some(loaded) = from_loader.recv() => ViewerEvent::Loader(loaded),
                    else => break,
                };
                let done = matches!(event, ViewerEvent::Cancelled);
                if proxy.send_event(event).is_err() || done {
                    break;
                }
            }
        })
    };

    let mut app = ViewerApp::new(
        options,
        carousel.slide_duration,
        cancel,
        to_loader,
        to_controller,
    );
    let run_result = event_loop.run_app(&mut app);
    forward_task.abort();

    run_result.context("viewer event loop failed")
}
