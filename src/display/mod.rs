//! Display options
//!
//! Font, spacing, rotation and theme changes are persisted and pushed to the
//! renderer at once. Changes that reflow text also schedule a highlight
//! redraw once the reader stops adjusting.

mod types;

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::debounce::Debouncer;
use crate::error::{self, ErrorCallback};
use crate::renderer::RendererHandle;
use crate::settings::{self, SettingsStore};

pub use types::{
    line_height_tenths, normalize_font_size, normalize_rotation, DisplayStyle, FontFamily, Theme,
    FONT_SIZE_STEP, MAX_FONT_SIZE, MAX_LINE_HEIGHT, MIN_FONT_SIZE, MIN_LINE_HEIGHT,
};

const FONT_SIZE_KEY: &str = "reader.fontSize";
const FONT_FAMILY_KEY: &str = "reader.fontFamily";
const LINE_HEIGHT_KEY: &str = "reader.lineHeight";
const THEME_KEY: &str = "reader.theme";
const ROTATION_KEY_PREFIX: &str = "reader.rotation.";

/// Work to run after a reflowing change settles
pub type RedrawCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct DisplaySynchronizer {
    book_id: String,
    renderer: RendererHandle,
    settings: Arc<dyn SettingsStore>,
    style: RwLock<DisplayStyle>,
    debounce: Debouncer,
    on_redraw: RedrawCallback,
    on_error: ErrorCallback,
}

impl DisplaySynchronizer {
    pub fn new(
        book_id: impl Into<String>,
        renderer: RendererHandle,
        settings: Arc<dyn SettingsStore>,
        debounce: std::time::Duration,
        on_redraw: RedrawCallback,
        on_error: ErrorCallback,
    ) -> Self {
        let book_id = book_id.into();
        let style = load_style(settings.as_ref(), &book_id);
        tracing::debug!(book_id = %book_id, ?style, "Display options loaded");

        Self {
            book_id,
            renderer,
            settings,
            style: RwLock::new(style),
            debounce: Debouncer::new(debounce),
            on_redraw,
            on_error,
        }
    }

    pub fn style(&self) -> DisplayStyle {
        self.style.read().clone()
    }

    /// Push the current style to the renderer
    pub fn apply(&self) {
        if let Some(renderer) = self.renderer.get() {
            renderer.apply_style(&self.style());
        }
    }

    pub fn increase_font_size(&self) -> u16 {
        let size = self.style.read().font_size;
        self.set_font_size(size.saturating_add(FONT_SIZE_STEP))
    }

    pub fn decrease_font_size(&self) -> u16 {
        let size = self.style.read().font_size;
        self.set_font_size(size.saturating_sub(FONT_SIZE_STEP))
    }

    /// Set the font size in percent, clamped to 50-200 in steps of 10
    pub fn set_font_size(&self, size: u16) -> u16 {
        let size = normalize_font_size(size);
        if self.update(|style| style.font_size = size) {
            self.persist(FONT_SIZE_KEY, &size);
            self.changed(true);
        }
        size
    }

    pub fn toggle_font_family(&self) -> FontFamily {
        let family = self.style.read().font_family.toggled();
        self.set_font_family(family)
    }

    pub fn set_font_family(&self, family: FontFamily) -> FontFamily {
        if self.update(|style| style.font_family = family) {
            self.persist(FONT_FAMILY_KEY, &family);
            self.changed(true);
        }
        family
    }

    pub fn increase_line_height(&self) -> f32 {
        let tenths = self.style.read().line_height;
        self.set_line_height_tenths(tenths.saturating_add(1))
    }

    pub fn decrease_line_height(&self) -> f32 {
        let tenths = self.style.read().line_height;
        self.set_line_height_tenths(tenths.saturating_sub(1))
    }

    /// Set line height, clamped to 1.0-2.5 in steps of 0.1
    pub fn set_line_height(&self, value: f32) -> f32 {
        self.set_line_height_tenths(line_height_tenths(value))
    }

    fn set_line_height_tenths(&self, tenths: u8) -> f32 {
        let tenths = tenths.clamp(MIN_LINE_HEIGHT, MAX_LINE_HEIGHT);
        if self.update(|style| style.line_height = tenths) {
            self.persist(LINE_HEIGHT_KEY, &(f32::from(tenths) / 10.0));
            self.changed(true);
        }
        f32::from(tenths) / 10.0
    }

    /// Rotate a quarter turn clockwise; four turns return to 0
    pub fn rotate_page(&self) -> u16 {
        let rotation = self.style.read().rotation;
        self.set_rotation((rotation + 90) % 360)
    }

    pub fn set_rotation(&self, degrees: u16) -> u16 {
        let rotation = normalize_rotation(degrees);
        if self.update(|style| style.rotation = rotation) {
            let key = format!("{}{}", ROTATION_KEY_PREFIX, self.book_id);
            self.persist(&key, &rotation);
            self.changed(false);
        }
        rotation
    }

    pub fn set_theme(&self, theme: Theme) {
        let persisted = theme.clone();
        if self.update(|style| style.theme = theme) {
            self.persist(THEME_KEY, &persisted);
            self.changed(false);
        }
    }

    /// Apply `change`; returns whether the style actually changed
    fn update(&self, change: impl FnOnce(&mut DisplayStyle)) -> bool {
        let mut style = self.style.write();
        let before = style.clone();
        change(&mut *style);
        *style != before
    }

    fn persist<T: serde::Serialize>(&self, key: &str, value: &T) {
        if let Err(err) = settings::save(self.settings.as_ref(), key, value) {
            error::report(&self.on_error, "Failed to save display option", &err);
        }
    }

    fn changed(&self, reflows: bool) {
        self.apply();
        if reflows {
            let redraw = self.on_redraw.clone();
            self.debounce.schedule(async move { redraw().await });
        }
    }
}

fn load_style(store: &dyn SettingsStore, book_id: &str) -> DisplayStyle {
    let defaults = DisplayStyle::default();
    DisplayStyle {
        font_size: settings::load::<u16>(store, FONT_SIZE_KEY)
            .map(normalize_font_size)
            .unwrap_or(defaults.font_size),
        font_family: settings::load(store, FONT_FAMILY_KEY).unwrap_or(defaults.font_family),
        line_height: settings::load::<f32>(store, LINE_HEIGHT_KEY)
            .map(line_height_tenths)
            .unwrap_or(defaults.line_height),
        rotation: settings::load::<u16>(store, &format!("{}{}", ROTATION_KEY_PREFIX, book_id))
            .map(normalize_rotation)
            .unwrap_or(defaults.rotation),
        theme: settings::load(store, THEME_KEY).unwrap_or(defaults.theme),
    }
}

impl std::fmt::Debug for DisplaySynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySynchronizer")
            .field("book_id", &self.book_id)
            .field("style", &*self.style.read())
            .finish()
    }
}
