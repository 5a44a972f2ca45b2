//! Amnesia Reader
//!
//! Interaction engine for a reflowable e-book reader. It keeps highlight and
//! search overlays in sync with an opaque paginating renderer, serializes
//! viewport moves, runs cancellable full-book search, narrates pages aloud
//! and pushes display preferences into the renderer.
//!
//! # Modules
//!
//! - `session`: wires every component to one mounted renderer
//! - `navigation`: single-worker queue for viewport moves
//! - `annotations`: highlights, bookmarks and marker reconciliation
//! - `search`: chunked, cancellable full-text search
//! - `narration`: continuous text-to-speech across pages
//! - `display`: font, line height, theme and rotation preferences
//! - `renderer`: the renderer boundary and a headless implementation

pub mod annotations;
pub mod config;
pub mod debounce;
pub mod display;
pub mod error;
pub mod location;
pub mod narration;
pub mod navigation;
pub mod position;
pub mod renderer;
pub mod search;
pub mod session;
pub mod settings;
pub mod store;

pub use config::EngineConfig;
pub use error::{ErrorCallback, ReaderError, Result};
pub use location::{Location, LocationId};
pub use navigation::{NavigationSequencer, Navigator};
pub use renderer::{MemoryRenderer, Renderer, RendererHandle};
pub use session::{ReaderSession, SessionServices};
pub use store::{AnnotationStore, MemoryStore, StoreScope};
