//! Listeners the harness registers itself, driven by configuration.

mod heap_dump;
mod journal;
mod logging;
mod quit_on_error;
mod screenshot;

pub use heap_dump::HeapDumpListener;
pub use journal::JournalListener;
pub use logging::LoggingListener;
pub use quit_on_error::QuitOnErrorListener;
pub use screenshot::ScreenshotListener;
