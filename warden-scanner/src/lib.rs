pub mod error;
pub mod exploit;
pub mod links;
pub mod render;
pub mod result;

#[cfg(feature = "browser")]
pub mod browser;

#[cfg(feature = "browser")]
pub use browser::ChromeRenderer;
pub use error::ScanError;
pub use exploit::ExploitExecutor;
pub use render::{HttpRenderer, Page, PageRenderer};
pub use result::{ExploitOutcome, Navigation};
