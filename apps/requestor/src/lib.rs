//! Interactive txt2img requestor.
//!
//! Hires instances from the marketplace, polls them, and once one runs asks for a prompt and
//! saves the first generated image.

pub mod cli;
pub mod driver;
pub mod logging;
pub mod prompt;
pub mod session;

pub use cli::Args;
pub use driver::{DEFAULT_CALL_GRACE, Driver, DriverOptions, DriverSummary, output_path};
pub use logging::init_tracing;
pub use prompt::{PromptSource, ScriptedPrompts, StdinPrompts};
pub use session::{SessionTuning, demo_providers, run_session};
