//! Session handling, extraction, retry and polling.

pub mod driver;
pub mod events;
pub mod extract;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod webdriver;

pub use driver::{BrowserDriver, DriverError, LaunchOptions, PageHandle};
pub use events::{EventBus, UsageEvent};
pub use extract::ExtractionPipeline;
pub use models::{
    CapId, Confidence, CyclePayload, PayloadStatus, RawReading, SessionCredential, UsageReading,
};
pub use monitor::UsageMonitor;
pub use retry::{Classification, RetryPolicy};
pub use scheduler::{CycleOutcome, CycleRecorder, SchedulerHandle, SchedulerState};
pub use session::{SessionController, SessionSettings, SessionState, SessionStatus};
pub use webdriver::WebDriverClient;
