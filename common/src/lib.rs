pub mod chime;
pub mod config;
pub mod connectivity;
pub mod display;
pub mod events;
pub mod session;
pub mod status;
pub mod timer;

pub use chime::{ChimeAction, ChimeEngine, CHIME_HOLD_MS};
pub use config::{ConfigDraft, DeviceConfig, PendingConfigSave};
pub use connectivity::{ConnectivityState, LinkSupervisor};
pub use display::{DisplayMode, DisplayPresenter, Frame, RenderRequest, StatusFrame};
pub use events::{ControlEvent, EventQueue};
pub use session::{BrokerSession, BrokerSessionState};
pub use status::StatusReport;
pub use timer::{IntervalTimer, RecencyWindow};
