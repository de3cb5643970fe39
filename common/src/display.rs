use crate::timer::RecencyWindow;

pub const DISPLAY_WINDOW_MS: u64 = 10_000;
pub const CHIME_RENDER_INTERVAL_MS: u64 = 200;
pub const STATUS_RENDER_INTERVAL_MS: u64 = 1_000;

pub const SPINNER_GLYPHS: [char; 4] = ['|', '/', '-', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Chime,
    Status,
    PowerSave,
}

/// What the presenter wants drawn this iteration. The caller fills in the
/// live status fields; the presenter only decides mode and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRequest {
    Chime,
    Status { spinner: char },
    PowerSave,
}

/// Live values shown on the status view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub ssid: String,
    pub rssi_dbm: Option<i8>,
    pub ip_address: String,
    pub broker_endpoint: String,
    pub broker_connected: bool,
    pub spinner: char,
}

/// A fully resolved frame, ready for the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chime,
    Status(StatusFrame),
    PowerSave,
}

/// Multiplexes the display between the chime view, the status view, and
/// power-save. Mode is a pure function of the two recency windows; chime
/// wins when both are open. Redraws are throttled per mode, and power-save
/// is rendered exactly once on entry so the panel can be put to sleep.
#[derive(Debug, Clone)]
pub struct DisplayPresenter {
    chime_window: RecencyWindow,
    status_window: RecencyWindow,
    last_mode: Option<DisplayMode>,
    last_render_ms: Option<u64>,
    spinner_index: usize,
}

impl DisplayPresenter {
    pub fn new() -> Self {
        Self {
            chime_window: RecencyWindow::new(DISPLAY_WINDOW_MS),
            status_window: RecencyWindow::new(DISPLAY_WINDOW_MS),
            last_mode: None,
            last_render_ms: None,
            spinner_index: 0,
        }
    }

    pub fn note_chime(&mut self, now_ms: u64) {
        self.chime_window.mark(now_ms);
    }

    pub fn note_status_request(&mut self, now_ms: u64) {
        self.status_window.mark(now_ms);
    }

    pub fn mode(&self, now_ms: u64) -> DisplayMode {
        if self.chime_window.is_open(now_ms) {
            DisplayMode::Chime
        } else if self.status_window.is_open(now_ms) {
            DisplayMode::Status
        } else {
            DisplayMode::PowerSave
        }
    }

    /// Decides whether a redraw is due this iteration.
    pub fn poll(&mut self, now_ms: u64) -> Option<RenderRequest> {
        let mode = self.mode(now_ms);
        let mode_changed = self.last_mode != Some(mode);

        let cadence_ms = match mode {
            DisplayMode::Chime => CHIME_RENDER_INTERVAL_MS,
            DisplayMode::Status => STATUS_RENDER_INTERVAL_MS,
            DisplayMode::PowerSave => {
                if !mode_changed {
                    return None;
                }
                self.last_mode = Some(mode);
                self.last_render_ms = Some(now_ms);
                return Some(RenderRequest::PowerSave);
            }
        };

        let due = mode_changed
            || match self.last_render_ms {
                Some(last) => now_ms.saturating_sub(last) >= cadence_ms,
                None => true,
            };
        if !due {
            return None;
        }

        self.last_mode = Some(mode);
        self.last_render_ms = Some(now_ms);

        match mode {
            DisplayMode::Chime => Some(RenderRequest::Chime),
            DisplayMode::Status => {
                let spinner = SPINNER_GLYPHS[self.spinner_index % SPINNER_GLYPHS.len()];
                self.spinner_index = self.spinner_index.wrapping_add(1);
                Some(RenderRequest::Status { spinner })
            }
            DisplayMode::PowerSave => unreachable!(),
        }
    }
}

impl Default for DisplayPresenter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_mode_at_every_instant() {
        let mut presenter = DisplayPresenter::new();
        presenter.note_chime(1_000);
        presenter.note_status_request(2_000);

        // chime window open until 11_000, status until 12_000
        assert_eq!(presenter.mode(5_000), DisplayMode::Chime);
        assert_eq!(presenter.mode(10_999), DisplayMode::Chime);
        assert_eq!(presenter.mode(11_000), DisplayMode::Status);
        assert_eq!(presenter.mode(11_999), DisplayMode::Status);
        assert_eq!(presenter.mode(12_000), DisplayMode::PowerSave);
    }

    #[test]
    fn chime_preempts_status() {
        let mut presenter = DisplayPresenter::new();
        presenter.note_status_request(0);
        assert_eq!(presenter.mode(100), DisplayMode::Status);

        presenter.note_chime(200);
        assert_eq!(presenter.mode(300), DisplayMode::Chime);
    }

    #[test]
    fn power_save_renders_once_on_entry() {
        let mut presenter = DisplayPresenter::new();

        assert_eq!(presenter.poll(0), Some(RenderRequest::PowerSave));
        assert_eq!(presenter.poll(10), None);
        assert_eq!(presenter.poll(60_000), None);
    }

    #[test]
    fn chime_view_renders_at_fast_cadence() {
        let mut presenter = DisplayPresenter::new();
        presenter.note_chime(0);

        assert_eq!(presenter.poll(0), Some(RenderRequest::Chime));
        assert_eq!(presenter.poll(100), None);
        assert_eq!(presenter.poll(199), None);
        assert_eq!(presenter.poll(200), Some(RenderRequest::Chime));
    }

    #[test]
    fn status_view_renders_at_slow_cadence_and_rotates_spinner() {
        let mut presenter = DisplayPresenter::new();
        presenter.note_status_request(0);

        let first = presenter.poll(0);
        assert_eq!(first, Some(RenderRequest::Status { spinner: '|' }));
        assert_eq!(presenter.poll(500), None);
        assert_eq!(
            presenter.poll(1_000),
            Some(RenderRequest::Status { spinner: '/' })
        );
        assert_eq!(
            presenter.poll(2_000),
            Some(RenderRequest::Status { spinner: '-' })
        );
    }

    #[test]
    fn mode_change_forces_immediate_redraw() {
        let mut presenter = DisplayPresenter::new();
        presenter.note_status_request(0);
        assert_eq!(presenter.poll(0), Some(RenderRequest::Status { spinner: '|' }));

        // chime arrives between status redraws; no waiting on the cadence
        presenter.note_chime(100);
        assert_eq!(presenter.poll(110), Some(RenderRequest::Chime));
    }

    #[test]
    fn expiry_falls_through_to_power_save() {
        let mut presenter = DisplayPresenter::new();
        presenter.note_chime(0);

        assert_eq!(presenter.poll(0), Some(RenderRequest::Chime));
        assert_eq!(presenter.poll(10_000), Some(RenderRequest::PowerSave));
        assert_eq!(presenter.poll(10_010), None);
    }
}
