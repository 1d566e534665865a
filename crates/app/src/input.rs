use std::{
    io::{self, stdout},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossterm::{
    event::{
        self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
        KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    terminal, ExecutableCommand,
};
use visual_hive_core::{Event, EventQueue, RunFlag};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Without release reports a held key is seen as a stream of repeats; once
/// they stop for this long the key counts as released.
const HOLD_TIMEOUT: Duration = Duration::from_millis(550);

/// Raw mode for the lifetime of the guard, with key release reporting when
/// the terminal supports it.
pub struct RawModeGuard {
    reports_release: bool,
}

impl RawModeGuard {
    pub fn new() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut guard = Self {
            reports_release: false,
        };

        if terminal::supports_keyboard_enhancement().unwrap_or(false) {
            stdout().execute(PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES,
            ))?;
            guard.reports_release = true;
        }
        Ok(guard)
    }

    /// Whether the terminal sends key release events.
    pub fn reports_release(&self) -> bool {
        self.reports_release
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.reports_release {
            let _ = stdout().execute(PopKeyboardEnhancementFlags);
        }
        let _ = terminal::disable_raw_mode();
    }
}

/// Reads terminal keys on a dedicated thread and enqueues them.
pub fn spawn(
    events: Arc<EventQueue>,
    running: RunFlag,
    held_key: char,
    reports_release: bool,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("input".into())
        .spawn(move || {
            let mut reader = KeyReader {
                events,
                running,
                held_key,
                reports_release,
                held_since: None,
            };
            if let Err(err) = reader.run() {
                tracing::warn!(%err, "input thread stopped");
            }
        })
}

struct KeyReader {
    events: Arc<EventQueue>,
    running: RunFlag,
    held_key: char,
    reports_release: bool,
    held_since: Option<Instant>,
}

impl KeyReader {
    fn run(&mut self) -> io::Result<()> {
        while self.running.is_running() {
            if event::poll(POLL_INTERVAL)? {
                if let TermEvent::Key(key) = event::read()? {
                    self.on_key(key);
                }
            }
            self.expire_hold(Instant::now());
        }
        Ok(())
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.running.stop();
            return;
        }
        let Some(code) = key_char(key.code) else {
            return;
        };

        match key.kind {
            KeyEventKind::Press => {
                if code == self.held_key {
                    self.held_since = Some(Instant::now());
                }
                self.push(Event::key_down(code));
            }
            KeyEventKind::Repeat if code == self.held_key => {
                self.held_since = Some(Instant::now());
            }
            KeyEventKind::Repeat => {}
            KeyEventKind::Release => {
                if code == self.held_key {
                    self.held_since = None;
                }
                self.push(Event::key_up(code));
            }
        }
    }

    fn expire_hold(&mut self, now: Instant) {
        if self.reports_release {
            return;
        }
        if let Some(since) = self.held_since {
            if now.saturating_duration_since(since) >= HOLD_TIMEOUT {
                self.held_since = None;
                self.push(Event::key_up(self.held_key));
            }
        }
    }

    fn push(&self, event: Event) {
        if let Err(err) = self.events.push(event) {
            tracing::warn!(%err, "dropped key event");
        }
    }
}

fn key_char(code: KeyCode) -> Option<char> {
    match code {
        KeyCode::Char(c) => Some(c.to_ascii_lowercase()),
        KeyCode::Esc => Some('\u{1b}'),
        KeyCode::Enter => Some('\n'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(reports_release: bool) -> KeyReader {
        KeyReader {
            events: Arc::new(EventQueue::unbounded()),
            running: RunFlag::new(),
            held_key: 's',
            reports_release,
            held_since: None,
        }
    }

    fn key(code: char, kind: KeyEventKind) -> KeyEvent {
        KeyEvent::new_with_kind(KeyCode::Char(code), KeyModifiers::NONE, kind)
    }

    #[test]
    fn repeats_do_not_retrigger() {
        let mut reader = reader(true);
        reader.on_key(key('B', KeyEventKind::Press));
        reader.on_key(key('b', KeyEventKind::Repeat));
        reader.on_key(key('b', KeyEventKind::Release));

        let events = reader.events.drain().unwrap();
        assert_eq!(events, vec![Event::key_down('b'), Event::key_up('b')]);
    }

    #[test]
    fn hold_expires_without_release_reports() {
        let mut reader = reader(false);
        reader.on_key(key('s', KeyEventKind::Press));
        let pressed = reader.held_since.unwrap();

        reader.expire_hold(pressed + Duration::from_millis(100));
        assert_eq!(reader.events.len(), 1);

        reader.expire_hold(pressed + HOLD_TIMEOUT);
        let events = reader.events.drain().unwrap();
        assert_eq!(events, vec![Event::key_down('s'), Event::key_up('s')]);
        assert!(reader.held_since.is_none());
    }

    #[test]
    fn ctrl_c_stops_everything() {
        let mut reader = reader(true);
        reader.on_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(!reader.running.is_running());
        assert!(reader.events.is_empty());
    }
}
