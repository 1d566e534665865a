use std::{
    io::{self, Write},
    time::{Duration, Instant},
};

use crossterm::{
    cursor, queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use visual_hive_core::{ComposedFrame, Display, FrameContent, Result, StatusHandle, TransitionStatus};

const REFRESH: Duration = Duration::from_millis(100);

/// Terminal stand-in for the output window: one status line, refreshed a
/// few times per second.
pub struct StatusDisplay<W: Write> {
    title: String,
    status: StatusHandle,
    out: W,
    last_draw: Option<Instant>,
}

impl<W: Write> StatusDisplay<W> {
    pub fn new(title: impl Into<String>, status: StatusHandle, out: W) -> Self {
        Self {
            title: title.into(),
            status,
            out,
            last_draw: None,
        }
    }

    fn due(&self, now: Instant) -> bool {
        self.last_draw
            .map_or(true, |last| now.saturating_duration_since(last) >= REFRESH)
    }
}

impl<W: Write> Display for StatusDisplay<W> {
    fn present(&mut self, frame: &ComposedFrame) -> Result<()> {
        let now = Instant::now();
        if !self.due(now) {
            return Ok(());
        }
        self.last_draw = Some(now);

        let status = self.status.snapshot()?;
        let line = status_line(&self.title, frame, &status);
        queue!(
            self.out,
            cursor::MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        )?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Drop for StatusDisplay<W> {
    fn drop(&mut self) {
        let _ = writeln!(self.out, "\r");
        let _ = self.out.flush();
    }
}

fn status_line(title: &str, frame: &ComposedFrame, status: &TransitionStatus) -> String {
    let name = |asset: &Option<std::sync::Arc<visual_hive_core::AssetDescriptor>>| {
        asset.as_ref().map_or("-".to_string(), |asset| asset.name.clone())
    };

    let picture = match &frame.content {
        FrameContent::Flash { .. } => "FLASH".to_string(),
        FrameContent::Composite { overlay, .. } => match overlay {
            Some(overlay) => format!("overlay x{:.2}", overlay.scale),
            None => "no overlay".to_string(),
        },
    };

    let mut cue = if status.cue_mode { "cue on" } else { "cue off" }.to_string();
    if status.queued_background.is_some() || status.queued_foreground.is_some() {
        cue.push_str(&format!(
            " [{} / {}]",
            name(&status.queued_background),
            name(&status.queued_foreground)
        ));
    }

    format!(
        "{title} | beat {:>8.2} | {:>6.1} bpm | bg {} | fg {} | {cue} | {picture}",
        frame.beat,
        frame.bpm,
        name(&status.background),
        name(&status.foreground),
    )
}

/// Status display writing to standard output.
pub fn stdout_display(title: &str, status: StatusHandle) -> StatusDisplay<io::Stdout> {
    StatusDisplay::new(title, status, io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use visual_hive_core::{AssetDescriptor, AssetSource, Layer, Rgb};

    fn frame(content: FrameContent) -> ComposedFrame {
        ComposedFrame {
            sequence: 0,
            beat: 12.5,
            bpm: 128.0,
            content,
        }
    }

    #[test]
    fn status_line_lists_assets_and_queue() {
        let status = TransitionStatus {
            background: Some(Arc::new(AssetDescriptor::new(
                "plasma",
                Layer::Background,
                AssetSource::Solid { color: Rgb::BLACK },
            ))),
            queued_background: Some(Arc::new(AssetDescriptor::new(
                "aurora",
                Layer::Background,
                AssetSource::Solid { color: Rgb::WHITE },
            ))),
            cue_mode: true,
            ..TransitionStatus::default()
        };
        let line = status_line("hive", &frame(FrameContent::Flash { color: Rgb::WHITE }), &status);

        assert!(line.starts_with("hive | beat    12.50 |  128.0 bpm"));
        assert!(line.contains("bg plasma | fg -"));
        assert!(line.contains("cue on [aurora / -]"));
        assert!(line.ends_with("FLASH"));
    }

    #[test]
    fn present_is_rate_limited() {
        let mut display = StatusDisplay::new("hive", StatusHandle::default(), Vec::new());
        let content = FrameContent::Composite {
            background: None,
            overlay: None,
        };
        display.present(&frame(content.clone())).unwrap();
        let written = display.out.len();
        assert!(written > 0);

        display.present(&frame(content)).unwrap();
        assert_eq!(display.out.len(), written);
    }
}
