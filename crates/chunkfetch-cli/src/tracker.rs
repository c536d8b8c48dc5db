use std::sync::Arc;

use chunkfetch::{FetchPhase, Progress, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;

const PB_STYLE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

static PB_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| {
    let pb_style = match ProgressStyle::with_template(PB_STYLE) {
        Ok(pb_style) => pb_style.tick_chars(TICK).progress_chars(PB_CHARS),
        Err(_) => return None,
    };

    Some(pb_style)
});

/// Progress bar fed by the download's progress callback.
#[derive(Clone)]
pub struct ProgressTracker {
    pub pb: ProgressBar,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let pb = ProgressBar::no_length();
        if let Some(style) = PB_TEMPLATE.as_ref() {
            pb.set_style(style.clone());
        }
        ProgressTracker { pb }
    }

    pub fn callback(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |progress: &Progress| {
            if let Some(total) = progress.total_bytes
                && pb.length() != Some(total)
            {
                pb.set_length(total);
            }
            if progress.phase == FetchPhase::Downloading {
                pb.set_position(progress.bytes_received);
            }
            pb.set_message(phase_label(progress.phase));
        })
    }

    pub fn finish(&self, msg: Option<String>) {
        match msg {
            Some(msg) => self.pb.finish_with_message(msg),
            None => self.pb.finish(),
        }
    }
}

fn phase_label(phase: FetchPhase) -> &'static str {
    match phase {
        FetchPhase::Probing => "probing",
        FetchPhase::Downloading => "downloading",
        FetchPhase::Assembling => "assembling",
        FetchPhase::Verifying => "verifying",
        FetchPhase::Completed => "done",
    }
}
