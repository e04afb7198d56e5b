use std::path::Path;
use std::time::Duration;

use crate::error::{ErrorSeverity, PlayerError};
use crate::models::{PlaybackState, TrackPosition};
use crate::playback::EngineStatus;

/// Status display formatter for the host CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Engine state, current track, sink and pipeline identity
    pub fn display_full_status(status: &EngineStatus, position: Option<TrackPosition>) {
        println!("┌─ Storybox ──────────────────────────────────────────────┐");
        println!("│ State: {}", status.state);

        match &status.track {
            Some(track) => {
                println!("│ Track: {}", Self::truncate(&Self::track_name(track), 50));
                if let Some(position) = position {
                    println!("│ Album position: {}", position);
                }
                if let Some(elapsed) = status.position {
                    println!("│ Position: {}", Self::format_duration(elapsed));
                }
            }
            None => println!("│ No track loaded"),
        }

        if let Some(effect) = &status.effect {
            println!("│ Effect: {}", Self::truncate(&Self::track_name(effect), 49));
        }

        if let Some(snapshot) = &status.pipeline {
            println!("│");
            println!("│ Sink: {}", snapshot.sink_kind);
            println!(
                "│ Pipeline: {} (reader {}, decoder {}, sink {}{})",
                snapshot.pipeline,
                snapshot.reader,
                snapshot.decoder,
                snapshot.sink,
                match snapshot.cipher {
                    Some(id) => format!(", cipher {}", id),
                    None => String::new(),
                }
            );
        }

        if let Some(record) = &status.tracking {
            println!("│ Listened: {}", Self::format_duration(record.played()));
        }
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// One line, printed when the poller starts a new track
    pub fn display_now_playing(track: &Path, position: Option<TrackPosition>) {
        match position {
            Some(position) => println!("Now playing [{}]: {}", position, Self::track_name(track)),
            None => println!("Now playing: {}", Self::track_name(track)),
        }
    }

    pub fn display_state(state: PlaybackState) {
        println!("{}", state);
    }

    /// Display error message with formatting and recovery suggestions
    pub fn display_error(error: &PlayerError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!("┌─ {} {} ─────────────────────────────────────────────────┐", severity_icon, severity.as_str());
        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("│");
            eprintln!("│ Suggestions:");
            for suggestion in suggestions.iter().take(3) {
                for line in Self::wrap_text(&format!("• {}", suggestion), 53) {
                    eprintln!("│   {}", line);
                }
            }
        }
        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display a simple error message for non-interactive contexts
    pub fn display_simple_error(error: &PlayerError) {
        eprintln!("[{}] {}", error.severity().as_str(), error.user_message());
        if let Some(suggestion) = error.recovery_suggestions().first() {
            eprintln!("Suggestion: {}", suggestion);
        }
    }

    fn track_name(path: &Path) -> String {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    /// Wrap text to fit within specified width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + word.len() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(std::mem::take(&mut current_line));
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines
    }

    /// Format duration as MM:SS or HH:MM:SS for longer tracks
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }
}
