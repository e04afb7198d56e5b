use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

use crate::models::{AutoPlayMode, EncryptionHint, PlaybackMode, SinkPreference};

pub mod status;
pub use status::StatusDisplay;

/// Storybox playback host
#[derive(Debug, Parser)]
#[command(name = "storybox")]
#[command(about = "Plays Storybox albums and sound effects through the playback engine")]
#[command(version = "0.1.0")]
pub struct CliApp {
    /// Configuration file (defaults to ~/.config/storybox/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output sink: auto, local or wireless
    #[arg(long, global = true)]
    pub sink: Option<SinkPreference>,

    /// Shuffle the album
    #[arg(long, global = true)]
    pub shuffle: bool,

    /// What happens at the end of an album: off, repeat-folder or cycle-all
    #[arg(long, global = true)]
    pub auto_play: Option<AutoPlayMode>,

    /// Treat the library as unencrypted audio
    #[arg(long, global = true)]
    pub plain: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Play an album directory, or every album under a library directory
    Play {
        album: PathBuf,
    },
    /// Play a single sound effect and exit
    Effect {
        file: PathBuf,
    },
}

/// Commands accepted on stdin while the host is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveCommand {
    Pause,
    Resume,
    Stop,
    Next,
    Prev,
    Effect(PathBuf),
    Mode(PlaybackMode),
    AutoPlay(AutoPlayMode),
    Reshuffle,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command '{command}'")]
    UnknownCommand { command: String },

    #[error("'{command}' needs a {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid {argument} '{value}': {reason}")]
    InvalidArgument {
        argument: String,
        value: String,
        reason: String,
    },
}

impl CliApp {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn playback_mode(&self) -> Option<PlaybackMode> {
        self.shuffle.then_some(PlaybackMode::Shuffle)
    }

    pub fn encryption_hint(&self) -> EncryptionHint {
        if self.plain {
            EncryptionHint::Plain
        } else {
            EncryptionHint::Unknown
        }
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home_dir) => home_dir.join(rest),
                None => PathBuf::from(path),
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }

    /// Parse one line of interactive input. Single letters mirror the toy's buttons.
    pub fn parse_command(input: &str) -> Result<InteractiveCommand, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        let Some((&head, rest)) = args.split_first() else {
            return Err(ParseError::EmptyCommand);
        };

        match head {
            "p" | "pause" => Ok(InteractiveCommand::Pause),
            "r" | "resume" | "play" => Ok(InteractiveCommand::Resume),
            "s" | "stop" => Ok(InteractiveCommand::Stop),
            "n" | "next" => Ok(InteractiveCommand::Next),
            "b" | "prev" | "previous" => Ok(InteractiveCommand::Prev),
            "e" | "effect" => {
                if rest.is_empty() {
                    return Err(ParseError::MissingArgument {
                        command: "effect".to_string(),
                        argument: "file".to_string(),
                    });
                }
                Ok(InteractiveCommand::Effect(Self::expand_path(&rest.join(" "))))
            }
            "m" | "mode" => {
                let value = single_argument("mode", "playback mode", rest)?;
                value
                    .parse::<PlaybackMode>()
                    .map(InteractiveCommand::Mode)
                    .map_err(|reason| invalid("playback mode", value, reason))
            }
            "a" | "auto" => {
                let value = single_argument("auto", "auto-play mode", rest)?;
                value
                    .parse::<AutoPlayMode>()
                    .map(InteractiveCommand::AutoPlay)
                    .map_err(|reason| invalid("auto-play mode", value, reason))
            }
            "x" | "reshuffle" => Ok(InteractiveCommand::Reshuffle),
            "i" | "status" => Ok(InteractiveCommand::Status),
            "h" | "help" | "?" => Ok(InteractiveCommand::Help),
            "q" | "quit" | "exit" => Ok(InteractiveCommand::Quit),
            other => Err(ParseError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }

    pub fn display_help() {
        println!("Storybox - Available Commands:");
        println!();
        println!("Buttons:");
        println!("  p, pause            - Pause playback");
        println!("  r, resume           - Resume playback");
        println!("  s, stop             - Stop playback");
        println!("  n, next             - Next track");
        println!("  b, prev             - Previous track");
        println!("  e, effect <file>    - Play a sound effect over the current track");
        println!();
        println!("Settings:");
        println!("  m, mode <sequential|shuffle>            - Playback order");
        println!("  a, auto <off|repeat-folder|cycle-all>   - End of album behaviour");
        println!("  x, reshuffle                            - New shuffle order");
        println!();
        println!("General:");
        println!("  i, status           - Show engine status");
        println!("  h, help             - Show this help message");
        println!("  q, quit             - Exit");
    }
}

fn single_argument<'a>(command: &str, argument: &str, rest: &[&'a str]) -> Result<&'a str, ParseError> {
    rest.first().copied().ok_or_else(|| ParseError::MissingArgument {
        command: command.to_string(),
        argument: argument.to_string(),
    })
}

fn invalid(argument: &str, value: &str, reason: String) -> ParseError {
    ParseError::InvalidArgument {
        argument: argument.to_string(),
        value: value.to_string(),
        reason,
    }
}
