//! Speech output through a local text-to-speech program
//!
//! Each utterance runs the configured program (`say`, `espeak-ng`, ...).
//! Configured arguments come first, then the voice and prosody flags the
//! program understands, then `--` and the text, so reply text is never
//! parsed as an option. Cancelling kills the child.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{EngineError, SynthesisEngine, SynthesisEvent, Utterance};

/// Words per minute both `say` and `espeak-ng` use at rate 1.0
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// Built-in macOS voices for common storefront locales
const SAY_VOICES: &[(&str, &str)] = &[
    ("en-us", "Samantha"),
    ("en-gb", "Daniel"),
    ("en-au", "Karen"),
    ("fr-fr", "Thomas"),
    ("fr-ca", "Amelie"),
    ("de-de", "Anna"),
    ("es-es", "Monica"),
    ("es-mx", "Paulina"),
    ("it-it", "Alice"),
    ("pt-br", "Luciana"),
    ("nl-nl", "Xander"),
    ("ja-jp", "Kyoko"),
    ("ko-kr", "Yuna"),
    ("zh-cn", "Ting-Ting"),
    ("ru-ru", "Milena"),
];

/// Option dialect of the configured program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Espeak,
    Say,
    /// Unknown program: text only
    Plain,
}

impl Flavor {
    fn detect(program: &str) -> Self {
        match Path::new(program).file_name().and_then(|name| name.to_str()) {
            Some("espeak" | "espeak-ng") => Flavor::Espeak,
            Some("say") => Flavor::Say,
            _ => Flavor::Plain,
        }
    }
}

/// Pick a `say` voice for a BCP 47 tag, falling back to the language alone
fn say_voice(locale: &str) -> Option<&'static str> {
    let tag = locale.replace('_', "-").to_ascii_lowercase();
    let language = tag.split('-').next().unwrap_or_default();

    SAY_VOICES
        .iter()
        .find(|(voice_tag, _)| *voice_tag == tag)
        .or_else(|| {
            SAY_VOICES
                .iter()
                .find(|(voice_tag, _)| voice_tag.split('-').next() == Some(language))
        })
        .map(|(_, voice)| *voice)
}

/// Synthesis engine that shells out to a TTS program
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    flavor: Flavor,
    /// Whether the program resolved on PATH when configured
    installed: bool,
    /// Cancels the running child when fired or dropped
    running: Option<oneshot::Sender<()>>,
}

impl CommandSynthesizer {
    /// Build from a command line such as `espeak-ng -s 160`
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;

        let installed = which::which(&program).is_ok();
        if !installed {
            warn!(%program, "text-to-speech program not found");
        }

        Some(Self {
            flavor: Flavor::detect(&program),
            program,
            args: parts.collect(),
            installed,
            running: None,
        })
    }

    /// Full argument list for one utterance
    fn command_args(&self, utterance: &Utterance) -> Vec<String> {
        let mut args = self.args.clone();

        match self.flavor {
            Flavor::Espeak => {
                args.push("-v".to_string());
                args.push(utterance.locale.replace('_', "-").to_ascii_lowercase());
                if utterance.rate != 1.0 {
                    args.push("-s".to_string());
                    args.push(words_per_minute(utterance.rate).to_string());
                }
                if utterance.pitch != 1.0 {
                    args.push("-p".to_string());
                    args.push(((50.0 * utterance.pitch).round() as u32).min(99).to_string());
                }
                if utterance.volume != 1.0 {
                    args.push("-a".to_string());
                    args.push(((100.0 * utterance.volume).round() as u32).min(200).to_string());
                }
            }
            Flavor::Say => {
                match say_voice(&utterance.locale) {
                    Some(voice) => {
                        args.push("-v".to_string());
                        args.push(voice.to_string());
                    }
                    None => debug!(locale = %utterance.locale, "no say voice for locale"),
                }
                if utterance.rate != 1.0 {
                    args.push("-r".to_string());
                    args.push(words_per_minute(utterance.rate).to_string());
                }
            }
            Flavor::Plain => {}
        }

        args.push("--".to_string());
        args.push(utterance.text.clone());
        args
    }
}

fn words_per_minute(rate: f32) -> u32 {
    (BASE_WORDS_PER_MINUTE * rate.max(0.1)).round() as u32
}

impl SynthesisEngine for CommandSynthesizer {
    fn is_available(&self) -> bool {
        self.installed
    }

    fn speak(
        &mut self,
        utterance: Utterance,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> Result<(), EngineError> {
        self.cancel();

        let mut child = Command::new(&self.program)
            .args(self.command_args(&utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Failed(format!("{}: {e}", self.program)))?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.running = Some(cancel_tx);

        let id = utterance.id;
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let event = match status {
                        Ok(status) if status.success() => SynthesisEvent::Finished { id },
                        Ok(status) => SynthesisEvent::Failed {
                            id,
                            error: format!("synthesizer exited with {status}"),
                        },
                        Err(e) => SynthesisEvent::Failed { id, error: e.to_string() },
                    };
                    let _ = events.send(event);
                }
                _ = &mut cancel_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(?e, "failed to kill synthesizer");
                    }
                    debug!(utterance = id, "synthesizer cancelled");
                }
            }
        });

        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.running.take() {
            let _ = cancel.send(());
        }
    }
}
