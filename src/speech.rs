use serde::{Deserialize, Serialize};
use std::io;
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_PREFERRED_VOICE: &str = "Google US English";
const DEFAULT_LOCALE: &str = "en-US";
const FIXED_PITCH: f32 = 1.0;
const MIN_RATE: f32 = 0.1;
const MAX_RATE: f32 = 10.0;
const ESPEAK_BASE_WPM: f32 = 175.0;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("failed to start speech engine {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<Voice>,
    pub lang: String,
    pub pitch: f32,
    pub rate: f32,
}

/// Text-to-speech engine provided by the host platform.
pub trait Speaker {
    fn voices(&self) -> Vec<Voice>;
    fn is_speaking(&mut self) -> bool;
    fn cancel(&mut self);
    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError>;

    /// Blocks until the current utterance has finished.
    fn wait_idle(&mut self) {}
}

impl<T: Speaker + ?Sized> Speaker for Box<T> {
    fn voices(&self) -> Vec<Voice> {
        (**self).voices()
    }

    fn is_speaking(&mut self) -> bool {
        (**self).is_speaking()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
        (**self).speak(utterance)
    }

    fn wait_idle(&mut self) {
        (**self).wait_idle()
    }
}

/// Playback speed multiplier, 1.0 being normal speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybackRate(f32);

impl PlaybackRate {
    /// Clamps to the supported range; non-finite input falls back to 1.0.
    pub fn new(value: f32) -> Self {
        if value.is_finite() {
            Self(value.clamp(MIN_RATE, MAX_RATE))
        } else {
            Self::default()
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for PlaybackRate {
    fn default() -> Self {
        Self(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePreferences {
    pub preferred_voice: String,
    pub locale: String,
}

impl Default for VoicePreferences {
    fn default() -> Self {
        Self {
            preferred_voice: DEFAULT_PREFERRED_VOICE.to_string(),
            locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

/// Serializes speech requests onto a [`Speaker`]: at most one utterance
/// plays, and a new request cancels the current one.
pub struct SpeechController<P> {
    speaker: P,
    voices: Vec<Voice>,
    prefs: VoicePreferences,
}

impl<P: Speaker> SpeechController<P> {
    /// The voice list is left empty until the first utterance or an explicit
    /// [`voices_changed`](Self::voices_changed).
    pub fn new(speaker: P, prefs: VoicePreferences) -> Self {
        Self {
            speaker,
            voices: Vec::new(),
            prefs,
        }
    }

    /// Called when the platform reports a new voice list.
    pub fn voices_changed(&mut self) {
        self.voices = self.speaker.voices();
        debug!(voices = self.voices.len(), "Voice list refreshed");
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Preferred voice by name, then any voice for the locale, else the
    /// platform default (`None`).
    pub fn select_voice(&self) -> Option<&Voice> {
        self.voices
            .iter()
            .find(|voice| voice.name == self.prefs.preferred_voice)
            .or_else(|| {
                self.voices
                    .iter()
                    .find(|voice| voice.lang.eq_ignore_ascii_case(&self.prefs.locale))
            })
    }

    /// Returns `Ok(false)` when there was nothing to say.
    pub fn speak(&mut self, text: &str, rate: PlaybackRate) -> Result<bool, SpeechError> {
        if self.speaker.is_speaking() {
            self.speaker.cancel();
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        if self.voices.is_empty() {
            self.voices_changed();
        }
        let utterance = Utterance {
            text: text.to_string(),
            voice: self.select_voice().cloned(),
            lang: self.prefs.locale.clone(),
            pitch: FIXED_PITCH,
            rate: rate.get(),
        };
        debug!(
            text = %utterance.text,
            voice = utterance.voice.as_ref().map(|v| v.name.as_str()),
            rate = utterance.rate,
            "Speaking"
        );
        self.speaker.speak(utterance)?;
        Ok(true)
    }

    pub fn wait_idle(&mut self) {
        self.speaker.wait_idle();
    }

    pub fn speaker(&self) -> &P {
        &self.speaker
    }
}

/// Speaker that accepts every request and produces no sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeaker;

impl Speaker for SilentSpeaker {
    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn is_speaking(&mut self) -> bool {
        false
    }

    fn cancel(&mut self) {}

    fn speak(&mut self, _utterance: Utterance) -> Result<(), SpeechError> {
        Ok(())
    }
}

/// Drives an `espeak-ng` compatible command line synthesizer.
#[derive(Debug)]
pub struct CommandSpeaker {
    program: String,
    child: Option<Child>,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: None,
        }
    }

    pub fn espeak() -> Self {
        Self::new("espeak-ng")
    }
}

impl Speaker for CommandSpeaker {
    fn voices(&self) -> Vec<Voice> {
        match Command::new(&self.program).arg("--voices").output() {
            Ok(output) if output.status.success() => {
                parse_espeak_voices(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                warn!(program = %self.program, status = %output.status, "voice listing failed");
                Vec::new()
            }
            Err(err) => {
                warn!(program = %self.program, error = %err, "speech engine unavailable");
                Vec::new()
            }
        }
    }

    fn is_speaking(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(_) => {
                self.child = None;
                false
            }
            None => false,
        }
    }

    fn cancel(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
        let voice = utterance
            .voice
            .as_ref()
            .map(|voice| voice.lang.as_str())
            .unwrap_or(utterance.lang.as_str());
        let wpm = (ESPEAK_BASE_WPM * utterance.rate).round().clamp(80.0, 450.0) as u32;
        let pitch = (utterance.pitch * 50.0).round().clamp(0.0, 99.0) as u32;
        let child = Command::new(&self.program)
            .arg("-v")
            .arg(voice)
            .arg("-s")
            .arg(wpm.to_string())
            .arg("-p")
            .arg(pitch.to_string())
            .arg("--")
            .arg(&utterance.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        self.child = Some(child);
        Ok(())
    }

    fn wait_idle(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.wait() {
                warn!(program = %self.program, error = %err, "failed to wait for speech engine");
            }
        }
    }
}

impl Drop for CommandSpeaker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Parses the table printed by `espeak-ng --voices`.
fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            Some(Voice {
                name: fields[3].replace('_', " "),
                lang: fields[1].to_string(),
            })
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn preferred_voice_wins_over_locale_match() {
        let speaker = RecordingSpeaker::with_voices(vec![
            voice("Samantha", "en-US"),
            voice("Google US English", "en-US"),
        ]);
        let mut controller = SpeechController::new(speaker, VoicePreferences::default());
        controller.voices_changed();
        assert_eq!(controller.select_voice().unwrap().name, "Google US English");
    }

    #[test]
    fn locale_match_then_platform_default() {
        let speaker = RecordingSpeaker::with_voices(vec![
            voice("Thomas", "fr-FR"),
            voice("English (America)", "en-us"),
        ]);
        let mut controller = SpeechController::new(speaker, VoicePreferences::default());
        controller.voices_changed();
        assert_eq!(controller.select_voice().unwrap().name, "English (America)");

        let speaker = RecordingSpeaker::with_voices(vec![voice("Thomas", "fr-FR")]);
        let mut controller = SpeechController::new(speaker, VoicePreferences::default());
        controller.voices_changed();
        assert!(controller.select_voice().is_none());
    }

    #[test]
    fn new_request_cancels_the_one_in_progress() {
        let speaker = RecordingSpeaker::default();
        let log = speaker.log.clone();
        let mut controller = SpeechController::new(speaker, VoicePreferences::default());
        assert!(controller.speak("first", PlaybackRate::default()).unwrap());
        assert_eq!(log.lock().cancels, 0);
        assert!(controller.speak("second", PlaybackRate::new(1.5)).unwrap());
        let log = log.lock();
        assert_eq!(log.cancels, 1);
        assert_eq!(log.spoken.len(), 2);
        assert_eq!(log.spoken[1].text, "second");
        assert_eq!(log.spoken[1].rate, 1.5);
        assert_eq!(log.spoken[1].pitch, 1.0);
        assert_eq!(log.spoken[1].lang, "en-US");
    }

    #[test]
    fn empty_text_only_cancels() {
        let speaker = RecordingSpeaker::default();
        let log = speaker.log.clone();
        let mut controller = SpeechController::new(speaker, VoicePreferences::default());
        controller.speak("hello", PlaybackRate::default()).unwrap();
        assert!(!controller.speak("   ", PlaybackRate::default()).unwrap());
        assert_eq!(log.lock().cancels, 1);
        assert_eq!(log.lock().spoken.len(), 1);
    }

    #[test]
    fn voices_resolve_lazily_when_initially_empty() {
        let speaker = RecordingSpeaker::default();
        let available = speaker.available.clone();
        let log = speaker.log.clone();
        let mut controller = SpeechController::new(speaker, VoicePreferences::default());
        assert!(controller.voices().is_empty());

        *available.lock() = vec![voice("Google US English", "en-US")];
        controller.speak("late", PlaybackRate::default()).unwrap();
        let log = log.lock();
        let spoken = &log.spoken[0];
        assert_eq!(spoken.voice.as_ref().unwrap().name, "Google US English");
    }

    #[test]
    fn construction_does_not_query_voices() {
        let speaker = RecordingSpeaker::with_voices(vec![voice("Alex", "en-US")]);
        let log = speaker.log.clone();
        let controller = SpeechController::new(speaker, VoicePreferences::default());
        assert!(controller.voices().is_empty());
        assert_eq!(log.lock().voice_queries, 0);
    }

    #[test]
    fn voices_changed_refreshes_cache() {
        let speaker = RecordingSpeaker::with_voices(vec![voice("Thomas", "fr-FR")]);
        let available = speaker.available.clone();
        let mut controller = SpeechController::new(speaker, VoicePreferences::default());
        available.lock().push(voice("Alex", "en-US"));
        controller.voices_changed();
        assert_eq!(controller.voices().len(), 2);
        assert_eq!(controller.select_voice().unwrap().name, "Alex");
    }

    #[test]
    fn rate_is_clamped() {
        assert_eq!(PlaybackRate::new(0.0).get(), 0.1);
        assert_eq!(PlaybackRate::new(25.0).get(), 10.0);
        assert_eq!(PlaybackRate::new(f32::NAN).get(), 1.0);
        assert_eq!(PlaybackRate::new(0.75).get(), 0.75);
    }

    #[test]
    fn espeak_listing_parses_language_and_name() {
        let listing = "Pty Language       Age/Gender VoiceName          File                 Other Languages\n \
             5  af              --/M      Afrikaans          gmw/af\n \
             2  en-us           --/M      English_(America)  gmw/en-US            (en 3)\n";
        let voices = parse_espeak_voices(listing);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[1].lang, "en-us");
        assert_eq!(voices[1].name, "English (America)");
    }
}
