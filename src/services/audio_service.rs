use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 24_000;

const LEAD_SILENCE_MS: u32 = 1_500;
const HEADING_SILENCE_MS: u32 = 1_500;
const LINE_GAP_MS: u32 = 300;
const LONG_LINE_EXTRA_MS: u32 = 400;
const LONG_LINE_WORDS: usize = 18;
const PART_GAP_MS: u32 = 2_000;

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(section|part)\s+(\d+|one|two|three|four)\b").expect("static regex")
    })
}

/// Turns one utterance into WAV bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'static str,
}

/// HTTP client for a hosted TTS endpoint that answers with a WAV body.
#[derive(Clone)]
pub struct HostedTtsClient {
    client: Client,
    url: String,
    api_key: String,
}

impl HostedTtsClient {
    pub fn new(url: String, api_key: String, client: Client) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HostedTtsClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&TtsRequest {
                text,
                voice,
                language: "en",
            })
            .timeout(Duration::from_secs(120));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let res = req.send().await?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("TTS endpoint returned {}", status)));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("TTS error {}: {}", status, body)));
        }
        Ok(res.bytes().await?.to_vec())
    }
}

/// Mono 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl AudioClip {
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
        }
    }

    pub fn silence(sample_rate: u32, ms: u32) -> Self {
        Self {
            sample_rate,
            samples: vec![0; samples_for(sample_rate, ms)],
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn push_silence(&mut self, ms: u32) {
        let n = samples_for(self.sample_rate, ms);
        self.samples.extend(std::iter::repeat(0).take(n));
    }

    /// Appends `other`, converting it to this clip's sample rate first.
    pub fn append(&mut self, other: &AudioClip) {
        if other.sample_rate == self.sample_rate {
            self.samples.extend_from_slice(&other.samples);
        } else {
            self.samples
                .extend(other.resample(self.sample_rate).samples);
        }
    }

    /// Nearest-neighbour resampling.
    pub fn resample(&self, target_rate: u32) -> AudioClip {
        if target_rate == self.sample_rate || self.samples.is_empty() || self.sample_rate == 0 {
            return AudioClip {
                sample_rate: target_rate,
                samples: self.samples.clone(),
            };
        }
        let out_len = (self.samples.len() as u64 * target_rate as u64 / self.sample_rate as u64) as usize;
        let samples = (0..out_len)
            .map(|i| {
                let src = (i as u64 * self.sample_rate as u64 / target_rate as u64) as usize;
                self.samples[src.min(self.samples.len() - 1)]
            })
            .collect();
        AudioClip {
            sample_rate: target_rate,
            samples,
        }
    }

    /// Decodes int or float WAV of any channel count, averaging channels to mono.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| scale_to_i16(v, bits)))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / frame.len() as i32) as i16
                })
                .collect()
        };

        Ok(Self {
            sample_rate: spec.sample_rate,
            samples,
        })
    }

    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_wav_bytes()?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_wav_bytes(&bytes)
    }
}

fn samples_for(sample_rate: u32, ms: u32) -> usize {
    (sample_rate as u64 * ms as u64 / 1000) as usize
}

fn scale_to_i16(value: i32, bits: u16) -> i16 {
    if bits > 16 {
        (value >> (bits - 16)) as i16
    } else if bits < 16 {
        (value << (16 - bits)) as i16
    } else {
        value as i16
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptLine {
    /// Numbered `Section N` / `Part N` headings are read as a pause.
    Heading,
    Speech {
        speaker: Option<String>,
        text: String,
    },
}

impl ScriptLine {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if heading_regex().is_match(line) {
            return Some(ScriptLine::Heading);
        }

        if let Some((label, rest)) = line.split_once(':') {
            let label = label.trim();
            if is_speaker_label(label) {
                let text = rest.trim();
                if text.is_empty() {
                    return None;
                }
                return Some(ScriptLine::Speech {
                    speaker: Some(label.to_string()),
                    text: text.to_string(),
                });
            }
        }

        Some(ScriptLine::Speech {
            speaker: None,
            text: line.to_string(),
        })
    }
}

// "Mrs Smith" is a label, "The time is 10" (from "10:30") is not.
fn is_speaker_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 30
        && label.split_whitespace().count() <= 3
        && label.chars().next().is_some_and(|c| c.is_alphabetic())
        && label.chars().all(|c| c.is_alphabetic() || matches!(c, ' ' | '.' | '\'' | '-'))
}

/// Narrator voice for narrator/unlabelled lines, speaker pool in order of appearance.
#[derive(Debug, Clone)]
pub struct VoiceAssigner {
    narrator: String,
    pool: Vec<String>,
    assigned: HashMap<String, String>,
    next: usize,
}

impl VoiceAssigner {
    pub fn new(narrator: String, pool: Vec<String>) -> Self {
        Self {
            narrator,
            pool,
            assigned: HashMap::new(),
            next: 0,
        }
    }

    pub fn voice_for(&mut self, speaker: Option<&str>) -> String {
        let Some(speaker) = speaker else {
            return self.narrator.clone();
        };
        let key = speaker.trim().to_lowercase();
        if key == "narrator" || self.pool.is_empty() {
            return self.narrator.clone();
        }
        if let Some(voice) = self.assigned.get(&key) {
            return voice.clone();
        }
        let voice = self.pool[self.next % self.pool.len()].clone();
        self.next += 1;
        self.assigned.insert(key, voice.clone());
        voice
    }
}

#[derive(Clone)]
pub struct AudioService {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    narrator_voice: String,
    speaker_voices: Vec<String>,
    sample_rate: u32,
}

impl AudioService {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        narrator_voice: String,
        speaker_voices: Vec<String>,
    ) -> Self {
        Self {
            synthesizer,
            narrator_voice,
            speaker_voices,
            sample_rate: SAMPLE_RATE,
        }
    }

    /// Renders one part's transcript line by line.
    pub async fn section_audio(&self, transcript: &str) -> Result<AudioClip> {
        let mut voices = VoiceAssigner::new(self.narrator_voice.clone(), self.speaker_voices.clone());
        let mut clip = AudioClip::silence(self.sample_rate, LEAD_SILENCE_MS);
        let lines: Vec<ScriptLine> = transcript.lines().filter_map(ScriptLine::parse).collect();
        let total = lines.len();

        for (idx, line) in lines.into_iter().enumerate() {
            let (speaker, text) = match line {
                ScriptLine::Heading => {
                    clip.push_silence(HEADING_SILENCE_MS);
                    continue;
                }
                ScriptLine::Speech { speaker, text } => (speaker, text),
            };

            let voice = voices.voice_for(speaker.as_deref());
            tracing::debug!("Converting line {}/{} with voice {}", idx + 1, total, voice);
            let wav = self.synthesizer.synthesize(&text, &voice).await?;
            clip.append(&AudioClip::from_wav_bytes(&wav)?);

            clip.push_silence(LINE_GAP_MS);
            if text.split_whitespace().count() > LONG_LINE_WORDS {
                clip.push_silence(LONG_LINE_EXTRA_MS);
            }
        }
        Ok(clip)
    }

    /// Joins part clips with a fixed pause between them.
    pub fn full_audio(&self, parts: &[AudioClip]) -> AudioClip {
        let mut full = AudioClip::empty(self.sample_rate);
        for (idx, part) in parts.iter().enumerate() {
            if idx > 0 {
                full.push_silence(PART_GAP_MS);
            }
            full.append(part);
        }
        full
    }
}
