//! Beat library
//!
//! A beat id is either a file name inside the library directory or an
//! http(s) URL. Either way the audio is decoded, folded to stereo and
//! resampled to the pipeline rate.

use super::error::StageError;
use super::BeatSource;
use crate::audio::decoder::{decode_bytes, decode_file, DecodedAudio};
use crate::audio::resampler::resample_interleaved;
use crate::models::BeatAudio;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub struct BeatLibrary {
    root: PathBuf,
    sample_rate: u32,
    http_client: reqwest::Client,
}

impl BeatLibrary {
    pub fn new(root: PathBuf, sample_rate: u32, download_timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(download_timeout_secs))
            .build()?;
        Ok(Self {
            root,
            sample_rate,
            http_client,
        })
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), StageError> {
        let response = self.http_client.get(url).send().await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StageError::InvalidInput(format!("beat URL returned 404: {}", url)))
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(StageError::RateLimited),
            s if s.is_server_error() => {
                return Err(StageError::Network(format!("beat download returned {}", s)))
            }
            s => return Err(StageError::InvalidInput(format!("beat download returned {}", s))),
        }

        let extension = reqwest::Url::parse(url).ok().and_then(|u| {
            u.path()
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_lowercase())
                .filter(|ext| ext.len() <= 4)
        });
        let bytes = response.bytes().await?;
        debug!(url = %url, bytes = bytes.len(), "Beat downloaded");
        Ok((bytes.to_vec(), extension))
    }
}

#[async_trait]
impl BeatSource for BeatLibrary {
    async fn load(&self, beat_id: &str) -> Result<BeatAudio, StageError> {
        let target_rate = self.sample_rate;

        let decoded = if beat_id.starts_with("http://") || beat_id.starts_with("https://") {
            let (bytes, extension) = self.download(beat_id).await?;
            tokio::task::spawn_blocking(move || decode_bytes(bytes, extension.as_deref()))
                .await
                .map_err(|e| StageError::Internal(format!("decode task failed: {}", e)))?
        } else {
            let path = self.root.join(beat_id);
            if !path.is_file() {
                return Err(StageError::InvalidInput(format!(
                    "beat '{}' not found in the library",
                    beat_id
                )));
            }
            tokio::task::spawn_blocking(move || decode_file(&path))
                .await
                .map_err(|e| StageError::Internal(format!("decode task failed: {}", e)))?
        };
        let decoded =
            decoded.map_err(|e| StageError::InvalidInput(format!("undecodable beat: {:#}", e)))?;

        let beat = tokio::task::spawn_blocking(move || to_pipeline_rate(decoded, target_rate))
            .await
            .map_err(|e| StageError::Internal(format!("resample task failed: {}", e)))??;

        if beat.frames() == 0 {
            return Err(StageError::InvalidInput(format!("beat '{}' is empty", beat_id)));
        }
        info!(
            beat = %beat_id,
            seconds = format!("{:.1}", beat.duration_seconds()),
            "Beat loaded"
        );
        Ok(beat)
    }
}

fn to_pipeline_rate(decoded: DecodedAudio, target_rate: u32) -> Result<BeatAudio, StageError> {
    let stereo = BeatAudio::from_interleaved(&decoded.samples, decoded.channels, decoded.sample_rate);
    let samples = resample_interleaved(stereo.samples, 2, decoded.sample_rate, target_rate)
        .map_err(|e| StageError::Internal(format!("resampling beat: {:#}", e)))?;
    Ok(BeatAudio {
        samples,
        sample_rate: target_rate,
        channels: 2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::encode_wav_16;

    #[tokio::test]
    async fn test_loads_library_file_as_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let mono: Vec<f32> = (0..8_000).map(|i| (i as f32 * 0.02).sin() * 0.5).collect();
        std::fs::write(dir.path().join("loop.wav"), encode_wav_16(&mono, 1, 8_000).unwrap()).unwrap();

        let library = BeatLibrary::new(dir.path().to_path_buf(), 8_000, 5).unwrap();
        let beat = library.load("loop.wav").await.unwrap();
        assert_eq!(beat.channels, 2);
        assert_eq!(beat.frames(), 8_000);
        assert_eq!(beat.samples[0], beat.samples[1]);
    }

    #[tokio::test]
    async fn test_missing_beat_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let library = BeatLibrary::new(dir.path().to_path_buf(), 8_000, 5).unwrap();
        let err = library.load("nope.mp3").await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.code(), "InvalidInput");
    }
}
