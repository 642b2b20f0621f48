//! Offline rendering of a WAV file through a plugin chain

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::error::AudioError;
use super::plugin::PluginChain;
use super::wav::{read_wav, write_wav};

/// Frames per block handed to the chain
pub const OFFLINE_BLOCK_FRAMES: usize = 4096;

/// Renders files through a chain without an audio device
pub struct OfflineProcessor {
    chain: Arc<PluginChain>,
    block_frames: usize,
}

impl OfflineProcessor {
    pub fn new(chain: Arc<PluginChain>) -> Self {
        Self {
            chain,
            block_frames: OFFLINE_BLOCK_FRAMES,
        }
    }

    pub fn with_block_frames(mut self, block_frames: usize) -> Self {
        self.block_frames = block_frames.max(1);
        self
    }

    /// Process `input` into a 16-bit stereo `output` at the source rate.
    ///
    /// `progress` receives the completed fraction after every block and
    /// ends at 1.0. The chain is re-activated at the file's rate and
    /// deactivated afterwards, so it must not be running live at the same time.
    pub fn process_file<P, Q, F>(&self, input: P, output: Q, mut progress: F) -> Result<(), AudioError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        F: FnMut(f32),
    {
        let wav = read_wav(input.as_ref())?;
        let sample_rate = wav.sample_rate;
        let frames = wav.frames();
        let source = wav.into_stereo();

        info!(
            "Rendering {} ({} frames at {} Hz) through {} plugins",
            input.as_ref().display(),
            frames,
            sample_rate,
            self.chain.len()
        );

        let block = self.block_frames;
        self.chain.set_sample_rate(sample_rate as f32, block as u32);

        let mut rendered = vec![0.0f32; source.len()];
        let mut in_l = vec![0.0f32; block];
        let mut in_r = vec![0.0f32; block];
        let mut out_l = vec![0.0f32; block];
        let mut out_r = vec![0.0f32; block];

        let mut done = 0usize;
        for (src, dst) in source.chunks(block * 2).zip(rendered.chunks_mut(block * 2)) {
            let n = src.len() / 2;
            for (i, frame) in src.chunks_exact(2).enumerate() {
                in_l[i] = frame[0];
                in_r[i] = frame[1];
            }
            self.chain.process(
                [&in_l[..n], &in_r[..n]],
                [&mut out_l[..n], &mut out_r[..n]],
                n,
            );
            for (i, frame) in dst.chunks_exact_mut(2).enumerate() {
                frame[0] = out_l[i];
                frame[1] = out_r[i];
            }
            done += n;
            progress(done as f32 / frames as f32);
        }

        self.chain.deactivate();
        write_wav(output.as_ref(), &rendered, sample_rate, 2)?;

        info!("Rendered {}", output.as_ref().display());
        Ok(())
    }
}
