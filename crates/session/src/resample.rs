use buffer::AudioBus;
use graph::RENDER_QUANTUM_SIZE;

/// Frames of context-rate audio the staging buffer holds.
pub const STAGING_FRAMES: usize = RENDER_QUANTUM_SIZE * 64;

pub struct Resampler {
    staging: AudioBus,
    quantum: AudioBus,
    staged: usize,
    position: f64,
}

impl Resampler {
    pub fn new(num_channels: usize) -> Self {
        Self {
            staging: AudioBus::new(num_channels, STAGING_FRAMES),
            quantum: AudioBus::new(num_channels, RENDER_QUANTUM_SIZE),
            staged: 0,
            position: 0.0,
        }
    }

    /// Forget all staged audio.
    pub fn reset(&mut self) {
        self.staged = 0;
        self.position = 0.0;
    }

    /// Context-rate frames staged but not yet consumed.
    pub fn staged_frames(&self) -> usize {
        self.staged
    }

    /// Fill `output` with audio at `target_rate`, calling `render` for each context quantum at
    /// `source_rate` it needs. If the ratio would overflow the staging buffer the output is
    /// silent and the resampler starts over.
    pub fn process(
        &mut self,
        source_rate: f32,
        target_rate: f32,
        output: &mut AudioBus,
        mut render: impl FnMut(&mut AudioBus),
    ) {
        let frames = output.num_frames();
        if frames == 0 {
            return;
        }
        if !(source_rate > 0.0 && target_rate > 0.0) {
            output.clear();
            return;
        }
        let channels = output.num_channels();
        if self.staging.resize(channels, STAGING_FRAMES)
            | self.quantum.resize(channels, RENDER_QUANTUM_SIZE)
        {
            self.reset();
        }

        let step = f64::from(source_rate) / f64::from(target_rate);
        let last = self.position + step * (frames - 1) as f64;
        let needed = last.floor() as usize + 2;

        while self.staged < needed {
            if self.staged + RENDER_QUANTUM_SIZE > STAGING_FRAMES {
                output.clear();
                self.reset();
                return;
            }
            render(&mut self.quantum);
            for channel in 0..self.quantum.num_channels() {
                let staged = self.staged;
                self.staging.channel_mut(channel)[staged..staged + RENDER_QUANTUM_SIZE]
                    .copy_from_slice(self.quantum.channel(channel));
            }
            self.staged += RENDER_QUANTUM_SIZE;
        }

        for channel in 0..output.num_channels() {
            let source = self.staging.channel(channel);
            let destination = output.channel_mut(channel);
            for (frame, sample) in destination.iter_mut().enumerate() {
                let position = self.position + step * frame as f64;
                let index = position as usize;
                let fraction = (position - index as f64) as f32;
                *sample = source[index] + (source[index + 1] - source[index]) * fraction;
            }
        }

        self.position += step * frames as f64;
        let consumed = (self.position.floor() as usize).min(self.staged);
        if consumed > 0 {
            for channel in 0..self.staging.num_channels() {
                self.staging
                    .channel_mut(channel)
                    .copy_within(consumed..self.staged, 0);
            }
            self.staged -= consumed;
            self.position -= consumed as f64;
        }
    }
}
