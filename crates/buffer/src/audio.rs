use std::ops::{Index, IndexMut};

/// Planar audio: `num_channels` runs of `num_frames` samples in one allocation.
///
/// The bus only reallocates in [AudioBus::resize] when its shape actually changes, so a render
/// loop can call `resize` every quantum and stay allocation free in steady state.
#[derive(Clone, Debug, Default)]
pub struct AudioBus {
    num_channels: usize,
    num_frames: usize,
    data: Vec<f32>,
}

impl AudioBus {
    pub fn new(num_channels: usize, num_frames: usize) -> Self {
        Self {
            num_channels,
            num_frames,
            data: vec![0.0; num_channels * num_frames],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Change the shape of the bus and silence it. Returns `true` if the shape changed.
    pub fn resize(&mut self, num_channels: usize, num_frames: usize) -> bool {
        if num_channels == self.num_channels && num_frames == self.num_frames {
            return false;
        }
        self.num_channels = num_channels;
        self.num_frames = num_frames;
        self.data.clear();
        self.data.resize(num_channels * num_frames, 0.0);
        true
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data[index * self.num_frames..(index + 1) * self.num_frames]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.num_frames..(index + 1) * self.num_frames]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.num_frames.max(1))
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data.chunks_exact_mut(self.num_frames.max(1))
    }

    /// Write the bus as interleaved frames into `output`. Returns the number of frames written,
    /// bounded by the length of `output`.
    pub fn interleave_into(&self, output: &mut [f32]) -> usize {
        if self.num_channels == 0 {
            return 0;
        }
        let frames = self.num_frames.min(output.len() / self.num_channels);
        for (channel, samples) in self.channels().enumerate() {
            for (frame, sample) in samples[..frames].iter().enumerate() {
                output[frame * self.num_channels + channel] = *sample;
            }
        }
        frames
    }
}

impl Index<usize> for AudioBus {
    type Output = [f32];
    fn index(&self, index: usize) -> &Self::Output {
        self.channel(index)
    }
}

impl IndexMut<usize> for AudioBus {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        self.channel_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::AudioBus;

    #[test]
    fn resize_only_on_change() {
        let mut bus = AudioBus::new(2, 128);
        bus[1].fill(0.5);
        assert!(!bus.resize(2, 128));
        assert_eq!(bus[1][0], 0.5);

        assert!(bus.resize(1, 64));
        assert_eq!(bus.num_channels(), 1);
        assert_eq!(bus.channel(0), &[0.0; 64][..]);
    }

    #[test]
    fn interleave() {
        let mut bus = AudioBus::new(2, 4);
        bus[0].copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        bus[1].copy_from_slice(&[-1.0, -2.0, -3.0, -4.0]);
        let mut output = [0.0; 8];
        assert_eq!(bus.interleave_into(&mut output), 4);
        assert_eq!(output, [1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 4.0, -4.0]);

        let mut short = [0.0; 3];
        assert_eq!(bus.interleave_into(&mut short), 1);
        assert_eq!(short, [1.0, -1.0, 0.0]);
    }
}
