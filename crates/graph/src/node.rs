//! Node kinds and their configuration.
//!
//! Each kind splits its configuration three ways. Structural fields (channel counts, buffer sizes,
//! processor names, provider ids) shape the executor's buffers and can only change through a
//! rebuild. Channel mixing rules change how inputs are summed and can be patched as a topology
//! update. Everything else is a parameter value.
use crate::UpdateKind;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ChannelCountMode {
    #[default]
    Max,
    ClampedMax,
    Explicit,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ChannelInterpretation {
    #[default]
    Speakers,
    Discrete,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel_count: u32,
    pub mode: ChannelCountMode,
    pub interpretation: ChannelInterpretation,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BiquadType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GraphNode {
    Destination {
        channels: ChannelConfig,
    },
    Oscillator {
        waveform: Waveform,
        frequency: f32,
        detune: f32,
    },
    ConstantSource {
        offset: f32,
    },
    Gain {
        channels: ChannelConfig,
        gain: f32,
    },
    BiquadFilter {
        channels: ChannelConfig,
        filter_type: BiquadType,
        frequency: f32,
        q: f32,
        gain: f32,
        detune: f32,
    },
    Delay {
        channels: ChannelConfig,
        max_delay_time: f32,
        delay_time: f32,
    },
    Analyser {
        channels: ChannelConfig,
        fft_size: u32,
        smoothing_time_constant: f32,
        min_decibels: f32,
        max_decibels: f32,
    },
    DynamicsCompressor {
        channels: ChannelConfig,
        threshold: f32,
        knee: f32,
        ratio: f32,
        attack: f32,
        release: f32,
    },
    ScriptProcessor {
        buffer_size: u32,
        input_channel_count: u32,
        output_channel_count: u32,
    },
    AudioWorklet {
        channels: ChannelConfig,
        processor_name: String,
        number_of_inputs: u32,
        number_of_outputs: u32,
        output_channel_count: Vec<u32>,
    },
    MediaElementAudioSource {
        provider_id: u64,
        channel_count: u32,
    },
    MediaStreamAudioSource {
        provider_id: u64,
    },
}

impl ChannelConfig {
    pub fn new(channel_count: u32) -> Self {
        Self {
            channel_count,
            mode: ChannelCountMode::default(),
            interpretation: ChannelInterpretation::default(),
        }
    }

    fn classify_update(&self, other: &Self) -> UpdateKind {
        if self.channel_count != other.channel_count {
            UpdateKind::RebuildRequired
        } else if self.mode != other.mode || self.interpretation != other.interpretation {
            UpdateKind::Topology
        } else {
            UpdateKind::None
        }
    }
}

fn parameter(changed: bool) -> UpdateKind {
    if changed {
        UpdateKind::Parameter
    } else {
        UpdateKind::None
    }
}

fn structural(changed: bool) -> UpdateKind {
    if changed {
        UpdateKind::RebuildRequired
    } else {
        UpdateKind::None
    }
}

impl GraphNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Destination { .. } => "Destination",
            Self::Oscillator { .. } => "Oscillator",
            Self::ConstantSource { .. } => "ConstantSource",
            Self::Gain { .. } => "Gain",
            Self::BiquadFilter { .. } => "BiquadFilter",
            Self::Delay { .. } => "Delay",
            Self::Analyser { .. } => "Analyser",
            Self::DynamicsCompressor { .. } => "DynamicsCompressor",
            Self::ScriptProcessor { .. } => "ScriptProcessor",
            Self::AudioWorklet { .. } => "AudioWorklet",
            Self::MediaElementAudioSource { .. } => "MediaElementAudioSource",
            Self::MediaStreamAudioSource { .. } => "MediaStreamAudioSource",
        }
    }

    /// The channel configuration, for kinds that mix their inputs.
    pub fn channels(&self) -> Option<&ChannelConfig> {
        match self {
            Self::Destination { channels }
            | Self::Gain { channels, .. }
            | Self::BiquadFilter { channels, .. }
            | Self::Delay { channels, .. }
            | Self::Analyser { channels, .. }
            | Self::DynamicsCompressor { channels, .. }
            | Self::AudioWorklet { channels, .. } => Some(channels),
            _ => None,
        }
    }

    pub fn channels_mut(&mut self) -> Option<&mut ChannelConfig> {
        match self {
            Self::Destination { channels }
            | Self::Gain { channels, .. }
            | Self::BiquadFilter { channels, .. }
            | Self::Delay { channels, .. }
            | Self::Analyser { channels, .. }
            | Self::DynamicsCompressor { channels, .. }
            | Self::AudioWorklet { channels, .. } => Some(channels),
            _ => None,
        }
    }

    /// How an executor built for `self` would have to change to render `other`.
    pub fn classify_update(&self, other: &Self) -> UpdateKind {
        use GraphNode::*;
        match (self, other) {
            (Destination { channels: a }, Destination { channels: b }) => a.classify_update(b),
            (
                Oscillator {
                    waveform: wa,
                    frequency: fa,
                    detune: da,
                },
                Oscillator {
                    waveform: wb,
                    frequency: fb,
                    detune: db,
                },
            ) => parameter(wa != wb || fa != fb || da != db),
            (ConstantSource { offset: a }, ConstantSource { offset: b }) => parameter(a != b),
            (
                Gain {
                    channels: ca,
                    gain: ga,
                },
                Gain {
                    channels: cb,
                    gain: gb,
                },
            ) => ca.classify_update(cb).max(parameter(ga != gb)),
            (
                BiquadFilter {
                    channels: ca,
                    filter_type: ta,
                    frequency: fa,
                    q: qa,
                    gain: ga,
                    detune: da,
                },
                BiquadFilter {
                    channels: cb,
                    filter_type: tb,
                    frequency: fb,
                    q: qb,
                    gain: gb,
                    detune: db,
                },
            ) => ca
                .classify_update(cb)
                .max(parameter(ta != tb || fa != fb || qa != qb || ga != gb || da != db)),
            (
                Delay {
                    channels: ca,
                    max_delay_time: ma,
                    delay_time: da,
                },
                Delay {
                    channels: cb,
                    max_delay_time: mb,
                    delay_time: db,
                },
            ) => ca
                .classify_update(cb)
                .max(structural(ma != mb))
                .max(parameter(da != db)),
            (
                Analyser {
                    channels: ca,
                    fft_size: fa,
                    smoothing_time_constant: sa,
                    min_decibels: mina,
                    max_decibels: maxa,
                },
                Analyser {
                    channels: cb,
                    fft_size: fb,
                    smoothing_time_constant: sb,
                    min_decibels: minb,
                    max_decibels: maxb,
                },
            ) => ca
                .classify_update(cb)
                .max(structural(fa != fb))
                .max(parameter(sa != sb || mina != minb || maxa != maxb)),
            (
                DynamicsCompressor {
                    channels: ca,
                    threshold: ta,
                    knee: ka,
                    ratio: ra,
                    attack: aa,
                    release: la,
                },
                DynamicsCompressor {
                    channels: cb,
                    threshold: tb,
                    knee: kb,
                    ratio: rb,
                    attack: ab,
                    release: lb,
                },
            ) => ca
                .classify_update(cb)
                .max(parameter(ta != tb || ka != kb || ra != rb || aa != ab || la != lb)),
            (a @ ScriptProcessor { .. }, b @ ScriptProcessor { .. }) => structural(a != b),
            (
                AudioWorklet {
                    channels: ca,
                    processor_name: na,
                    number_of_inputs: ia,
                    number_of_outputs: oa,
                    output_channel_count: occ_a,
                },
                AudioWorklet {
                    channels: cb,
                    processor_name: nb,
                    number_of_inputs: ib,
                    number_of_outputs: ob,
                    output_channel_count: occ_b,
                },
            ) => ca
                .classify_update(cb)
                .max(structural(na != nb || ia != ib || oa != ob || occ_a != occ_b)),
            (a @ MediaElementAudioSource { .. }, b @ MediaElementAudioSource { .. }) => {
                structural(a != b)
            }
            (a @ MediaStreamAudioSource { .. }, b @ MediaStreamAudioSource { .. }) => {
                structural(a != b)
            }
            _ => UpdateKind::RebuildRequired,
        }
    }
}
