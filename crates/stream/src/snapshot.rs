//! Versioned telemetry snapshots carried in block streams.
//!
//! Every block starts with a fixed `#[repr(C)]` header whose first field is the format version.
//! Analyser blocks follow the header with `fft_size` time-domain samples and `fft_size / 2`
//! frequency magnitudes in dB. Dynamics-compressor blocks are header only.
use bytemuck::{Pod, Zeroable};

use crate::BlockStream;

pub const ANALYSER_SNAPSHOT_VERSION: u32 = 1;
pub const DYNAMICS_COMPRESSOR_SNAPSHOT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AnalyserSnapshotHeader {
    pub version: u32,
    pub fft_size: u32,
    pub analyser_node_id: u64,
    pub rendered_frames_total: u64,
    pub reserved: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DynamicsCompressorSnapshotHeader {
    pub version: u32,
    pub reduction_db: f32,
    pub compressor_node_id: u64,
    pub rendered_frames_total: u64,
}

/// Byte size of an analyser block for `fft_size`.
pub const fn analyser_snapshot_size(fft_size: u32) -> usize {
    let fft_size = fft_size as usize;
    size_of::<AnalyserSnapshotHeader>() + (fft_size + fft_size / 2) * size_of::<f32>()
}

pub const fn dynamics_compressor_snapshot_size() -> usize {
    size_of::<DynamicsCompressorSnapshotHeader>()
}

/// Mutable views of an analyser block.
pub struct AnalyserSnapshotMut<'a> {
    pub header: &'a mut AnalyserSnapshotHeader,
    pub time_domain: &'a mut [f32],
    pub frequency_db: &'a mut [f32],
}

/// Split `block` into analyser header and payloads. `None` if the block is too small or
/// misaligned.
pub fn analyser_snapshot_mut(block: &mut [u8], fft_size: u32) -> Option<AnalyserSnapshotMut<'_>> {
    let size = analyser_snapshot_size(fft_size);
    if block.len() < size {
        return None;
    }
    let (header, payload) = block[..size].split_at_mut(size_of::<AnalyserSnapshotHeader>());
    let header = bytemuck::try_from_bytes_mut(header).ok()?;
    let payload = bytemuck::try_cast_slice_mut::<u8, f32>(payload).ok()?;
    let (time_domain, frequency_db) = payload.split_at_mut(fft_size as usize);
    Some(AnalyserSnapshotMut {
        header,
        time_domain,
        frequency_db,
    })
}

/// The header view of a dynamics-compressor block.
pub fn dynamics_compressor_snapshot_mut(
    block: &mut [u8],
) -> Option<&mut DynamicsCompressorSnapshotHeader> {
    let size = dynamics_compressor_snapshot_size();
    if block.len() < size {
        return None;
    }
    bytemuck::try_from_bytes_mut(&mut block[..size]).ok()
}

/// An analyser snapshot copied out of a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyserSnapshot {
    pub header: AnalyserSnapshotHeader,
    pub time_domain: Vec<f32>,
    pub frequency_db: Vec<f32>,
}

/// Drain `stream` and decode the newest analyser block. Older blocks and blocks that fail
/// validation are released.
pub fn read_latest_analyser_snapshot(
    stream: &BlockStream,
    analyser_node_id: u64,
) -> Option<AnalyserSnapshot> {
    let block = stream.receive_latest()?;
    let bytes = block.bytes();
    let header_size = size_of::<AnalyserSnapshotHeader>();
    if bytes.len() < header_size {
        return None;
    }
    let header: AnalyserSnapshotHeader = bytemuck::pod_read_unaligned(&bytes[..header_size]);
    if header.version != ANALYSER_SNAPSHOT_VERSION
        || header.analyser_node_id != analyser_node_id
        || bytes.len() < analyser_snapshot_size(header.fft_size)
    {
        return None;
    }
    let fft_size = header.fft_size as usize;
    let samples = &bytes[header_size..analyser_snapshot_size(header.fft_size)];
    let samples = samples
        .chunks_exact(size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect::<Vec<_>>();
    let (time_domain, frequency_db) = samples.split_at(fft_size);
    Some(AnalyserSnapshot {
        header,
        time_domain: time_domain.to_vec(),
        frequency_db: frequency_db.to_vec(),
    })
}

/// Drain `stream` and decode the newest dynamics-compressor block.
pub fn read_latest_dynamics_compressor_snapshot(
    stream: &BlockStream,
    compressor_node_id: u64,
) -> Option<DynamicsCompressorSnapshotHeader> {
    let block = stream.receive_latest()?;
    let bytes = block.bytes();
    let size = dynamics_compressor_snapshot_size();
    if bytes.len() < size {
        return None;
    }
    let header: DynamicsCompressorSnapshotHeader = bytemuck::pod_read_unaligned(&bytes[..size]);
    (header.version == DYNAMICS_COMPRESSOR_SNAPSHOT_VERSION
        && header.compressor_node_id == compressor_node_id)
        .then_some(header)
}
