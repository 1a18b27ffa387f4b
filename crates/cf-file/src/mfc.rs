//! Master-call feature container (`.mfc`)
//!
//! Little-endian tagged binary:
//!
//! ```text
//! offset size   field
//! 0      4      magic: "MFC1"
//! 4      2      version (u16): current 2
//! 6      2      flags (u16): bit0 = has_enhanced_profile
//! 8      4      sample_rate (u32, Hz)
//! 12     4      frame_size (u32, samples)
//! 16     4      hop_size (u32, samples)
//! 20     4      mfcc_coeffs (u32)
//! 24     4      n_filters (u32)
//! 28     4      n_frames (u32)
//! 32     8      fingerprint (u64, FNV-1a of coefficients)
//! 40     ...    frames: n_frames × (mfcc_coeffs × f32 + f32 energy)
//!        ...    if flags.bit0: enhanced profile block (10 × f32)
//! ```
//!
//! Readers validate magic, version, flags, frame count, and the
//! fingerprint. Unknown flag bits mean a newer writer: `VersionMismatch`.

use std::fs;
use std::path::Path;

use cf_core::{
    EngineError, EngineResult, EnhancedProfile, ExtractorParams, FeatureFrame, MFC_VERSION,
    MasterFeatureRecord, fingerprint_frames,
};

/// Container magic tag
pub const MFC_MAGIC: [u8; 4] = *b"MFC1";
/// Flag bit: an enhanced profile block follows the frames
const FLAG_ENHANCED: u16 = 0x0001;
/// All flag bits this reader understands
const KNOWN_FLAGS: u16 = FLAG_ENHANCED;
/// Header length in bytes
const HEADER_LEN: usize = 40;

/// Serialize a record to container bytes
pub fn write_mfc(record: &MasterFeatureRecord) -> EngineResult<Vec<u8>> {
    let n_frames = record.frames.len();
    if n_frames == 0 {
        return Err(EngineError::corrupt("refusing to write a record with no frames"));
    }
    if n_frames > u32::MAX as usize {
        return Err(EngineError::corrupt("frame count exceeds container limit"));
    }
    let coeffs = record.params.mfcc_coeffs as usize;

    let frame_bytes = n_frames * (coeffs + 1) * 4;
    let enhanced_bytes = if record.enhanced.is_some() { 40 } else { 0 };
    let mut out = Vec::with_capacity(HEADER_LEN + frame_bytes + enhanced_bytes);

    out.extend_from_slice(&MFC_MAGIC);
    out.extend_from_slice(&MFC_VERSION.to_le_bytes());
    let flags: u16 = if record.enhanced.is_some() { FLAG_ENHANCED } else { 0 };
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&record.params.sample_rate.to_le_bytes());
    out.extend_from_slice(&record.params.frame_size.to_le_bytes());
    out.extend_from_slice(&record.params.hop_size.to_le_bytes());
    out.extend_from_slice(&record.params.mfcc_coeffs.to_le_bytes());
    out.extend_from_slice(&record.params.n_filters.to_le_bytes());
    out.extend_from_slice(&(n_frames as u32).to_le_bytes());
    out.extend_from_slice(&record.fingerprint.to_le_bytes());

    for frame in &record.frames {
        if frame.coeffs.len() != coeffs {
            return Err(EngineError::corrupt(format!(
                "frame has {} coefficients, header says {coeffs}",
                frame.coeffs.len()
            )));
        }
        for &c in &frame.coeffs {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&frame.energy.to_le_bytes());
    }

    if let Some(enh) = &record.enhanced {
        for v in [
            enh.pitch_median_hz,
            enh.pitch_conf,
            enh.centroid_hz,
            enh.spread_hz,
            enh.rasp,
            enh.brightness,
            enh.resonance,
            enh.roughness,
            enh.tempo_bpm,
            enh.tempo_conf,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    Ok(out)
}

/// Parse container bytes into a record
///
/// The call id is not stored in the container; it comes from the cache key
/// (usually the file stem).
pub fn read_mfc(bytes: &[u8], call_id: &str) -> EngineResult<MasterFeatureRecord> {
    let mut r = Reader { bytes, pos: 0 };

    let magic = r.take(4)?;
    if magic != MFC_MAGIC {
        return Err(EngineError::corrupt("bad magic, not an .mfc container"));
    }

    let version = r.u16()?;
    if version == 0 || version > MFC_VERSION {
        return Err(EngineError::VersionMismatch {
            reason: format!("container version {version}, reader supports 1..={MFC_VERSION}"),
        });
    }

    let flags = r.u16()?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(EngineError::VersionMismatch {
            reason: format!("unknown flag bits {:#06x}", flags & !KNOWN_FLAGS),
        });
    }
    if version < 2 && flags & FLAG_ENHANCED != 0 {
        return Err(EngineError::corrupt("v1 container claims an enhanced block"));
    }

    let params = ExtractorParams {
        sample_rate: r.u32()?,
        frame_size: r.u32()?,
        hop_size: r.u32()?,
        mfcc_coeffs: r.u32()?,
        n_filters: r.u32()?,
    };
    if params.sample_rate == 0 || params.frame_size == 0 || params.hop_size == 0 {
        return Err(EngineError::corrupt("zero extraction parameter in header"));
    }
    if params.mfcc_coeffs == 0 || params.mfcc_coeffs > 256 {
        return Err(EngineError::corrupt(format!(
            "implausible coefficient count {}",
            params.mfcc_coeffs
        )));
    }

    let n_frames = r.u32()? as usize;
    if n_frames == 0 {
        return Err(EngineError::corrupt("container holds zero frames"));
    }
    let fingerprint = r.u64()?;

    let coeffs = params.mfcc_coeffs as usize;
    let hop_seconds = params.hop_size as f64 / params.sample_rate as f64;
    let mut frames = Vec::with_capacity(n_frames);
    for i in 0..n_frames {
        let mut frame = FeatureFrame {
            coeffs: Vec::with_capacity(coeffs),
            energy: 0.0,
            // Timestamps are not persisted; rebuild from the hop clock.
            timestamp: i as f64 * hop_seconds,
        };
        for _ in 0..coeffs {
            frame.coeffs.push(r.f32()?);
        }
        frame.energy = r.f32()?;
        frames.push(frame);
    }

    let enhanced = if flags & FLAG_ENHANCED != 0 {
        Some(EnhancedProfile {
            pitch_median_hz: r.f32()?,
            pitch_conf: r.f32()?,
            centroid_hz: r.f32()?,
            spread_hz: r.f32()?,
            rasp: r.f32()?,
            brightness: r.f32()?,
            resonance: r.f32()?,
            roughness: r.f32()?,
            tempo_bpm: r.f32()?,
            tempo_conf: r.f32()?,
        })
    } else {
        None
    };

    if r.pos != bytes.len() {
        return Err(EngineError::corrupt(format!(
            "{} trailing bytes after container payload",
            bytes.len() - r.pos
        )));
    }

    let computed = fingerprint_frames(&frames);
    if computed != fingerprint {
        return Err(EngineError::corrupt(format!(
            "fingerprint mismatch: header {fingerprint:#018x}, computed {computed:#018x}"
        )));
    }

    Ok(MasterFeatureRecord {
        call_id: call_id.to_string(),
        params,
        frames,
        fingerprint,
        version,
        enhanced,
    })
}

/// Read a record from disk
pub fn load_mfc(path: &Path, call_id: &str) -> EngineResult<MasterFeatureRecord> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EngineError::NotFound(call_id.to_string()),
        _ => EngineError::corrupt(format!("cannot read {}: {e}", path.display())),
    })?;
    log::debug!("loading master '{}' from {} ({} bytes)", call_id, path.display(), bytes.len());
    read_mfc(&bytes, call_id)
}

/// Write a record to disk
pub fn save_mfc(path: &Path, record: &MasterFeatureRecord) -> EngineResult<()> {
    let bytes = write_mfc(record)?;
    fs::write(path, &bytes)
        .map_err(|e| EngineError::corrupt(format!("cannot write {}: {e}", path.display())))?;
    log::debug!(
        "saved master '{}' to {} ({} frames)",
        record.call_id,
        path.display(),
        record.frames.len()
    );
    Ok(())
}

/// Little-endian cursor over container bytes
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(EngineError::corrupt(format!(
                "truncated container: wanted {n} bytes at offset {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self) -> EngineResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> EngineResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> EngineResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f32(&mut self) -> EngineResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
