//! Full-state sync of one [`VehicleRecord`] from the authority to observers.
//!
//! The writer and the reader walk the record through the same
//! [`sync_record`] function, so the field order on both ends can never
//! drift apart. Order: every boolean, then every float, then every integer
//! and timestamp. The stream starts with a single version byte.

use crate::id::Component;
use crate::malfunction::{Malfunctions, Phase};
use crate::record::VehicleRecord;
use crate::tire::TireQuality;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current wire version. Increment whenever the field order changes.
pub const SYNC_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("sync payload is empty")]
    Empty,
    #[error("unsupported sync version: expected {SYNC_VERSION}, got {0}")]
    UnsupportedVersion(u8),
    #[error("sync payload truncated at byte {0}")]
    Truncated(usize),
    #[error("{0} trailing bytes after sync payload")]
    TrailingBytes(usize),
}

// ---------------------------------------------------------------------------
// Stream abstraction
// ---------------------------------------------------------------------------

/// One side of a sync. Writers read each value and append it; readers
/// overwrite each value with the next one from the payload.
pub trait SyncStream {
    fn sync_bool(&mut self, value: &mut bool) -> Result<(), ReplicationError>;
    fn sync_f32(&mut self, value: &mut f32) -> Result<(), ReplicationError>;
    fn sync_u8(&mut self, value: &mut u8) -> Result<(), ReplicationError>;
    fn sync_u32(&mut self, value: &mut u32) -> Result<(), ReplicationError>;
    fn sync_u64(&mut self, value: &mut u64) -> Result<(), ReplicationError>;

    fn sync_i8(&mut self, value: &mut i8) -> Result<(), ReplicationError> {
        let mut raw = *value as u8;
        self.sync_u8(&mut raw)?;
        *value = raw as i8;
        Ok(())
    }
}

/// Serializing side. Never fails.
#[derive(Debug)]
pub struct SyncWriter {
    bytes: Vec<u8>,
}

impl Default for SyncWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncWriter {
    pub fn new() -> Self {
        Self {
            bytes: vec![SYNC_VERSION],
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

impl SyncStream for SyncWriter {
    fn sync_bool(&mut self, value: &mut bool) -> Result<(), ReplicationError> {
        self.bytes.push(u8::from(*value));
        Ok(())
    }

    fn sync_f32(&mut self, value: &mut f32) -> Result<(), ReplicationError> {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn sync_u8(&mut self, value: &mut u8) -> Result<(), ReplicationError> {
        self.bytes.push(*value);
        Ok(())
    }

    fn sync_u32(&mut self, value: &mut u32) -> Result<(), ReplicationError> {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn sync_u64(&mut self, value: &mut u64) -> Result<(), ReplicationError> {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

/// Deserializing side over a borrowed payload.
#[derive(Debug)]
pub struct SyncReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SyncReader<'a> {
    /// Check the version byte and position the reader after it.
    pub fn new(bytes: &'a [u8]) -> Result<Self, ReplicationError> {
        match bytes.first() {
            None => Err(ReplicationError::Empty),
            Some(&SYNC_VERSION) => Ok(Self { bytes, pos: 1 }),
            Some(&other) => Err(ReplicationError::UnsupportedVersion(other)),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ReplicationError> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ReplicationError::Truncated(self.pos))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    /// Fail if anything is left over.
    pub fn finish(self) -> Result<(), ReplicationError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            n => Err(ReplicationError::TrailingBytes(n)),
        }
    }
}

impl SyncStream for SyncReader<'_> {
    fn sync_bool(&mut self, value: &mut bool) -> Result<(), ReplicationError> {
        let [b] = self.take::<1>()?;
        *value = b != 0;
        Ok(())
    }

    fn sync_f32(&mut self, value: &mut f32) -> Result<(), ReplicationError> {
        *value = f32::from_le_bytes(self.take()?);
        Ok(())
    }

    fn sync_u8(&mut self, value: &mut u8) -> Result<(), ReplicationError> {
        let [b] = self.take::<1>()?;
        *value = b;
        Ok(())
    }

    fn sync_u32(&mut self, value: &mut u32) -> Result<(), ReplicationError> {
        *value = u32::from_le_bytes(self.take()?);
        Ok(())
    }

    fn sync_u64(&mut self, value: &mut u64) -> Result<(), ReplicationError> {
        *value = u64::from_le_bytes(self.take()?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Record walk
// ---------------------------------------------------------------------------

/// Flat mirror of every timed phase, in a fixed order.
struct PhaseFields([(bool, u64, u64, u64); 10]);

impl PhaseFields {
    fn capture(m: &Malfunctions) -> Self {
        Self(
            [
                m.stall.phase,
                m.misfire,
                m.overheat,
                m.surge.phase,
                m.stuck_down,
                m.stuck_up,
                m.implement_pull.phase,
                m.implement_drag,
                m.reduced_turning,
                m.pull_surge,
            ]
            .map(Phase::to_flat),
        )
    }

    fn apply(&self, m: &mut Malfunctions) {
        let [a, b, c, d, e, f, g, h, i, j] = self.0.map(|(active, start, end, cooldown_end)| {
            if active {
                Phase::Active {
                    started_at: start,
                    ends_at: end,
                }
            } else if cooldown_end > 0 {
                Phase::Cooldown {
                    ends_at: cooldown_end,
                }
            } else {
                Phase::Idle
            }
        });
        m.stall.phase = a;
        m.misfire = b;
        m.overheat = c;
        m.surge.phase = d;
        m.stuck_down = e;
        m.stuck_up = f;
        m.implement_pull.phase = g;
        m.implement_drag = h;
        m.reduced_turning = i;
        m.pull_surge = j;
    }
}

/// Visit every replicated field of `record` in wire order.
pub fn sync_record<S: SyncStream>(s: &mut S, record: &mut VehicleRecord) -> Result<(), ReplicationError> {
    let mut phases = PhaseFields::capture(&record.malfunctions);
    let mut tire_quality = record.tires.quality.index();

    // Booleans.
    for c in Component::ALL {
        s.sync_bool(&mut record.reliability.component_mut(c).seizure.is_seized)?;
    }
    for fluid in [&mut record.oil, &mut record.hydraulic_fluid] {
        s.sync_bool(&mut fluid.has_leak)?;
        s.sync_bool(&mut fluid.low_warning_shown)?;
        s.sync_bool(&mut fluid.critical_warning_shown)?;
    }
    s.sync_bool(&mut record.fuel_leak.has_leak)?;
    s.sync_bool(&mut record.tires.has_flat)?;
    for phase in &mut phases.0 {
        s.sync_bool(&mut phase.0)?;
    }
    let m = &mut record.malfunctions;
    s.sync_bool(&mut m.stall.first_start_pending)?;
    s.sync_bool(&mut m.drift.midpoint_notified)?;
    s.sync_bool(&mut m.runaway.active)?;

    // Floats.
    let r = &mut record.reliability;
    s.sync_f32(&mut r.quality_trait)?;
    for c in Component::ALL {
        let state = r.component_mut(c);
        s.sync_f32(&mut state.reliability)?;
        s.sync_f32(&mut state.ceiling)?;
    }
    for fluid in [&mut record.oil, &mut record.hydraulic_fluid] {
        s.sync_f32(&mut fluid.level)?;
        s.sync_f32(&mut fluid.leak_severity)?;
    }
    s.sync_f32(&mut record.fuel_leak.rate_multiplier)?;
    s.sync_f32(&mut record.tires.condition)?;
    s.sync_f32(&mut record.tires.distance_m)?;
    s.sync_f32(&mut m.surge.strength)?;
    s.sync_f32(&mut m.implement_pull.strength)?;

    // Integers and timestamps.
    s.sync_u32(&mut r.repair_count)?;
    s.sync_u32(&mut r.breakdown_count)?;
    for c in Component::ALL {
        let seizure = &mut r.component_mut(c).seizure;
        s.sync_u64(&mut seizure.seized_at)?;
        s.sync_u8(&mut seizure.zero_strikes)?;
    }
    s.sync_u8(&mut tire_quality)?;
    s.sync_i8(&mut record.tires.flat_side)?;
    s.sync_i8(&mut m.surge.direction)?;
    s.sync_i8(&mut m.implement_pull.direction)?;
    s.sync_i8(&mut record.chronic_pull_direction)?;
    for phase in &mut phases.0 {
        s.sync_u64(&mut phase.1)?;
        s.sync_u64(&mut phase.2)?;
        s.sync_u64(&mut phase.3)?;
    }
    s.sync_u64(&mut m.runaway.started_at)?;
    s.sync_u64(&mut m.runaway.cooldown_until)?;

    phases.apply(m);
    record.tires.quality = TireQuality::from_index(tire_quality);
    record.tires.rebuild_multipliers();
    Ok(())
}

/// Encode a record for the wire.
pub fn encode_record(record: &VehicleRecord) -> Vec<u8> {
    let mut writer = SyncWriter::new();
    let mut scratch = record.clone();
    // The writer is infallible.
    let _ = sync_record(&mut writer, &mut scratch);
    writer.finish()
}

/// Decode a record received from the authority. Out-of-range values are
/// pulled back into range before the record is used.
pub fn decode_record(payload: &[u8]) -> Result<VehicleRecord, ReplicationError> {
    let mut reader = SyncReader::new(payload)?;
    let mut record = VehicleRecord::default();
    sync_record(&mut reader, &mut record)?;
    reader.finish()?;
    record.sanitize();
    Ok(record)
}
