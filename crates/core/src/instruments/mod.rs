use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{BeatMatchError, Result};

/// Opaque handle to an instrument registered in an [`InstrumentTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(u16);

/// Opaque handle to a sound: one playing technique on one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SoundId {
    instrument: InstrumentId,
    technique: u16,
}

impl SoundId {
    pub fn instrument(&self) -> InstrumentId {
        self.instrument
    }
}

/// Caller-owned registry that hands out instrument and sound handles.
///
/// Names are matched case-insensitively. Handles from one table are
/// meaningless in another.
#[derive(Debug, Default, Clone)]
pub struct InstrumentTable {
    instruments: Vec<String>,
    instrument_index: HashMap<String, InstrumentId>,
    techniques: HashMap<InstrumentId, Vec<String>>,
    technique_index: HashMap<(InstrumentId, String), u16>,
}

impl InstrumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, registering it on first use.
    pub fn instrument(&mut self, name: &str) -> Result<InstrumentId> {
        let key = name.to_lowercase();
        if let Some(id) = self.instrument_index.get(&key) {
            return Ok(*id);
        }

        let id = u16::try_from(self.instruments.len())
            .map(InstrumentId)
            .map_err(|_| BeatMatchError::InvalidInput("instrument table is full"))?;
        self.instruments.push(name.to_string());
        self.instrument_index.insert(key, id);
        Ok(id)
    }

    /// Returns the handle for `technique` played on `instrument`.
    pub fn sound(&mut self, instrument: &str, technique: &str) -> Result<SoundId> {
        let instrument = self.instrument(instrument)?;
        let key = (instrument, technique.to_lowercase());
        if let Some(technique) = self.technique_index.get(&key) {
            return Ok(SoundId {
                instrument,
                technique: *technique,
            });
        }

        let techniques = self.techniques.entry(instrument).or_default();
        let technique_id = u16::try_from(techniques.len()).map_err(|_| {
            BeatMatchError::InvalidInput("too many techniques for one instrument")
        })?;
        techniques.push(technique.to_string());
        self.technique_index.insert(key, technique_id);

        Ok(SoundId {
            instrument,
            technique: technique_id,
        })
    }

    /// Looks up an already registered instrument without registering it.
    pub fn find_instrument(&self, name: &str) -> Option<InstrumentId> {
        self.instrument_index.get(&name.to_lowercase()).copied()
    }

    pub fn instrument_name(&self, id: InstrumentId) -> Option<&str> {
        self.instruments.get(id.0 as usize).map(String::as_str)
    }

    /// Display name of a sound, `instrument.technique`.
    pub fn sound_name(&self, sound: SoundId) -> Option<String> {
        let instrument = self.instrument_name(sound.instrument)?;
        let technique = self
            .techniques
            .get(&sound.instrument)?
            .get(sound.technique as usize)?;
        Some(format!("{instrument}.{technique}"))
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_names_case_insensitively() {
        let mut table = InstrumentTable::new();
        let snare = table.instrument("Snare").unwrap();
        let kick = table.instrument("kick").unwrap();

        assert_eq!(table.instrument("SNARE").unwrap(), snare);
        assert_ne!(snare, kick);
        assert_eq!(table.len(), 2);
        assert_eq!(table.instrument_name(snare), Some("Snare"));
        assert_eq!(table.find_instrument("KICK"), Some(kick));
        assert_eq!(table.find_instrument("ride"), None);
    }

    #[test]
    fn sounds_share_their_instrument() {
        let mut table = InstrumentTable::new();
        let open = table.sound("hihat", "open").unwrap();
        let closed = table.sound("HiHat", "closed").unwrap();

        assert_ne!(open, closed);
        assert_eq!(open.instrument(), closed.instrument());
        assert_eq!(table.sound("hihat", "OPEN").unwrap(), open);
        assert_eq!(table.sound_name(closed).as_deref(), Some("hihat.closed"));
    }

    #[test]
    fn handles_never_alias_when_the_table_is_full() {
        let mut table = InstrumentTable::new();
        for index in 0..=u16::MAX as u32 {
            table.instrument(&format!("drum-{index}")).unwrap();
        }
        assert_eq!(table.len(), u16::MAX as usize + 1);

        assert!(matches!(
            table.instrument("one too many"),
            Err(BeatMatchError::InvalidInput(_))
        ));
        assert_eq!(table.len(), u16::MAX as usize + 1);
        assert_eq!(table.find_instrument("one too many"), None);

        for index in 0..=u16::MAX as u32 {
            table.sound("drum-0", &format!("stroke-{index}")).unwrap();
        }
        assert!(matches!(
            table.sound("drum-0", "one too many"),
            Err(BeatMatchError::InvalidInput(_))
        ));
        assert!(table.sound("drum-0", "stroke-7").is_ok());
    }
}
