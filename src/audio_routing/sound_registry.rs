//! Sound registry: a name-keyed table of registered clips with
//! priority-based preemption and intensity filtering, owned exclusively by
//! the audio routing task.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Caller-supplied handle identifying what to play; opaque to this crate.
pub type SoundHandle = u64;

/// Governs which intensities are allowed to play, set via
/// `set_sound_mode`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SoundMode {
    /// All registered sounds may play regardless of intensity.
    #[default]
    All,
    /// Only sounds at or below a caller-chosen intensity threshold play.
    Some(i32),
    /// Nothing plays; `play` calls are silently ignored.
    None,
}

#[derive(Debug, Clone)]
pub struct SoundEntry {
    pub handle: SoundHandle,
    pub mixing_allowed: bool,
    pub playable_in_call: bool,
    pub is_call_media: bool,
    pub priority: i32,
    pub intensity: i32,
    playing: bool,
}

/// `HashMap<String, SoundEntry>` plus the play/pause/stop/preemption
/// rules. One instance, owned by the audio task — never shared behind a
/// `Mutex` with the network task.
#[derive(Debug, Default)]
pub struct SoundRegistry {
    entries: HashMap<String, SoundEntry>,
    mode: SoundMode,
}

impl SoundRegistry {
    pub fn new() -> Self {
        SoundRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handle: SoundHandle,
        mixing_allowed: bool,
        playable_in_call: bool,
        intensity: i32,
        priority: i32,
        is_call_media: bool,
    ) -> Result<()> {
        let name = name.into();
        if name.len() > 128 {
            return Err(Error::invalid_argument("sound name exceeds 128 bytes"));
        }
        self.entries.insert(
            name,
            SoundEntry {
                handle,
                mixing_allowed,
                playable_in_call,
                is_call_media,
                priority,
                intensity,
                playing: false,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<SoundEntry> {
        self.entries.remove(name)
    }

    pub fn set_sound_mode(&mut self, mode: SoundMode) {
        self.mode = mode;
    }

    fn allowed_by_mode(&self, entry: &SoundEntry) -> bool {
        match self.mode {
            SoundMode::All => true,
            SoundMode::Some(threshold) => entry.intensity <= threshold,
            SoundMode::None => false,
        }
    }

    /// A sound with `priority > 0` preempts and stops every other
    /// currently-playing sound that doesn't allow mixing. Conversely, a
    /// sound is itself refused (not started) while a non-mixing sound of
    /// strictly higher priority is already playing. Returns `true` if
    /// `name` actually started playing.
    pub fn play(&mut self, name: &str) -> Result<bool> {
        let (priority, allowed) = {
            let entry = self
                .entries
                .get(name)
                .ok_or_else(|| Error::invalid_argument(format!("no such sound: {name}")))?;
            (entry.priority, self.allowed_by_mode(entry))
        };
        if !allowed {
            return Ok(false);
        }
        let blocked_by_higher_priority = self.entries.iter().any(|(other_name, other)| {
            other_name != name && other.playing && !other.mixing_allowed && other.priority > priority
        });
        if blocked_by_higher_priority {
            return Ok(false);
        }
        if priority > 0 {
            for (other_name, other) in self.entries.iter_mut() {
                if other_name != name && other.playing && !other.mixing_allowed {
                    other.playing = false;
                }
            }
        }
        if let Some(entry) = self.entries.get_mut(name) {
            entry.playing = true;
        }
        Ok(true)
    }

    pub fn pause(&mut self, name: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::invalid_argument(format!("no such sound: {name}")))?;
        entry.playing = false;
        Ok(())
    }

    pub fn stop(&mut self, name: &str) -> Result<()> {
        self.pause(name)
    }

    pub fn is_playing(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.playing).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_then_unregister_restores_empty_registry() {
        let mut reg = SoundRegistry::new();
        reg.register("ring", 1, false, true, 0, 0, false).unwrap();
        assert_eq!(reg.len(), 1);
        reg.unregister("ring");
        assert!(reg.is_empty());
    }

    #[test]
    fn high_priority_sound_preempts_playing_ones() {
        let mut reg = SoundRegistry::new();
        reg.register("ambient", 1, false, true, 0, 0, false).unwrap();
        reg.register("alert", 2, false, true, 0, 10, false).unwrap();
        reg.play("ambient").unwrap();
        assert!(reg.is_playing("ambient"));

        reg.play("alert").unwrap();
        assert!(reg.is_playing("alert"));
        assert!(!reg.is_playing("ambient"));
    }

    #[test]
    fn lower_priority_sound_is_suppressed_by_playing_exclusive_one() {
        let mut reg = SoundRegistry::new();
        reg.register("ringtone", 1, false, true, 0, 1, false).unwrap();
        reg.register("notif", 2, false, true, 0, 0, false).unwrap();
        assert!(reg.play("ringtone").unwrap());

        let started = reg.play("notif").unwrap();
        assert!(!started);
        assert!(!reg.is_playing("notif"));
        assert!(reg.is_playing("ringtone"));
    }

    #[test]
    fn mixing_allowed_sound_is_not_preempted() {
        let mut reg = SoundRegistry::new();
        reg.register("music", 1, true, true, 0, 0, false).unwrap();
        reg.register("alert", 2, false, true, 0, 10, false).unwrap();
        reg.play("music").unwrap();
        reg.play("alert").unwrap();
        assert!(reg.is_playing("music"));
        assert!(reg.is_playing("alert"));
    }

    #[test]
    fn intensity_above_threshold_never_plays() {
        let mut reg = SoundRegistry::new();
        reg.register("loud", 1, false, true, 9, 0, false).unwrap();
        reg.set_sound_mode(SoundMode::Some(5));
        let started = reg.play("loud").unwrap();
        assert!(!started);
        assert!(!reg.is_playing("loud"));
    }

    #[test]
    fn sound_mode_none_blocks_everything() {
        let mut reg = SoundRegistry::new();
        reg.register("tone", 1, false, true, 0, 0, false).unwrap();
        reg.set_sound_mode(SoundMode::None);
        let started = reg.play("tone").unwrap();
        assert!(!started);
    }

    #[test]
    fn name_over_128_bytes_is_rejected() {
        let mut reg = SoundRegistry::new();
        let name = "x".repeat(129);
        assert!(reg.register(name, 1, false, true, 0, 0, false).is_err());
    }
}
