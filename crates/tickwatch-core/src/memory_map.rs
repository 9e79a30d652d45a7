//! Memory addresses sampled by the detector.
//!
//! Defaults match Pokemon Red (USA/Europe). HP values are stored
//! big-endian across two consecutive-ish bytes.

use tickwatch_types::{HpPair, Position};

use crate::console::Console;

/// Where each tracked value lives in console memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    /// Player X tile on the current map.
    pub player_x: u16,
    /// Player Y tile on the current map.
    pub player_y: u16,
    /// Non-zero while a battle is running.
    pub in_battle: u16,
    /// Direction the player sprite faces.
    pub facing_direction: u16,
    /// Current map identifier.
    pub map_id: u16,
    /// Lead party member current HP, high byte.
    pub hp_current_high: u16,
    /// Lead party member current HP, low byte.
    pub hp_current_low: u16,
    /// Lead party member max HP, high byte.
    pub hp_max_high: u16,
    /// Lead party member max HP, low byte.
    pub hp_max_low: u16,
}

impl MemoryMap {
    /// Addresses for Pokemon Red.
    pub const POKEMON_RED: Self = Self {
        player_x: 0xD362,
        player_y: 0xD361,
        in_battle: 0xD057,
        facing_direction: 0xD52A,
        map_id: 0xD35E,
        hp_current_high: 0xD015,
        hp_current_low: 0xD016,
        hp_max_high: 0xD018,
        hp_max_low: 0xD019,
    };

    /// Read the player position; absent if either coordinate is unreadable.
    pub fn position<C: Console + ?Sized>(&self, console: &C) -> Option<Position> {
        let x = console.read_byte(self.player_x)?;
        let y = console.read_byte(self.player_y)?;
        Some(Position::new(x, y))
    }

    /// Read the battle flag. An unreadable flag counts as "not in battle".
    pub fn in_battle<C: Console + ?Sized>(&self, console: &C) -> bool {
        console.read_byte(self.in_battle).is_some_and(|flag| flag != 0)
    }

    /// Read the facing direction byte.
    pub fn facing_direction<C: Console + ?Sized>(&self, console: &C) -> Option<u8> {
        console.read_byte(self.facing_direction)
    }

    /// Read the current map identifier.
    pub fn map_id<C: Console + ?Sized>(&self, console: &C) -> Option<u8> {
        console.read_byte(self.map_id)
    }

    /// Read the current/max HP pair; absent if any of the four bytes is.
    pub fn hp<C: Console + ?Sized>(&self, console: &C) -> Option<HpPair> {
        let current = read_u16_be(console, self.hp_current_high, self.hp_current_low)?;
        let max = read_u16_be(console, self.hp_max_high, self.hp_max_low)?;
        Some(HpPair::new(current, max))
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::POKEMON_RED
    }
}

fn read_u16_be<C: Console + ?Sized>(console: &C, high: u16, low: u16) -> Option<u16> {
    let high = console.read_byte(high)?;
    let low = console.read_byte(low)?;
    Some(u16::from_be_bytes([high, low]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;

    #[test]
    fn hp_is_big_endian() {
        let map = MemoryMap::default();
        let mut console = ScriptedConsole::default();
        console.set_byte(map.hp_current_high, 0x01);
        console.set_byte(map.hp_current_low, 0x2C);
        console.set_byte(map.hp_max_high, 0x01);
        console.set_byte(map.hp_max_low, 0x40);

        assert_eq!(map.hp(&console), Some(HpPair::new(300, 320)));
    }

    #[test]
    fn partial_reads_are_absent() {
        let map = MemoryMap::default();
        let mut console = ScriptedConsole::default();
        console.set_byte(map.player_x, 4);
        console.set_byte(map.hp_current_high, 0);

        assert_eq!(map.position(&console), None);
        assert_eq!(map.hp(&console), None);
        assert!(!map.in_battle(&console));
    }

    #[test]
    fn any_nonzero_battle_byte_means_battle() {
        let map = MemoryMap::default();
        let mut console = ScriptedConsole::default();
        console.set_byte(map.in_battle, 2);
        assert!(map.in_battle(&console));
        console.set_byte(map.in_battle, 0);
        assert!(!map.in_battle(&console));
    }
}
