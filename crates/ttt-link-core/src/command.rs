//! Commands sent from the host to the device

use crate::error::CommandError;
use std::fmt;

/// A row or column index on the 3x3 board (0, 1 or 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridIndex(u8);

impl GridIndex {
    pub const MAX: u8 = 2;

    /// Build an index, rejecting anything past the board edge
    pub fn new(value: u8) -> Result<Self, CommandError> {
        if value <= Self::MAX {
            Ok(Self(value))
        } else {
            Err(CommandError::GridIndex(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for GridIndex {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GridIndex> for u8 {
    fn from(index: GridIndex) -> Self {
        index.0
    }
}

/// Who plays which side, as understood by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameMode {
    UserVsUser,
    UserVsAi,
    AiVsAi,
}

impl GameMode {
    pub const ALL: [GameMode; 3] = [GameMode::UserVsUser, GameMode::UserVsAi, GameMode::AiVsAi];

    /// Wire value
    pub fn as_u8(self) -> u8 {
        match self {
            GameMode::UserVsUser => 0,
            GameMode::UserVsAi => 1,
            GameMode::AiVsAi => 2,
        }
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            GameMode::UserVsUser => "User vs User",
            GameMode::UserVsAi => "User vs AI",
            GameMode::AiVsAi => "AI vs AI",
        }
    }
}

impl TryFrom<u8> for GameMode {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GameMode::UserVsUser),
            1 => Ok(GameMode::UserVsAi),
            2 => Ok(GameMode::AiVsAi),
            other => Err(CommandError::GameMode(other)),
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A command for the device
///
/// Ranges are checked when the command is built, so every value of this
/// type has a valid wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Place a mark on the board
    Move { row: GridIndex, col: GridIndex },
    /// Switch game mode
    SetMode { mode: GameMode },
    /// Start a new game
    Reset,
}

impl OutboundCommand {
    /// Build a move from raw coordinates
    pub fn play(row: u8, col: u8) -> Result<Self, CommandError> {
        Ok(OutboundCommand::Move {
            row: GridIndex::new(row)?,
            col: GridIndex::new(col)?,
        })
    }

    /// Build a mode change from its wire value
    pub fn mode(mode: u8) -> Result<Self, CommandError> {
        Ok(OutboundCommand::SetMode {
            mode: GameMode::try_from(mode)?,
        })
    }

    /// Wire discriminator
    pub fn name(&self) -> &'static str {
        match self {
            OutboundCommand::Move { .. } => "MOVE",
            OutboundCommand::SetMode { .. } => "MODE",
            OutboundCommand::Reset => "RESET",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_index_bounds() {
        assert_eq!(GridIndex::new(2).unwrap().get(), 2);
        assert_eq!(GridIndex::new(3), Err(CommandError::GridIndex(3)));
        assert!(OutboundCommand::play(0, 3).is_err());
        assert!(OutboundCommand::play(1, 2).is_ok());
    }

    #[test]
    fn test_game_mode_values() {
        for mode in GameMode::ALL {
            assert_eq!(GameMode::try_from(mode.as_u8()).unwrap(), mode);
        }
        assert_eq!(GameMode::try_from(3), Err(CommandError::GameMode(3)));
        assert_eq!(GameMode::UserVsAi.to_string(), "User vs AI");
    }

    #[test]
    fn test_command_names() {
        assert_eq!(OutboundCommand::Reset.name(), "RESET");
        assert_eq!(OutboundCommand::mode(1).unwrap().name(), "MODE");
        assert_eq!(OutboundCommand::play(0, 0).unwrap().name(), "MOVE");
    }
}
