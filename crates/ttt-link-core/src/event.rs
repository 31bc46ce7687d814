//! Events reported by the device

use crate::command::GameMode;
use crate::error::DecodeError;
use std::fmt;
use std::ops::Index;

/// Contents of one board square
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cell {
    #[default]
    Empty,
    X,
    O,
}

impl Cell {
    /// Parse a wire cell. The device sends `" "` for an empty square; `""` is accepted too.
    pub fn from_wire(value: &str) -> Result<Self, DecodeError> {
        match value {
            " " | "" => Ok(Cell::Empty),
            "X" => Ok(Cell::X),
            "O" => Ok(Cell::O),
            other => Err(DecodeError::ShapeViolation(format!(
                "cell value {:?} is not one of \" \", \"X\", \"O\"",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cell::Empty => " ",
            Cell::X => "X",
            Cell::O => "O",
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete 3x3 board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoardView([[Cell; 3]; 3]);

impl BoardView {
    pub const SIZE: usize = 3;

    pub fn new(cells: [[Cell; 3]; 3]) -> Self {
        Self(cells)
    }

    /// Build from wire rows, rejecting anything that is not exactly 3x3
    pub fn from_rows<S: AsRef<str>>(rows: &[Vec<S>]) -> Result<Self, DecodeError> {
        if rows.len() != Self::SIZE {
            return Err(DecodeError::ShapeViolation(format!(
                "expected {} rows, got {}",
                Self::SIZE,
                rows.len()
            )));
        }

        let mut cells = [[Cell::Empty; 3]; 3];
        for (r, row) in rows.iter().enumerate() {
            if row.len() != Self::SIZE {
                return Err(DecodeError::ShapeViolation(format!(
                    "row {} has {} cells, expected {}",
                    r,
                    row.len(),
                    Self::SIZE
                )));
            }
            for (c, value) in row.iter().enumerate() {
                cells[r][c] = Cell::from_wire(value.as_ref())?;
            }
        }
        Ok(Self(cells))
    }

    pub fn rows(&self) -> &[[Cell; 3]; 3] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().flatten().all(|c| *c == Cell::Empty)
    }
}

impl Index<usize> for BoardView {
    type Output = [Cell; 3];

    fn index(&self, row: usize) -> &Self::Output {
        &self.0[row]
    }
}

impl fmt::Display for BoardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f, "---+---+---")?;
            }
            writeln!(f, " {} | {} | {} ", row[0], row[1], row[2])?;
        }
        Ok(())
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Full board snapshot
    BoardUpdate { cells: BoardView },
    /// General game status text
    StatusMessage { text: String },
    /// Terminal game outcome
    WinStatus { text: String },
    /// Mode change acknowledgement
    ModeAck { mode: Option<GameMode>, text: String },
    /// Local decode failure; never sent by the device
    ProtocolError { text: String },
}

impl From<DecodeError> for InboundEvent {
    fn from(err: DecodeError) -> Self {
        InboundEvent::ProtocolError {
            text: err.to_string(),
        }
    }
}
