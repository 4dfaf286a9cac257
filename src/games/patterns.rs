//! Winning shapes and claim validation
//!
//! A claim is checked against the server's draw history only: every marked
//! number must have been drawn, the live number must be marked, and (except for
//! a full house) the completed shape must contain the live number.

use crate::cards::{CardGrid, Cell};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

type Coord = (usize, usize);

/// Named winning pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Shape {
    AnyLine,
    TwoLines,
    XShape,
    LShape,
    Corners,
    PlusSign,
    UShape,
    LetterH,
    LetterT,
    Frame,
    FullHouse,
}

impl Shape {
    pub const ALL: [Shape; 11] = [
        Shape::AnyLine,
        Shape::TwoLines,
        Shape::XShape,
        Shape::LShape,
        Shape::Corners,
        Shape::PlusSign,
        Shape::UShape,
        Shape::LetterH,
        Shape::LetterT,
        Shape::Frame,
        Shape::FullHouse,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Shape::AnyLine => "any_line",
            Shape::TwoLines => "two_lines",
            Shape::XShape => "x_shape",
            Shape::LShape => "l_shape",
            Shape::Corners => "corners",
            Shape::PlusSign => "plus_sign",
            Shape::UShape => "u_shape",
            Shape::LetterH => "letter_h",
            Shape::LetterT => "letter_t",
            Shape::Frame => "frame",
            Shape::FullHouse => "full_house",
        }
    }

    /// Unknown identifiers fall back to any-line semantics
    pub fn from_id(id: &str) -> Shape {
        Shape::ALL
            .iter()
            .copied()
            .find(|shape| shape.id() == id)
            .unwrap_or(Shape::AnyLine)
    }
}

impl From<String> for Shape {
    fn from(id: String) -> Self {
        Shape::from_id(&id)
    }
}

impl From<Shape> for String {
    fn from(shape: Shape) -> Self {
        shape.id().to_string()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Why a claim was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A marked number has not been drawn
    NotDrawn(u8),
    /// The live number is not among the marks
    MissedLastNumber(u8),
    /// Shape incomplete, or complete but not on the live number
    ShapeNotComplete(Shape),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotDrawn(n) => write!(f, "Invalid! {} not called.", n),
            RejectReason::MissedLastNumber(n) => write!(f, "Must bingo on the last called number ({})!", n),
            RejectReason::ShapeNotComplete(shape) => write!(f, "Not a bingo for {}.", shape),
        }
    }
}

/// Result of validating a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimVerdict {
    Valid,
    Invalid(RejectReason),
}

impl ClaimVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ClaimVerdict::Valid)
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            ClaimVerdict::Valid => None,
            ClaimVerdict::Invalid(reason) => Some(reason.to_string()),
        }
    }
}

fn row(r: usize) -> Vec<Coord> {
    (0..5).map(|c| (r, c)).collect()
}

fn col(c: usize) -> Vec<Coord> {
    (0..5).map(|r| (r, c)).collect()
}

fn main_diagonal() -> Vec<Coord> {
    (0..5).map(|i| (i, i)).collect()
}

fn anti_diagonal() -> Vec<Coord> {
    (0..5).map(|i| (i, 4 - i)).collect()
}

fn corners() -> Vec<Coord> {
    vec![(0, 0), (0, 4), (4, 0), (4, 4)]
}

/// Rows, columns and both diagonals
fn lines() -> Vec<Vec<Coord>> {
    let mut lines: Vec<Vec<Coord>> = (0..5).map(row).collect();
    lines.extend((0..5).map(col));
    lines.push(main_diagonal());
    lines.push(anti_diagonal());
    lines
}

fn concat(parts: &[Vec<Coord>]) -> Vec<Coord> {
    parts.iter().flatten().copied().collect()
}

/// Fixed coordinate set of a single-set shape
fn shape_coords(shape: Shape) -> Vec<Coord> {
    match shape {
        Shape::XShape => concat(&[main_diagonal(), anti_diagonal()]),
        Shape::LShape => concat(&[col(0), row(4)]),
        Shape::Corners => corners(),
        Shape::PlusSign => concat(&[col(2), row(2)]),
        Shape::UShape => concat(&[col(0), col(4), row(4)]),
        Shape::LetterH => concat(&[col(0), col(4), vec![(2, 1), (2, 2), (2, 3)]]),
        Shape::LetterT => concat(&[row(0), col(2)]),
        Shape::Frame => concat(&[row(0), row(4), col(0), col(4)]),
        Shape::FullHouse => (0..5).flat_map(row).collect(),
        Shape::AnyLine | Shape::TwoLines => Vec::new(),
    }
}

struct Board<'a> {
    grid: &'a CardGrid,
    marked: &'a HashSet<u8>,
    last_drawn: Option<u8>,
}

impl Board<'_> {
    fn is_marked(&self, (r, c): Coord) -> bool {
        match self.grid.cell(r, c) {
            Cell::Free => true,
            Cell::Number(n) => self.marked.contains(&n),
        }
    }

    fn complete(&self, coords: &[Coord]) -> bool {
        coords.iter().all(|coord| self.is_marked(*coord))
    }

    fn involves_last(&self, coords: &[Coord]) -> bool {
        match self.last_drawn {
            None => true,
            Some(last) => coords.iter().any(|(r, c)| self.grid.cell(*r, *c) == Cell::Number(last)),
        }
    }

    /// Complete and, when the live number is known, won on it
    fn wins_with(&self, coords: &[Coord]) -> bool {
        self.complete(coords) && self.involves_last(coords)
    }

    fn any_line(&self) -> bool {
        lines()
            .into_iter()
            .chain(std::iter::once(corners()))
            .any(|set| self.wins_with(&set))
    }

    fn two_lines(&self) -> bool {
        let completed: Vec<Vec<Coord>> = lines().into_iter().filter(|line| self.complete(line)).collect();
        completed.len() >= 2 && completed.iter().any(|line| self.involves_last(line))
    }
}

/// Decide whether `marked` on `grid` is a winning claim.
///
/// `last_drawn` is `None` only before the first draw registers; in that case
/// the live-number rules are skipped.
pub fn validate_claim(
    grid: &CardGrid,
    marked: &HashSet<u8>,
    drawn: &HashSet<u8>,
    shape: Shape,
    last_drawn: Option<u8>,
) -> ClaimVerdict {
    // Anti-cheat: marks must come from the draw history
    let mut marked_sorted: Vec<u8> = marked.iter().copied().collect();
    marked_sorted.sort_unstable();
    if let Some(undrawn) = marked_sorted.into_iter().find(|n| !drawn.contains(n)) {
        return ClaimVerdict::Invalid(RejectReason::NotDrawn(undrawn));
    }

    if let Some(last) = last_drawn {
        if !marked.contains(&last) {
            return ClaimVerdict::Invalid(RejectReason::MissedLastNumber(last));
        }
    }

    let board = Board { grid, marked, last_drawn };
    let won = match shape {
        Shape::AnyLine => board.any_line(),
        Shape::TwoLines => board.two_lines(),
        Shape::FullHouse => board.complete(&shape_coords(shape)),
        other => board.wins_with(&shape_coords(other)),
    };

    if won {
        ClaimVerdict::Valid
    } else {
        ClaimVerdict::Invalid(RejectReason::ShapeNotComplete(shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Column c holds 15c+1 ..= 15c+5 top to bottom, centre free
    fn fixed_grid() -> CardGrid {
        let mut rows = [[Cell::Free; 5]; 5];
        for (r, cells) in rows.iter_mut().enumerate() {
            for (c, cell) in cells.iter_mut().enumerate() {
                if r == 2 && c == 2 {
                    continue;
                }
                *cell = Cell::Number((c * 15 + r + 1) as u8);
            }
        }
        CardGrid::from_rows(rows)
    }

    fn numbers_at(grid: &CardGrid, coords: &[Coord]) -> HashSet<u8> {
        coords.iter().filter_map(|(r, c)| grid.cell(*r, *c).number()).collect()
    }

    fn check(grid: &CardGrid, marked: &HashSet<u8>, shape: Shape, last: Option<u8>) -> ClaimVerdict {
        // Drawn history = marks plus some unrelated noise
        let mut drawn = marked.clone();
        drawn.insert(75);
        validate_claim(grid, marked, &drawn, shape, last)
    }

    #[test]
    fn test_row_two_requires_last_number_in_row() {
        let grid = fixed_grid();
        // Row 2: 3, 18, FREE, 48, 63
        let row_two = numbers_at(&grid, &row(2));
        let mut marked = row_two.clone();
        marked.insert(1); // row 0, col 0

        assert!(check(&grid, &marked, Shape::AnyLine, Some(48)).is_valid());

        // Complete row, but the live number sits in another row
        let verdict = check(&grid, &marked, Shape::AnyLine, Some(1));
        assert_eq!(verdict, ClaimVerdict::Invalid(RejectReason::ShapeNotComplete(Shape::AnyLine)));
    }

    #[test]
    fn test_marked_number_must_be_drawn() {
        let grid = fixed_grid();
        let marked = numbers_at(&grid, &row(0));
        let mut drawn = marked.clone();
        drawn.remove(&16);

        let verdict = validate_claim(&grid, &marked, &drawn, Shape::AnyLine, Some(1));
        assert_eq!(verdict, ClaimVerdict::Invalid(RejectReason::NotDrawn(16)));
        assert!(verdict.reason().unwrap().contains("16 not called"));
    }

    #[test]
    fn test_last_number_must_be_marked() {
        let grid = fixed_grid();
        let marked = numbers_at(&grid, &row(0));
        let mut drawn = marked.clone();
        drawn.insert(70);

        let verdict = validate_claim(&grid, &marked, &drawn, Shape::AnyLine, Some(70));
        assert_eq!(verdict, ClaimVerdict::Invalid(RejectReason::MissedLastNumber(70)));
    }

    #[test]
    fn test_unknown_last_number_skips_recency() {
        let grid = fixed_grid();
        let marked = numbers_at(&grid, &col(4));
        assert!(check(&grid, &marked, Shape::AnyLine, None).is_valid());
    }

    #[test]
    fn test_any_line_accepts_corners_and_diagonals() {
        let grid = fixed_grid();
        let corners = numbers_at(&grid, &corners());
        assert!(check(&grid, &corners, Shape::AnyLine, Some(65)).is_valid());

        // Main diagonal passes through the free centre
        let diagonal = numbers_at(&grid, &main_diagonal());
        assert_eq!(diagonal.len(), 4);
        assert!(check(&grid, &diagonal, Shape::AnyLine, Some(20)).is_valid());
    }

    #[test]
    fn test_two_lines() {
        let grid = fixed_grid();
        let mut marked = numbers_at(&grid, &row(0));
        assert!(!check(&grid, &marked, Shape::TwoLines, Some(1)).is_valid());

        marked.extend(numbers_at(&grid, &row(4)));
        assert!(check(&grid, &marked, Shape::TwoLines, Some(5)).is_valid());

        // Add a stray drawn number that belongs to neither line
        marked.insert(17);
        assert!(!check(&grid, &marked, Shape::TwoLines, Some(17)).is_valid());
    }

    #[test]
    fn test_letter_shapes() {
        let grid = fixed_grid();
        for shape in [
            Shape::XShape,
            Shape::LShape,
            Shape::Corners,
            Shape::PlusSign,
            Shape::UShape,
            Shape::LetterH,
            Shape::LetterT,
            Shape::Frame,
        ] {
            let coords = shape_coords(shape);
            let marked = numbers_at(&grid, &coords);
            let last = *marked.iter().max().unwrap();
            assert!(check(&grid, &marked, shape, Some(last)).is_valid(), "{} should win", shape);

            let mut partial = marked.clone();
            partial.remove(&last);
            let other = *partial.iter().min().unwrap();
            assert!(!check(&grid, &partial, shape, Some(other)).is_valid(), "{} should need every cell", shape);
        }
    }

    #[test]
    fn test_letter_h_uses_middle_bar() {
        let grid = fixed_grid();
        let mut marked = numbers_at(&grid, &concat(&[col(0), col(4)]));
        assert!(!check(&grid, &marked, Shape::LetterH, Some(61)).is_valid());

        marked.extend([17u8, 47]);
        assert!(check(&grid, &marked, Shape::LetterH, Some(17)).is_valid());
    }

    #[test]
    fn test_full_house_ignores_shape_recency() {
        let grid = fixed_grid();
        let mut marked: HashSet<u8> = grid.numbers().collect();
        marked.insert(75);

        // Live number 75 is marked but not on the card; full house still wins
        assert!(check(&grid, &marked, Shape::FullHouse, Some(75)).is_valid());

        marked.remove(&1);
        assert!(!check(&grid, &marked, Shape::FullHouse, Some(75)).is_valid());
    }

    #[test]
    fn test_shape_ids_round_trip_and_fallback() {
        for shape in Shape::ALL {
            assert_eq!(Shape::from_id(shape.id()), shape);
        }
        assert_eq!(Shape::from_id("zigzag"), Shape::AnyLine);

        let parsed: Shape = serde_json::from_str("\"letter_t\"").unwrap();
        assert_eq!(parsed, Shape::LetterT);
        assert_eq!(serde_json::to_string(&Shape::PlusSign).unwrap(), "\"plus_sign\"");
    }
}
